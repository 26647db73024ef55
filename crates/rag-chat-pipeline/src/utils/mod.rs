pub mod error;
pub mod logger;
pub mod metrics;

pub use error::PipelineError;
pub use metrics::{ConversationStats, Stats, StatsTracker, TurnOutcome};
