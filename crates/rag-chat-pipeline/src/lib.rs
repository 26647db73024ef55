pub mod config;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Settings;
pub use models::chat::{PipelineResponse, SourceInfo};
pub use services::conversation::{ConversationManager, HealthReport, HealthStatus};
pub use utils::error::PipelineError;
pub use utils::metrics::{Stats, StatsTracker};
