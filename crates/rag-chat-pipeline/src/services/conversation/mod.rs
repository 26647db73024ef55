//! Conversation memory and pipeline orchestration
//!
//! Provides per-conversation state with:
//! - Thread-safe store (DashMap) with one writer per conversation
//! - Fixed-capacity turn memory
//! - The answer pipeline, reset, stats and health

mod cache;
pub mod manager;
pub mod types;

pub use cache::{ConversationStore, SharedConversation};
pub use manager::{ConversationManager, HealthReport, HealthStatus, PipelineStage};
pub use types::{ConversationMemory, ConversationState, Turn};
