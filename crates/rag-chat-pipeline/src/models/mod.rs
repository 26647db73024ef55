pub mod chat;

pub use chat::{ChatMessage, ConversationId, Exchange, PipelineResponse, Role, SourceInfo};
