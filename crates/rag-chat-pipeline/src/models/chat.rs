use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::services::conversation::PipelineStage;
use crate::services::query_analyzer::QueryAnalysis;

/// Conversation identifier supplied by the serving layer.
pub type ConversationId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Message sent to the generation service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// One side of a finished turn. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Exchange {
    role: Role,
    text: String,
    timestamp: DateTime<Utc>,
}

impl Exchange {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, text: text.into(), timestamp: Utc::now() }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: Role::Assistant, text: text.into(), timestamp: Utc::now() }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage { role: self.role, content: self.text.clone() }
    }
}

// ===== RESPONSE MODELS =====

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceInfo {
    pub document_id: String,
    pub source: String,
    pub relevance_score: f32,
    pub preview: String, // first 150 chars
}

/// Result of one `answer()` call. Always well-formed; failures are reported
/// through `success` and the human-readable `text`.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResponse {
    pub request_id: String,
    pub text: String,
    pub success: bool,
    pub context_used: bool,
    /// A document was cut or left out to fit the context budget
    pub context_truncated: bool,
    pub relevance_score: f32,
    pub documents_retrieved: usize,
    pub query_analysis: QueryAnalysis,
    pub sources: Vec<SourceInfo>,
    /// Stages visited, in order
    pub stages: Vec<PipelineStage>,
    pub processing_time_ms: u64,
}
