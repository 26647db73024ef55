/// manager.rs
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Settings;
use crate::models::chat::PipelineResponse;
use crate::services::context_assembler::ContextAssembler;
use crate::services::formatter::{build_sources, format_response};
use crate::services::generator::{LlmProvider, ResponseGenerator};
use crate::services::query_analyzer::QueryAnalyzer;
use crate::services::retriever::{Retriever, VectorIndex};
use crate::utils::error::PipelineError;
use crate::utils::metrics::{ConversationStats, Stats, StatsTracker, TurnOutcome};

use super::cache::ConversationStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Analyzing,
    Retrieving,
    Assembling,
    Generating,
    Formatting,
    Done,
    ErrorFallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// One collaborator failed its probe
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub retrieval_ok: bool,
    pub generation_ok: bool,
    pub active_conversations: usize,
    pub checked_at: DateTime<Utc>,
}

pub struct ConversationManager {
    store: ConversationStore,
    analyzer: QueryAnalyzer,
    retriever: Retriever,
    assembler: ContextAssembler,
    generator: ResponseGenerator,
    stats: StatsTracker,
    default_k: usize,
    context_budget: usize,
    apology_response: String,
}

impl ConversationManager {
    pub fn new(
        settings: &Settings,
        index: Arc<dyn VectorIndex>,
        llm: Arc<dyn LlmProvider>,
        stats: StatsTracker,
    ) -> Self {
        Self {
            store: ConversationStore::new(&settings.memory),
            analyzer: QueryAnalyzer::new(&settings.analyzer),
            retriever: Retriever::new(index, &settings.retrieval),
            assembler: ContextAssembler::new(&settings.context),
            generator: ResponseGenerator::new(
                llm,
                &settings.llm,
                &settings.prompts,
                settings.memory.history_turns,
            ),
            stats,
            default_k: settings.retrieval.default_k,
            context_budget: settings.context.budget_chars,
            apology_response: settings.prompts.apology_response.clone(),
        }
    }

    /// Run one turn of the conversation. Only an empty query is returned as an
    /// error; every other failure yields a `success: false` response and the
    /// turn is still recorded.
    pub async fn answer(&self, query: &str, conversation_id: &str) -> Result<PipelineResponse, PipelineError> {
        let start_time = Instant::now();
        let request_id = Uuid::new_v4().to_string();
        let mut stages = Vec::new();

        if query.trim().is_empty() {
            warn!("[{}] Rejected empty query for conversation {}", request_id, conversation_id);
            return Err(PipelineError::InvalidInput("Empty query provided".to_string()));
        }

        info!("[{}] Query received for conversation {}", request_id, conversation_id);

        let conversation = self.store.get_or_create(conversation_id);
        let mut state = conversation.lock().await;

        Self::enter(&request_id, &mut stages, PipelineStage::Analyzing);
        let analysis = self.analyzer.analyze(query, &state.memory)?;

        Self::enter(&request_id, &mut stages, PipelineStage::Retrieving);
        let (documents, retrieval_error) = match self
            .retriever
            .retrieve(&analysis.reformulated_query, self.default_k)
            .await
        {
            Ok(documents) => (documents, None),
            Err(e) if e.is_recoverable() => {
                Self::enter(&request_id, &mut stages, PipelineStage::ErrorFallback);
                warn!("[{}] {} ({}), continuing without context", request_id, e, e.code());
                (Vec::new(), Some(e))
            }
            Err(e) => return Err(e),
        };
        let documents_retrieved = documents.len();

        Self::enter(&request_id, &mut stages, PipelineStage::Assembling);
        let context = self.assembler.assemble(documents, self.context_budget);

        Self::enter(&request_id, &mut stages, PipelineStage::Generating);
        let generated = match self.generator.generate(&analysis, &context, &state.memory).await {
            Ok(raw) => {
                Self::enter(&request_id, &mut stages, PipelineStage::Formatting);
                let formatted = format_response(&raw);
                if formatted.is_empty() {
                    Err(PipelineError::FormattingAnomaly("formatted answer is empty".to_string()))
                } else {
                    Ok(formatted)
                }
            }
            Err(e) => Err(e),
        };

        let (text, failure) = match generated {
            Ok(text) => {
                Self::enter(&request_id, &mut stages, PipelineStage::Done);
                (text, None)
            }
            Err(e) if !e.is_recoverable() => return Err(e),
            Err(e) => {
                Self::enter(&request_id, &mut stages, PipelineStage::ErrorFallback);
                error!("[{}] {} ({}), answering with fallback", request_id, e, e.code());
                (self.apology_response.clone(), Some(e))
            }
        };

        // All awaits are done; memory and counters change together or not at all
        let outcome = TurnOutcome {
            retrieval_succeeded: documents_retrieved > 0,
            generation_failed: matches!(failure, Some(PipelineError::Generation(_))),
        };
        state.memory.record(query.trim(), text.as_str());
        state.stats.record(outcome);
        state.touch();
        self.stats.record(outcome);

        let success = retrieval_error.is_none() && failure.is_none();
        let sources = if failure.is_none() { build_sources(&context) } else { Vec::new() };
        let processing_time_ms = start_time.elapsed().as_millis() as u64;

        info!(
            "[{}] Completed in {}ms: success={}, documents={}, context_used={}",
            request_id, processing_time_ms, success, documents_retrieved, context.context_used
        );

        Ok(PipelineResponse {
            request_id,
            text,
            success,
            context_used: context.context_used,
            context_truncated: context.truncated,
            relevance_score: context.aggregate_relevance,
            documents_retrieved,
            query_analysis: analysis,
            sources,
            stages,
            processing_time_ms,
        })
    }

    fn enter(request_id: &str, stages: &mut Vec<PipelineStage>, stage: PipelineStage) {
        debug!("[{}] Stage -> {:?}", request_id, stage);
        stages.push(stage);
    }

    /// Clear memory and counters of one conversation. Unknown ids are a no-op.
    pub async fn reset(&self, conversation_id: &str) {
        if let Some(conversation) = self.store.get(conversation_id) {
            conversation.lock().await.reset();
            info!("Conversation {} reset", conversation_id);
        } else {
            debug!("Reset requested for unknown conversation {}", conversation_id);
        }
    }

    /// Per-conversation counters, or the process-wide snapshot for `None`.
    /// Unknown conversations report zeroed counters without being created.
    pub async fn get_stats(&self, conversation_id: Option<&str>) -> Stats {
        match conversation_id {
            None => self.stats.snapshot(),
            Some(id) => match self.store.get(id) {
                Some(conversation) => conversation.lock().await.stats.snapshot(),
                None => ConversationStats::new().snapshot(),
            },
        }
    }

    /// Probe both collaborators concurrently. Never fails.
    pub async fn health(&self) -> HealthReport {
        let (retrieval_ok, generation_ok) = tokio::join!(self.retriever.ping(), self.generator.ping());

        let status = match (retrieval_ok, generation_ok) {
            (true, true) => HealthStatus::Healthy,
            (false, false) => HealthStatus::Unhealthy,
            _ => HealthStatus::Degraded,
        };
        self.store.cleanup_expired();

        HealthReport {
            status,
            retrieval_ok,
            generation_ok,
            active_conversations: self.store.len(),
            checked_at: Utc::now(),
        }
    }

    /// Number of turns currently remembered for a conversation
    pub async fn memory_len(&self, conversation_id: &str) -> usize {
        match self.store.get(conversation_id) {
            Some(conversation) => conversation.lock().await.memory.len(),
            None => 0,
        }
    }

    /// Drop conversations idle past the configured ttl
    pub fn cleanup_expired_conversations(&self) -> usize {
        self.store.cleanup_expired()
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }
}
