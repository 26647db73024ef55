use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::config::{LlmConfig, PromptsConfig};
use crate::models::chat::ChatMessage;
use crate::services::context_assembler::AssembledContext;
use crate::services::conversation::ConversationMemory;
use crate::services::query_analyzer::{QueryAnalysis, QueryCategory};
use crate::utils::error::PipelineError;

const NO_CONTEXT_NOTE: &str = "No relevant information found in the knowledge base.";

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: usize,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: 1000,
        }
    }
}

impl From<&LlmConfig> for GenerationParams {
    fn from(config: &LlmConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

/// Trait for the text generation service
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage], params: &GenerationParams) -> Result<String>;

    /// Lightweight availability probe used by health checks
    async fn ping(&self) -> Result<()> {
        let params = GenerationParams { temperature: 0.0, max_tokens: 1 };
        self.complete(&[ChatMessage::user("ping")], &params).await.map(|_| ())
    }
}

pub struct ResponseGenerator {
    llm: Arc<dyn LlmProvider>,
    params: GenerationParams,
    system_prompt: String,
    out_of_scope_response: String,
    history_turns: usize,
    max_attempts: u32,
    retry_backoff: Duration,
    timeout: Duration,
}

impl ResponseGenerator {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        llm_config: &LlmConfig,
        prompts: &PromptsConfig,
        history_turns: usize,
    ) -> Self {
        Self {
            llm,
            params: GenerationParams::from(llm_config),
            system_prompt: prompts.system_prompt.clone(),
            out_of_scope_response: prompts.out_of_scope_response.clone(),
            history_turns,
            max_attempts: llm_config.max_attempts.max(1),
            retry_backoff: Duration::from_millis(llm_config.retry_backoff_ms),
            timeout: llm_config.timeout(),
        }
    }

    /// Produce raw answer text. Out-of-scope questions with no usable context
    /// get the canned reply without calling the service.
    pub async fn generate(
        &self,
        analysis: &QueryAnalysis,
        context: &AssembledContext,
        memory: &ConversationMemory,
    ) -> Result<String, PipelineError> {
        if !context.context_used && analysis.category == QueryCategory::OutOfScope {
            debug!("Out-of-scope query without context, using canned response");
            return Ok(self.out_of_scope_response.replace("{query}", &analysis.original_query));
        }

        let messages = self.build_messages(analysis, context, memory);
        debug!(
            "Generating answer: {} messages, {} context documents",
            messages.len(),
            context.documents.len()
        );

        self.complete_with_retry(&messages).await
    }

    /// System prompt, recent history, then the context block and current question
    pub fn build_messages(
        &self,
        analysis: &QueryAnalysis,
        context: &AssembledContext,
        memory: &ConversationMemory,
    ) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(2 + self.history_turns * 2);
        messages.push(ChatMessage::system(self.system_prompt.clone()));
        messages.extend(memory.history_messages(self.history_turns));

        let mut prompt = String::from("Context Information:\n");
        if context.context_used {
            for (i, doc) in context.documents.iter().enumerate() {
                prompt.push_str(&format!("[{}] {}\n{}\n\n", i + 1, doc.source_label(), doc.content.trim()));
            }
        } else {
            prompt.push_str(NO_CONTEXT_NOTE);
            prompt.push_str("\n\n");
        }

        if analysis.is_follow_up && analysis.reformulated_query != analysis.original_query {
            prompt.push_str(&format!("Original Question: {}\n", analysis.original_query));
        }
        prompt.push_str(&format!("Current Question: {}", analysis.reformulated_query));

        messages.push(ChatMessage::user(prompt));
        messages
    }

    async fn complete_with_retry(&self, messages: &[ChatMessage]) -> Result<String, PipelineError> {
        let mut last_error = String::new();

        for attempt in 1..=self.max_attempts {
            match tokio::time::timeout(self.timeout, self.llm.complete(messages, &self.params)).await {
                Ok(Ok(text)) => return Ok(text),
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => last_error = format!("timed out after {}s", self.timeout.as_secs()),
            }

            if attempt < self.max_attempts {
                warn!("Generation attempt {}/{} failed: {}", attempt, self.max_attempts, last_error);
                tokio::time::sleep(self.retry_backoff * attempt).await;
            }
        }

        error!("Generation failed after {} attempts: {}", self.max_attempts, last_error);
        Err(PipelineError::Generation(last_error))
    }

    pub async fn ping(&self) -> bool {
        match tokio::time::timeout(self.timeout, self.llm.ping()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!("Generation service health probe failed: {}", e);
                false
            }
            Err(_) => {
                warn!("Generation service health probe timed out");
                false
            }
        }
    }
}
