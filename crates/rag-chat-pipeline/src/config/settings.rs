use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    #[serde(default)]
    pub prompts: PromptsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_llm_timeout")]
    pub timeout_seconds: u64,
    /// Total attempts per generation call (1 = no retry)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_index_base_url")]
    pub base_url: String,
    #[serde(default = "default_k")]
    pub default_k: usize,
    #[serde(default = "default_max_k")]
    pub max_k: usize,
    #[serde(default = "default_min_relevance")]
    pub min_relevance: f32,
    #[serde(default = "default_retrieval_timeout")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ContextConfig {
    /// Character ceiling for document text placed in the prompt
    #[serde(default = "default_budget_chars")]
    pub budget_chars: usize,
    #[serde(default = "default_min_fragment_chars")]
    pub min_fragment_chars: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MemoryConfig {
    /// Max retained turns (user + assistant = 1 turn)
    #[serde(default = "default_memory_capacity")]
    pub capacity: usize,
    /// Turns replayed into the generation prompt
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
    /// Conversations idle longer than this are dropped from the store
    #[serde(default = "default_idle_ttl")]
    pub idle_ttl_seconds: u64,
    #[serde(default = "default_max_conversations")]
    pub max_conversations: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AnalyzerConfig {
    #[serde(default = "default_domain_vocabulary")]
    pub domain_vocabulary: Vec<String>,
    /// Below this confidence a query is classified out of scope
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    #[serde(default = "default_max_query_chars")]
    pub max_query_chars: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PromptsConfig {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// `{query}` is replaced with the user's question
    #[serde(default = "default_out_of_scope_response")]
    pub out_of_scope_response: String,
    #[serde(default = "default_apology_response")]
    pub apology_response: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default = "default_log_directory")]
    pub directory: String,
}

fn default_llm_base_url() -> String {
    "https://api.openai.com".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_llm_timeout() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_temperature() -> f32 {
    0.3
}

fn default_max_tokens() -> usize {
    1000
}

fn default_index_base_url() -> String {
    "http://localhost:6333".to_string()
}

fn default_k() -> usize {
    5
}

fn default_max_k() -> usize {
    10
}

fn default_min_relevance() -> f32 {
    0.15
}

fn default_retrieval_timeout() -> u64 {
    5
}

fn default_budget_chars() -> usize {
    6000
}

fn default_min_fragment_chars() -> usize {
    50
}

fn default_memory_capacity() -> usize {
    10
}

fn default_history_turns() -> usize {
    4
}

fn default_idle_ttl() -> u64 {
    3600
}

fn default_max_conversations() -> usize {
    10_000
}

fn default_domain_vocabulary() -> Vec<String> {
    [
        "eu ai act",
        "ai act",
        "artificial intelligence",
        "ai regulation",
        "european union",
        "ai system",
        "ai systems",
        "high-risk",
        "risk",
        "compliance",
        "non-compliance",
        "regulation",
        "provider",
        "providers",
        "deployer",
        "deployers",
        "obligation",
        "obligations",
        "penalty",
        "penalties",
        "fine",
        "fines",
        "transparency",
        "conformity assessment",
        "biometric",
        "general-purpose ai",
        "legal",
        "law",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_min_confidence() -> f32 {
    0.3
}

fn default_max_query_chars() -> usize {
    2000
}

fn default_system_prompt() -> String {
    r#"You are a helpful AI assistant specializing in explaining the EU AI Act in simple, clear terms. Your goal is to provide accurate but user-friendly responses.

Core principles:
1. Keep it simple: use clear, everyday language and avoid legal jargon
2. Be concise: give direct answers without overwhelming detail
3. Stay accurate: only use information from the context provided
4. Use context: consider the conversation history to understand follow-up questions
5. Cite sources: refer to context documents by their [n] marker

Response style:
- Start with a simple, direct answer
- Use bullet points for key points (max 3-4 points)
- Keep responses under 150 words unless the user asks for more detail
- End with a brief, practical takeaway

If the question is outside the EU AI Act or the context does not contain enough information, say so clearly and suggest what the user might ask instead. Never invent provisions that are not in the context."#
        .to_string()
}

fn default_out_of_scope_response() -> String {
    "I don't have information about that. You asked about \"{query}\", but I can only answer questions about the documents in my knowledge base. Try asking about the topics those documents cover.".to_string()
}

fn default_apology_response() -> String {
    "I'm sorry, but I encountered an error while processing your request. Please try again or rephrase your question.".to_string()
}

fn default_log_level() -> String {
    "info,rag_chat_pipeline=debug".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_log_directory() -> String {
    "logs".to_string()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_key: None,
            timeout_seconds: default_llm_timeout(),
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            base_url: default_index_base_url(),
            default_k: default_k(),
            max_k: default_max_k(),
            min_relevance: default_min_relevance(),
            timeout_seconds: default_retrieval_timeout(),
        }
    }
}

impl RetrievalConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            budget_chars: default_budget_chars(),
            min_fragment_chars: default_min_fragment_chars(),
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            capacity: default_memory_capacity(),
            history_turns: default_history_turns(),
            idle_ttl_seconds: default_idle_ttl(),
            max_conversations: default_max_conversations(),
        }
    }
}

impl MemoryConfig {
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_seconds)
    }
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            domain_vocabulary: default_domain_vocabulary(),
            min_confidence: default_min_confidence(),
            max_query_chars: default_max_query_chars(),
        }
    }
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            out_of_scope_response: default_out_of_scope_response(),
            apology_response: default_apology_response(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            directory: default_log_directory(),
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::load_from("config/settings")
    }

    /// Load from `path` (extension optional), then apply `APP__` overrides.
    /// Example: APP__LLM__BASE_URL=http://localhost:8080
    pub fn load_from(path: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let settings: Settings = config
            .try_deserialize()
            .context("Failed to deserialize settings")?;

        settings.validate()?;

        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.memory.capacity == 0 {
            anyhow::bail!("memory.capacity must be at least 1");
        }

        if self.memory.max_conversations == 0 {
            anyhow::bail!("memory.max_conversations must be at least 1");
        }

        if self.retrieval.max_k == 0 {
            anyhow::bail!("retrieval.max_k must be at least 1");
        }

        if self.retrieval.default_k > self.retrieval.max_k {
            anyhow::bail!(
                "retrieval.default_k ({}) exceeds retrieval.max_k ({})",
                self.retrieval.default_k,
                self.retrieval.max_k
            );
        }

        if !(0.0..=1.0).contains(&self.retrieval.min_relevance) {
            anyhow::bail!(
                "retrieval.min_relevance must be within [0, 1], got {}",
                self.retrieval.min_relevance
            );
        }

        if !(0.0..=1.0).contains(&self.analyzer.min_confidence) {
            anyhow::bail!(
                "analyzer.min_confidence must be within [0, 1], got {}",
                self.analyzer.min_confidence
            );
        }

        if self.context.budget_chars == 0 {
            anyhow::bail!("context.budget_chars must be at least 1");
        }

        if self.llm.max_attempts == 0 {
            anyhow::bail!("llm.max_attempts must be at least 1");
        }

        Ok(())
    }
}
