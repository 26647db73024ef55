pub mod settings;

pub use settings::{
    AnalyzerConfig, ContextConfig, LlmConfig, LoggingConfig, MemoryConfig, PromptsConfig,
    RetrievalConfig, Settings,
};
