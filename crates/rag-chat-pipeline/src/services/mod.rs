pub mod context_assembler;
pub mod conversation;
pub mod formatter;
pub mod generator;
pub mod llm_service;
pub mod query_analyzer;
pub mod retriever;
pub mod vector_index_client;

pub use context_assembler::{AssembledContext, ContextAssembler};
pub use conversation::ConversationManager;
pub use generator::{GenerationParams, LlmProvider, ResponseGenerator};
pub use llm_service::LlmService;
pub use query_analyzer::{QueryAnalysis, QueryAnalyzer, QueryCategory};
pub use retriever::{RetrievedDocument, Retriever, SearchHit, VectorIndex};
pub use vector_index_client::VectorIndexClient;
