use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// Caller contract violation (empty query). Never recorded in memory.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Formatting anomaly: {0}")]
    FormattingAnomaly(String),
}

impl PipelineError {
    /// Recoverable errors are absorbed into a `success: false` response;
    /// only invalid input crosses the pipeline boundary.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, PipelineError::InvalidInput(_))
    }

    /// Short machine-readable code, logged with every fallback.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::InvalidInput(_) => "INVALID_INPUT",
            PipelineError::RetrievalUnavailable(_) => "RETRIEVAL_UNAVAILABLE",
            PipelineError::Generation(_) => "GENERATION_ERROR",
            PipelineError::FormattingAnomaly(_) => "FORMATTING_ANOMALY",
        }
    }
}
