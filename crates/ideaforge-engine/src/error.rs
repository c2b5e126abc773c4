use ideaforge_contracts::views::DataUrlError;

/// Failures of the external generation service, as seen by callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    /// The service signalled a transient overload (HTTP 503 / `UNAVAILABLE`).
    #[error("the model is overloaded: {0}")]
    Overloaded(String),
    #[error(
        "the model is temporarily unavailable after {attempts} attempts; please try again later"
    )]
    ServiceUnavailable { attempts: usize, last: String },
    #[error("invalid response from the model: {0}")]
    InvalidResponse(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("no API key configured; set GEMINI_API_KEY, GOOGLE_API_KEY or API_KEY")]
    MissingApiKey,
}

impl GenerationError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GenerationError::Overloaded(_))
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        GenerationError::InvalidResponse(message.into())
    }
}

impl From<DataUrlError> for GenerationError {
    fn from(err: DataUrlError) -> Self {
        GenerationError::InvalidInput(err.to_string())
    }
}
