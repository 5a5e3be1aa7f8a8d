use thiserror::Error;

#[derive(Debug, Error)]
pub enum GenError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Client error: {0}")]
    ClientError(String),
    #[error("HTTP request failed")]
    HttpError(#[source] reqwest::Error),
    #[error("Response error: {0}")]
    ResponseError(String),
    #[error("Gemini service error (HTTP {status}): {body}")]
    ServiceError { status: u16, body: String },
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Decode error: {0}")]
    DecodeError(String),
    #[error("Store error: {0}")]
    StoreError(String),
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl GenError {
    /// Whether the error was raised before any request left the process.
    pub fn is_validation(&self) -> bool {
        matches!(self, GenError::ValidationError(_))
    }
}

pub type Result<T> = std::result::Result<T, GenError>;
