use thiserror::Error;

/// Unified error type for every engine component.
///
/// Variant names mirror the error-kind table the routing and risk
/// components were designed against; callers match on variants rather than
/// string contents.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("active position already exists for this key")]
    DuplicatePosition,

    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("exchange not configured: {0}")]
    ExchangeConfig(String),

    #[error("exchange API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("connection error: {0}")]
    Connection(String),

    #[error("operation '{operation}' timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("serialization/transaction conflict: {0}")]
    Serialization(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    pub fn user_not_found(id: impl std::fmt::Display) -> Self {
        EngineError::UserNotFound(id.to_string())
    }

    pub fn exchange_config(msg: impl Into<String>) -> Self {
        EngineError::ExchangeConfig(msg.into())
    }

    pub fn api(status: u16, message: impl Into<String>) -> Self {
        EngineError::Api { status, message: message.into() }
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        EngineError::Connection(msg.into())
    }

    pub fn timeout(operation: impl Into<String>, seconds: u64) -> Self {
        EngineError::Timeout { operation: operation.into(), seconds }
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        EngineError::Serialization(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        EngineError::NotFound(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        EngineError::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        EngineError::Internal(msg.into())
    }

    /// True for failures where no local state may have changed, meaning the
    /// caller can safely retry without risking duplicate side effects.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Connection(_) | EngineError::Timeout { .. } | EngineError::Serialization(_)
        )
    }
}

impl From<redis::RedisError> for EngineError {
    fn from(e: redis::RedisError) -> Self {
        EngineError::Connection(e.to_string())
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            EngineError::Timeout { operation: "http".into(), seconds: 0 }
        } else {
            EngineError::Connection(e.to_string())
        }
    }
}

impl From<prometheus::Error> for EngineError {
    fn from(e: prometheus::Error) -> Self {
        EngineError::Config(format!("metrics registration failed: {e}"))
    }
}
