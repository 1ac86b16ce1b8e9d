//! Core error types and utilities

use thiserror::Error;

/// Core-specific error types
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Initialization error: {0}")]
    InitializationError(String),

    #[error("Process spawn error: {0}")]
    ProcessSpawn(String),

    #[error("Process signal error: {0}")]
    ProcessSignal(String),

    #[error("Allocation error: {0}")]
    Allocation(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Generic error: {0}")]
    Other(String),
}

impl CoreError {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::ConfigurationError(_) => "CORE001",
            CoreError::ValidationError(_) => "CORE002",
            CoreError::InitializationError(_) => "CORE003",
            CoreError::ProcessSpawn(_) => "CORE004",
            CoreError::ProcessSignal(_) => "CORE006",
            CoreError::Allocation(_) => "CORE007",
            CoreError::IoError(_) => "CORE008",
            CoreError::SerializationError(_) => "CORE009",
            CoreError::Other(_) => "CORE999",
        }
    }

    /// Errno value recorded as a sticky error code for this error
    pub fn errno(&self) -> i32 {
        match self {
            CoreError::IoError(e) => e.raw_os_error().unwrap_or(libc::EIO),
            CoreError::Allocation(_) => libc::ENOMEM,
            CoreError::ProcessSignal(_) => libc::ESRCH,
            CoreError::ProcessSpawn(_) => libc::EBUSY,
            CoreError::ConfigurationError(_)
            | CoreError::ValidationError(_)
            | CoreError::SerializationError(_) => libc::EINVAL,
            CoreError::InitializationError(_) | CoreError::Other(_) => libc::EIO,
        }
    }
}

/// Core-specific result type
pub type Result<T> = std::result::Result<T, CoreError>;

// Convenience implementations
impl From<&str> for CoreError {
    fn from(s: &str) -> Self {
        CoreError::Other(s.to_string())
    }
}

impl From<String> for CoreError {
    fn from(s: String) -> Self {
        CoreError::Other(s)
    }
}

impl From<std::collections::TryReserveError> for CoreError {
    fn from(e: std::collections::TryReserveError) -> Self {
        CoreError::Allocation(e.to_string())
    }
}
