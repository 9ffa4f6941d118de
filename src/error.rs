//! Error types for runbox

use thiserror::Error;

/// Result type alias using runbox's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for runbox
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (bad strategy/sharing combination, bad mounts, ...)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unknown or unsupported language
    #[error("Language error: {0}")]
    Language(String),

    /// Docker/container error
    #[error("Container error: {0}")]
    Container(String),

    /// Session lookup or bookkeeping error
    #[error("Session error: {0}")]
    Session(String),

    /// Warm pool error (exhaustion, cleanup failure)
    #[error("Pool error: {0}")]
    Pool(String),

    /// Host workspace error
    #[error("Workspace error: {0}")]
    Workspace(String),

    /// Execution exceeded its timeout
    #[error("Timeout: {0}")]
    Timeout(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Check if error is a client error (caller's fault)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::Language(_) | Error::InvalidInput(_) | Error::NotFound(_)
        )
    }
}

impl From<bollard::errors::Error> for Error {
    fn from(err: bollard::errors::Error) -> Self {
        Error::Container(err.to_string())
    }
}

impl From<base64::DecodeError> for Error {
    fn from(err: base64::DecodeError) -> Self {
        Error::InvalidInput(format!("invalid base64 payload: {}", err))
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(err: zip::result::ZipError) -> Self {
        Error::Workspace(format!("zip archive error: {}", err))
    }
}

impl From<walkdir::Error> for Error {
    fn from(err: walkdir::Error) -> Self {
        Error::Workspace(format!("workspace walk error: {}", err))
    }
}
