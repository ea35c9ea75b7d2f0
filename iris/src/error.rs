use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Server error: {0}")]
    Server(String),
}

/// Failure of a single backend invocation.
///
/// Cloneable so one outcome can be handed to every request waiting on the
/// same in-flight computation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Backend timed out after {0:?}")]
    Timeout(Duration),

    #[error("Backend returned an error ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("Backend process exited with {code:?}: {output}")]
    Exited { code: Option<i32>, output: String },

    #[error("Malformed backend response: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, Error>;
