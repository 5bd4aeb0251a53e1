use thiserror::Error;

/// The closed error taxonomy the engine distinguishes. Every fallible
/// operation on the hot path returns one of these rather than an opaque
/// `anyhow::Error`, so the RT loop and the Engine can match on `kind()` to
/// decide whether to continue, abort the block, or exit.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineStatus {
    #[error("{0}")]
    Error(String),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("operation timed out")]
    Timeout,
    #[error("os error: {0}")]
    OsError(String),
}

impl EngineStatus {
    pub fn error(message: impl Into<String>) -> Self {
        EngineStatus::Error(message.into())
    }

    pub fn from_errno(errno: i32) -> Self {
        EngineStatus::OsError(format!("errno {errno}"))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineStatus::ConnectionClosed)
    }
}

pub type EngineResult<T> = Result<T, EngineStatus>;
