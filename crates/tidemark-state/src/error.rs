//! Control store error types.

use tidemark_types::control::{RunId, RunStatus};
use tidemark_types::ParseEnumError;

/// Errors produced by [`ControlStore`](crate::ControlStore) operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Driver failure, tagged with the operation that hit it.
    #[error("{context}: {source}")]
    Backend {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// File-system I/O failure (e.g. creating the database directory).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal mutex was poisoned by a panicked thread.
    #[error("control store lock poisoned")]
    LockPoisoned,

    /// The run is not in a status from which `to` may be reached.
    #[error("run {run_id} cannot move from {from} to {to}")]
    InvalidTransition {
        run_id: RunId,
        from: RunStatus,
        to: RunStatus,
    },

    #[error("run {0} not found")]
    RunNotFound(RunId),

    /// A persisted row holds a value outside its domain.
    #[error("corrupt control row: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Wrap a driver error without extra context.
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::backend_context("control store", err)
    }

    /// Wrap a driver error, naming the operation that failed.
    pub fn backend_context<E>(context: &str, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            context: context.to_string(),
            source: Box::new(err),
        }
    }
}

impl From<ParseEnumError> for StoreError {
    fn from(err: ParseEnumError) -> Self {
        Self::Corrupt(err.to_string())
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, StoreError>;
