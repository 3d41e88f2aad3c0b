//! Pipeline error taxonomy.

use std::path::PathBuf;

use datafusion::error::DataFusionError;
use datafusion::parquet::errors::ParquetError;
use tidemark_state::StoreError;
use tidemark_types::TableError;

// ---------------------------------------------------------------------------
// PipelineError: everything a step, the runner or the orchestrator can raise
// ---------------------------------------------------------------------------

/// Categorized pipeline error.
///
/// Steps and the runner propagate these unchanged; the orchestrator is the
/// single place that catches them, persists their text and decides whether
/// the invocation continues.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Malformed definition, unknown step type, missing effective bound, ...
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Planning could not order the remaining jobs.
    #[error("dependency cycle among jobs: {}", .jobs.join(", "))]
    DependencyCycle { jobs: Vec<String> },

    /// A step referenced a table that is not in shared state.
    #[error("missing input: no table named '{0}' in shared state")]
    MissingInput(String),

    /// Warehouse connection or statement failure.
    #[error("external store error during {context}: {source}")]
    ExternalStore {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error(transparent)]
    Table(#[from] TableError),

    #[error("query failed: {0}")]
    Query(#[from] DataFusionError),

    #[error("i/o error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parquet error writing {}: {source}", .path.display())]
    Parquet {
        path: PathBuf,
        #[source]
        source: ParquetError,
    },

    #[error("extension module '{0}' not found")]
    ExtensionModuleNotFound(String),

    #[error("extension type '{type_name}' not found in module '{module}'")]
    ExtensionTypeNotFound { module: String, type_name: String },

    /// The extension ran but failed or broke the step contract.
    #[error("extension '{type_name}' failed: {message}")]
    Extension { type_name: String, message: String },

    /// Control store failure.
    #[error(transparent)]
    Control(#[from] StoreError),

    /// A job name given on the command line is not among the active jobs.
    #[error("job '{0}' is not an active registered job")]
    UnknownJob(String),
}

impl PipelineError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn external<E>(context: impl Into<String>, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::ExternalStore {
            context: context.into(),
            source: Box::new(err),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, PipelineError>;
