//! Pipeline steps.
//!
//! Every step consumes the shared state and returns the next one. Steps are
//! built from their configuration by [`StepFactory`](crate::factory::StepFactory)
//! and run in definition order by the [`JobRunner`](crate::runner::JobRunner).

pub mod csv_sink;
pub mod extension;
pub mod parquet_sink;
pub mod query;
pub mod source;
pub mod table_sink;

use tidemark_types::{SharedState, Table};

use crate::errors::{PipelineError, Result};

pub use csv_sink::CsvSinkStep;
pub use extension::{ExtensionRegistry, ExtensionStep};
pub use parquet_sink::ColumnarFileSinkStep;
pub use query::QueryStep;
pub use source::SourceStep;
pub use table_sink::TableSinkStep;

/// One unit of work in a job.
pub trait Step: Send + Sync {
    /// Short label used in logs.
    fn kind(&self) -> &'static str;

    /// Transform the shared state.
    ///
    /// # Errors
    ///
    /// Any [`PipelineError`]; the runner stops at the first one.
    fn execute(&self, state: SharedState) -> Result<SharedState>;
}

/// Table named `name`, or [`PipelineError::MissingInput`].
pub(crate) fn input_table<'a>(state: &'a SharedState, name: &str) -> Result<&'a Table> {
    state
        .table(name)
        .ok_or_else(|| PipelineError::MissingInput(name.to_string()))
}
