//! Warehouse table output.

use std::sync::Arc;

use tidemark_types::SharedState;

use super::{input_table, Step};
use crate::config::types::TableSinkConfig;
use crate::errors::Result;
use crate::warehouse::{Warehouse, WriteRequest};

/// Persists a state table into the warehouse.
pub struct TableSinkStep {
    config: TableSinkConfig,
    warehouse: Arc<dyn Warehouse>,
    default_schema: String,
}

impl TableSinkStep {
    pub fn new(
        config: TableSinkConfig,
        warehouse: Arc<dyn Warehouse>,
        default_schema: impl Into<String>,
    ) -> Self {
        Self {
            config,
            warehouse,
            default_schema: default_schema.into(),
        }
    }

    fn schema(&self) -> &str {
        self.config
            .target_schema
            .as_deref()
            .unwrap_or(&self.default_schema)
    }
}

impl Step for TableSinkStep {
    fn kind(&self) -> &'static str {
        "TableSink"
    }

    fn execute(&self, state: SharedState) -> Result<SharedState> {
        let table = input_table(&state, &self.config.source)?;
        let written = self.warehouse.write(&WriteRequest {
            schema: self.schema(),
            table: &self.config.target_table,
            data: table,
            mode: self.config.write_mode,
        })?;
        tracing::info!(
            source = %self.config.source,
            target = %format!("{}.{}", self.schema(), self.config.target_table),
            rows = written,
            "table sink complete"
        );
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidemark_types::{Row, Table, Value};

    use crate::config::types::WriteMode;
    use crate::errors::PipelineError;
    use crate::warehouse::{SourceQuery, SqliteWarehouse};

    fn config(target_schema: Option<&str>, mode: WriteMode) -> TableSinkConfig {
        TableSinkConfig {
            source: "totals".into(),
            target_table: "desk_totals".into(),
            write_mode: mode,
            target_schema: target_schema.map(str::to_string),
        }
    }

    fn state() -> SharedState {
        let mut row = Row::new();
        row.set("desk", "fx");
        row.set("as_of", "2024-07-01");
        row.set("total", 3.5);
        let mut state = SharedState::new();
        state.insert_table("totals", Table::new(["desk", "as_of", "total"], vec![row]));
        state
    }

    fn read(wh: &SqliteWarehouse, schema: &str) -> Table {
        wh.fetch(&SourceQuery {
            schema: schema.into(),
            table: "desk_totals".into(),
            columns: vec!["desk".into(), "total".into()],
            date_column: "as_of".into(),
            min_date: chrono::NaiveDate::from_ymd_opt(2024, 7, 1).unwrap(),
            max_date: chrono::NaiveDate::from_ymd_opt(2024, 7, 1).unwrap(),
            filter: None,
        })
        .unwrap()
    }

    #[test]
    fn writes_to_default_schema_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let wh = Arc::new(SqliteWarehouse::new(dir.path()));
        let step = TableSinkStep::new(config(None, WriteMode::Overwrite), wh.clone(), "curated");

        let state = step.execute(state()).unwrap();
        step.execute(state).unwrap();

        let table = read(&wh, "curated");
        assert_eq!(table.len(), 1);
        assert_eq!(table.rows()[0].get("total"), &Value::Float64(3.5));
    }

    #[test]
    fn append_keeps_existing_rows_in_target_schema() {
        let dir = tempfile::tempdir().unwrap();
        let wh = Arc::new(SqliteWarehouse::new(dir.path()));
        let step =
            TableSinkStep::new(config(Some("marts"), WriteMode::Append), wh.clone(), "curated");

        let state = step.execute(state()).unwrap();
        step.execute(state).unwrap();

        assert_eq!(read(&wh, "marts").len(), 2);
        assert!(!wh.schema_path("curated").exists());
    }

    #[test]
    fn missing_source_table() {
        let dir = tempfile::tempdir().unwrap();
        let step = TableSinkStep::new(
            config(None, WriteMode::Overwrite),
            Arc::new(SqliteWarehouse::new(dir.path())),
            "curated",
        );
        let err = step.execute(SharedState::new()).unwrap_err();
        assert!(matches!(err, PipelineError::MissingInput(name) if name == "totals"));
    }
}
