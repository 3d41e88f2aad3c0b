//! Date-bounded warehouse reads.

use std::sync::Arc;

use tidemark_types::SharedState;

use super::Step;
use crate::config::types::SourceConfig;
use crate::errors::{PipelineError, Result};
use crate::warehouse::{SourceQuery, Warehouse};

/// Reads one warehouse table between the effective bounds into state.
pub struct SourceStep {
    config: SourceConfig,
    warehouse: Arc<dyn Warehouse>,
}

impl SourceStep {
    pub fn new(config: SourceConfig, warehouse: Arc<dyn Warehouse>) -> Self {
        Self { config, warehouse }
    }

    /// Step config wins over the reserved state keys.
    fn query(&self, state: &SharedState) -> Result<SourceQuery> {
        let min_date = self
            .config
            .min_effective_date
            .or_else(|| state.min_effective_date())
            .ok_or_else(|| {
                PipelineError::config(format!(
                    "source '{}' has no minimum effective date in config or state",
                    self.config.result_name
                ))
            })?;
        let max_date = self
            .config
            .max_effective_date
            .or_else(|| state.max_effective_date())
            .ok_or_else(|| {
                PipelineError::config(format!(
                    "source '{}' has no maximum effective date in config or state",
                    self.config.result_name
                ))
            })?;

        Ok(SourceQuery {
            schema: self.config.schema.clone(),
            table: self.config.table.clone(),
            columns: self.config.columns.clone(),
            date_column: self.config.date_column.clone(),
            min_date,
            max_date,
            filter: self.config.additional_filter.clone(),
        })
    }
}

impl Step for SourceStep {
    fn kind(&self) -> &'static str {
        "Source"
    }

    fn execute(&self, mut state: SharedState) -> Result<SharedState> {
        let query = self.query(&state)?;
        tracing::debug!(
            table = %format!("{}.{}", query.schema, query.table),
            min = %query.min_date,
            max = %query.max_date,
            "reading source"
        );
        let table = self.warehouse.fetch(&query)?;
        tracing::info!(result = %self.config.result_name, rows = table.len(), "source loaded");
        state.insert_table(self.config.result_name.clone(), table);
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use chrono::NaiveDate;
    use tidemark_types::{Row, Table};

    use crate::warehouse::WriteRequest;

    #[derive(Default)]
    struct RecordingWarehouse {
        seen: Mutex<Vec<SourceQuery>>,
    }

    impl Warehouse for RecordingWarehouse {
        fn fetch(&self, query: &SourceQuery) -> Result<Table> {
            self.seen.lock().unwrap().push(query.clone());
            let mut row = Row::new();
            row.set("id", 1_i64);
            row.set(query.date_column.clone(), query.min_date);
            Ok(Table::new(query.output_columns(), vec![row]))
        }

        fn write(&self, _request: &WriteRequest<'_>) -> Result<u64> {
            Ok(0)
        }
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    fn config() -> SourceConfig {
        serde_json::from_value(serde_json::json!({
            "resultName": "accounts",
            "schema": "raw",
            "table": "accounts",
            "columns": ["id"]
        }))
        .unwrap()
    }

    #[test]
    fn bounds_come_from_state_when_not_configured() {
        let wh = Arc::new(RecordingWarehouse::default());
        let step = SourceStep::new(config(), wh.clone());

        let state = step.execute(SharedState::for_effective_range(date(3), date(4))).unwrap();
        let table = state.table("accounts").unwrap();
        assert_eq!(table.columns(), ["id", "as_of"]);

        let seen = wh.seen.lock().unwrap();
        assert_eq!((seen[0].min_date, seen[0].max_date), (date(3), date(4)));
    }

    #[test]
    fn configured_bounds_override_state() {
        let wh = Arc::new(RecordingWarehouse::default());
        let mut cfg = config();
        cfg.min_effective_date = Some(date(1));
        let step = SourceStep::new(cfg, wh.clone());

        step.execute(SharedState::for_effective_range(date(3), date(4))).unwrap();
        let seen = wh.seen.lock().unwrap();
        assert_eq!((seen[0].min_date, seen[0].max_date), (date(1), date(4)));
    }

    #[test]
    fn missing_bound_is_configuration_error() {
        let step = SourceStep::new(config(), Arc::new(RecordingWarehouse::default()));
        let err = step.execute(SharedState::new()).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(msg) if msg.contains("minimum")));
    }
}
