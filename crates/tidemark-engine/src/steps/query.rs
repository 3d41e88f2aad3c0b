//! DataFusion-powered SQL over shared-state tables.
//!
//! Each call:
//! 1. Registers every table in state (zero-row ones included) as a MemTable
//!    named after its state key
//! 2. Executes the configured SQL
//! 3. Stores the result under `resultName`

use std::sync::Arc;

use datafusion::datasource::MemTable;
use datafusion::prelude::*;
use tidemark_types::{SharedState, Table};

use super::Step;
use crate::arrow::{batches_to_table, table_to_batch};
use crate::config::types::QueryConfig;
use crate::errors::{PipelineError, Result};

/// Runs one SQL statement against the current state.
pub struct QueryStep {
    config: QueryConfig,
}

impl QueryStep {
    pub fn new(config: QueryConfig) -> Self {
        Self { config }
    }

    fn session(state: &SharedState) -> Result<SessionContext> {
        let session = SessionContext::new();
        for (name, table) in state.tables() {
            let batch = table_to_batch(table)?;
            let mem_table = MemTable::try_new(batch.schema(), vec![vec![batch]])?;
            session.register_table(name, Arc::new(mem_table))?;
        }
        Ok(session)
    }
}

async fn run_sql(session: &SessionContext, sql: &str) -> Result<Table> {
    let df = session.sql(sql).await?;
    let schema = df.schema().as_arrow().clone();
    let batches = df.collect().await?;
    Ok(batches_to_table(&schema, &batches))
}

impl Step for QueryStep {
    fn kind(&self) -> &'static str {
        "Query"
    }

    fn execute(&self, mut state: SharedState) -> Result<SharedState> {
        let sql = self.config.normalized_sql()?;
        let session = Self::session(&state)?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .map_err(|e| PipelineError::Query(e.into()))?;
        let table = runtime.block_on(run_sql(&session, sql))?;

        tracing::info!(result = %self.config.result_name, rows = table.len(), "query complete");
        state.insert_table(self.config.result_name.clone(), table);
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    use bigdecimal::BigDecimal;
    use tidemark_types::Value;

    fn step(sql: &str) -> QueryStep {
        QueryStep::new(QueryConfig {
            result_name: "result".into(),
            sql: sql.into(),
        })
    }

    fn trades() -> Table {
        Table::from_rows(
            ["desk", "amount"],
            vec![
                vec![Value::from("fx"), Value::Decimal(BigDecimal::from_str("1.50").unwrap())],
                vec![Value::from("fx"), Value::Decimal(BigDecimal::from_str("2.25").unwrap())],
                vec![Value::from("rates"), Value::Decimal(BigDecimal::from_str("4").unwrap())],
            ],
        )
        .unwrap()
    }

    #[test]
    fn aggregates_over_registered_tables() {
        let mut state = SharedState::new();
        state.insert_table("trades", trades());

        let state = step("SELECT desk, COUNT(*) AS n FROM trades GROUP BY desk ORDER BY desk")
            .execute(state)
            .unwrap();
        let result = state.table("result").unwrap();
        assert_eq!(result.columns(), ["desk", "n"]);
        assert_eq!(result.rows()[0].get("desk"), &Value::from("fx"));
        assert_eq!(result.rows()[0].get("n"), &Value::Int64(2));
        assert_eq!(result.rows()[1].get("n"), &Value::Int64(1));
        // Inputs stay in state.
        assert!(state.table("trades").is_some());
    }

    #[test]
    fn zero_row_tables_are_queryable() {
        let mut state = SharedState::new();
        state.insert_table("empty_input", Table::empty(["id", "name"]));

        let state = step("SELECT id, name FROM empty_input").execute(state).unwrap();
        let result = state.table("result").unwrap();
        assert!(result.is_empty());
        assert_eq!(result.columns(), ["id", "name"]);
    }

    #[test]
    fn joins_two_state_tables() {
        let mut state = SharedState::new();
        state.insert_table("trades", trades());
        state.insert_table(
            "desks",
            Table::from_rows(
                ["desk", "region"],
                vec![vec![Value::from("fx"), Value::from("emea")]],
            )
            .unwrap(),
        );

        let state = step(
            "SELECT t.desk, d.region FROM trades t JOIN desks d ON t.desk = d.desk",
        )
        .execute(state)
        .unwrap();
        assert_eq!(state.table("result").unwrap().len(), 2);
    }

    #[test]
    fn unknown_table_is_a_query_error() {
        let err = step("SELECT * FROM nowhere").execute(SharedState::new()).unwrap_err();
        assert!(matches!(err, PipelineError::Query(_)));
    }

    #[test]
    fn blank_sql_is_a_configuration_error() {
        let err = step("   ").execute(SharedState::new()).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }
}
