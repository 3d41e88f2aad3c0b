//! Sequential execution of one job definition.

use std::path::Path;
use std::time::Instant;

use tidemark_types::control::JobRegistration;
use tidemark_types::SharedState;

use crate::config::parser;
use crate::config::types::JobDefinition;
use crate::errors::{PipelineError, Result};
use crate::factory::StepFactory;
use crate::orchestrator::JobLauncher;
use crate::steps::Step;

/// Builds a job's steps and threads shared state through them in order.
#[derive(Clone)]
pub struct JobRunner {
    factory: StepFactory,
}

impl JobRunner {
    #[must_use]
    pub fn new(factory: StepFactory) -> Self {
        Self { factory }
    }

    /// Parse a definition file, resolving relative paths against the project root.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Configuration`] when the file is unreadable
    /// or malformed.
    pub fn load(&self, path: &Path) -> Result<JobDefinition> {
        let resolved = self.factory.project_root().resolve(path);
        parser::parse_job_definition(&resolved).map_err(|e| PipelineError::config(format!("{e:#}")))
    }

    /// Load and run a definition file.
    ///
    /// # Errors
    ///
    /// Any load, build or step error.
    pub fn run_file(&self, path: &Path, initial: Option<SharedState>) -> Result<SharedState> {
        let definition = self.load(path)?;
        self.run(&definition, initial)
    }

    /// Build every step, then execute them in definition order.
    ///
    /// Nothing runs unless the whole job builds.
    ///
    /// # Errors
    ///
    /// The first build or step error; later steps don't run.
    pub fn run(
        &self,
        definition: &JobDefinition,
        initial: Option<SharedState>,
    ) -> Result<SharedState> {
        let steps: Vec<Box<dyn Step>> = definition
            .steps
            .iter()
            .enumerate()
            .map(|(i, doc)| self.factory.build(i, doc))
            .collect::<Result<_>>()?;

        tracing::info!(job = %definition.name, steps = steps.len(), "job starting");
        let job_start = Instant::now();
        let mut state = initial.unwrap_or_default();

        for (index, step) in steps.iter().enumerate() {
            let step_start = Instant::now();
            tracing::debug!(
                job = %definition.name,
                step = index,
                kind = step.kind(),
                "step starting"
            );
            state = step.execute(state)?;
            tracing::info!(
                job = %definition.name,
                step = index,
                kind = step.kind(),
                elapsed_ms = step_start.elapsed().as_millis(),
                "step complete"
            );
        }

        tracing::info!(
            job = %definition.name,
            rows = state.total_rows(),
            elapsed_ms = job_start.elapsed().as_millis(),
            "job finished"
        );
        Ok(state)
    }
}

impl JobLauncher for JobRunner {
    fn load_definition(&self, job: &JobRegistration) -> Result<JobDefinition> {
        self.load(Path::new(&job.definition_path))
    }

    fn launch(&self, definition: &JobDefinition, state: SharedState) -> Result<SharedState> {
        self.run(definition, Some(state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;
    use tidemark_types::{Table, Value};

    use crate::paths::ProjectRoot;
    use crate::steps::ExtensionRegistry;
    use crate::warehouse::SqliteWarehouse;

    fn runner(root: &Path) -> JobRunner {
        JobRunner::new(StepFactory::new(
            Arc::new(SqliteWarehouse::new(root.join("warehouse"))),
            ProjectRoot::new(root),
            "curated",
            Arc::new(ExtensionRegistry::new()),
        ))
    }

    #[test]
    fn threads_state_through_steps_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let definition = JobDefinition {
            name: "chain".into(),
            steps: vec![
                json!({"type": "Query", "resultName": "doubled", "sql": "SELECT n * 2 AS n FROM seed"}),
                json!({"type": "Query", "resultName": "total", "sql": "SELECT SUM(n) AS total FROM doubled"}),
            ],
            first_effective_date: None,
        };
        let mut initial = SharedState::new();
        initial.insert_table(
            "seed",
            Table::from_rows(["n"], vec![vec![Value::Int64(1)], vec![Value::Int64(2)]]).unwrap(),
        );

        let state = runner(dir.path()).run(&definition, Some(initial)).unwrap();
        assert_eq!(state.table("total").unwrap().rows()[0].get("total"), &Value::Int64(6));
    }

    #[test]
    fn build_failure_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.csv");
        let definition = JobDefinition {
            name: "broken".into(),
            steps: vec![
                json!({"type": "CsvSink", "source": "seed", "outputFile": "out.csv", "writeMode": "Overwrite"}),
                json!({"type": "Mystery"}),
            ],
            first_effective_date: None,
        };
        let err = runner(dir.path()).run(&definition, None).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
        assert!(!out.exists());
    }

    #[test]
    fn stops_at_first_failing_step() {
        let dir = tempfile::tempdir().unwrap();
        let definition = JobDefinition {
            name: "missing".into(),
            steps: vec![
                json!({"type": "TableSink", "source": "absent", "targetTable": "t", "writeMode": "Append"}),
                json!({"type": "CsvSink", "source": "absent", "outputFile": "never.csv", "writeMode": "Overwrite"}),
            ],
            first_effective_date: None,
        };
        let err = runner(dir.path()).run(&definition, None).unwrap_err();
        assert!(matches!(err, PipelineError::MissingInput(_)));
        assert!(!dir.path().join("never.csv").exists());
    }

    #[test]
    fn run_file_reports_unreadable_definition() {
        let dir = tempfile::tempdir().unwrap();
        let err = runner(dir.path())
            .run_file(Path::new("jobs/nope.json"), None)
            .unwrap_err();
        assert!(err.to_string().contains("Failed to read job definition"));
    }
}
