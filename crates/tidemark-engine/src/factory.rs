//! Builds steps from their configuration documents.

use std::sync::Arc;

use crate::config::types::StepConfig;
use crate::errors::{PipelineError, Result};
use crate::paths::ProjectRoot;
use crate::steps::{
    ColumnarFileSinkStep, CsvSinkStep, ExtensionRegistry, ExtensionStep, QueryStep, SourceStep,
    Step, TableSinkStep,
};
use crate::warehouse::Warehouse;

/// Everything a step may need, resolved once at startup.
#[derive(Clone)]
pub struct StepFactory {
    warehouse: Arc<dyn Warehouse>,
    project_root: ProjectRoot,
    curated_schema: String,
    extensions: Arc<ExtensionRegistry>,
}

impl StepFactory {
    pub fn new(
        warehouse: Arc<dyn Warehouse>,
        project_root: ProjectRoot,
        curated_schema: impl Into<String>,
        extensions: Arc<ExtensionRegistry>,
    ) -> Self {
        Self {
            warehouse,
            project_root,
            curated_schema: curated_schema.into(),
            extensions,
        }
    }

    #[must_use]
    pub fn project_root(&self) -> &ProjectRoot {
        &self.project_root
    }

    /// Build one step from an already-decoded configuration.
    ///
    /// # Errors
    ///
    /// Returns extension resolution errors; every other kind builds
    /// infallibly.
    pub fn build_config(&self, config: StepConfig) -> Result<Box<dyn Step>> {
        Ok(match config {
            StepConfig::Source(cfg) => Box::new(SourceStep::new(cfg, Arc::clone(&self.warehouse))),
            StepConfig::Query(cfg) => Box::new(QueryStep::new(cfg)),
            StepConfig::TableSink(cfg) => Box::new(TableSinkStep::new(
                cfg,
                Arc::clone(&self.warehouse),
                self.curated_schema.clone(),
            )),
            StepConfig::CsvSink(cfg) => {
                let path = self.project_root.resolve(&cfg.output_file);
                Box::new(CsvSinkStep::new(cfg, path))
            }
            StepConfig::ColumnarFileSink(cfg) => {
                let directory = self.project_root.resolve(&cfg.output_directory);
                Box::new(ColumnarFileSinkStep::new(cfg, directory))
            }
            StepConfig::Extension(cfg) => Box::new(ExtensionStep::resolve(
                &cfg,
                &self.extensions,
                &self.project_root,
            )?),
        })
    }

    /// Build the step at `index` of a job from its raw document.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Configuration`] when `type` is missing or
    /// unknown or the document doesn't fit that step, naming the index.
    pub fn build(&self, index: usize, document: &serde_json::Value) -> Result<Box<dyn Step>> {
        let config = StepConfig::from_document(document).map_err(|e| match e {
            PipelineError::Configuration(msg) => {
                PipelineError::Configuration(format!("step {index}: {msg}"))
            }
            other => other,
        })?;
        self.build_config(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::warehouse::SqliteWarehouse;

    fn factory() -> StepFactory {
        StepFactory::new(
            Arc::new(SqliteWarehouse::new("/nonexistent/warehouse")),
            ProjectRoot::new("/srv/etl"),
            "curated",
            Arc::new(ExtensionRegistry::new()),
        )
    }

    #[test]
    fn builds_every_core_kind() {
        let f = factory();
        let docs = [
            json!({"type": "Source", "resultName": "a", "schema": "raw", "table": "t", "columns": ["x"]}),
            json!({"type": "Transformation", "resultName": "b", "sql": "select 1"}),
            json!({"type": "DataFrameWriter", "source": "b", "targetTable": "t", "writeMode": "Append"}),
            json!({"type": "CsvFileWriter", "source": "b", "outputFile": "out/b.csv", "writeMode": "Overwrite"}),
            json!({"type": "ParquetFileWriter", "source": "b", "outputDirectory": "out/b", "writeMode": "Overwrite"}),
        ];
        let kinds: Vec<&str> = docs
            .iter()
            .enumerate()
            .map(|(i, d)| f.build(i, d).unwrap().kind())
            .collect();
        assert_eq!(kinds, ["Source", "Query", "TableSink", "CsvSink", "ColumnarFileSink"]);
    }

    #[test]
    fn errors_name_the_step_index() {
        let err = factory().build(2, &json!({"resultName": "x"})).err().unwrap();
        assert_eq!(
            err.to_string(),
            "configuration error: step 2: step is missing the required 'type' field"
        );
    }

    #[test]
    fn unresolvable_extension_fails_at_build() {
        let err = factory()
            .build(0, &json!({"type": "External", "assemblyPath": "ext/none", "typeName": "T"}))
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::ExtensionModuleNotFound(_)));
    }
}
