//! Semantic validation for parsed job definitions.

use anyhow::{bail, Result};

use crate::config::types::{JobDefinition, StepConfig};

fn validate_step(index: usize, config: &StepConfig, errors: &mut Vec<String>) {
    let context = format!("Step {index} ({})", config.kind());
    match config {
        StepConfig::Source(source) => {
            if source.result_name.trim().is_empty() {
                errors.push(format!("{context}: resultName must not be empty"));
            }
            if source.table.trim().is_empty() {
                errors.push(format!("{context}: table must not be empty"));
            }
            if source.columns.is_empty() {
                errors.push(format!("{context}: at least one column is required"));
            }
            if let (Some(min), Some(max)) = (source.min_effective_date, source.max_effective_date) {
                if min > max {
                    errors.push(format!(
                        "{context}: minEffectiveDate {min} is after maxEffectiveDate {max}"
                    ));
                }
            }
        }
        StepConfig::Query(query) => {
            if query.result_name.trim().is_empty() {
                errors.push(format!("{context}: resultName must not be empty"));
            }
            if query.normalized_sql().is_err() {
                errors.push(format!("{context}: sql must not be empty"));
            }
        }
        StepConfig::TableSink(sink) => {
            if sink.target_table.trim().is_empty() {
                errors.push(format!("{context}: targetTable must not be empty"));
            }
        }
        StepConfig::CsvSink(sink) => {
            if sink.output_file.as_os_str().is_empty() {
                errors.push(format!("{context}: outputFile must not be empty"));
            }
        }
        StepConfig::ColumnarFileSink(sink) => {
            if sink.output_directory.as_os_str().is_empty() {
                errors.push(format!("{context}: outputDirectory must not be empty"));
            }
        }
        StepConfig::Extension(ext) => {
            if ext.module.trim().is_empty() {
                errors.push(format!("{context}: module must not be empty"));
            }
            if ext.type_name.trim().is_empty() {
                errors.push(format!("{context}: typeName must not be empty"));
            }
        }
    }
}

/// Validate a parsed job definition.
///
/// # Errors
///
/// Returns an error listing every validation failure found.
pub fn validate_job_definition(definition: &JobDefinition) -> Result<()> {
    let mut errors = Vec::new();

    if definition.name.trim().is_empty() {
        errors.push("Job name must not be empty".to_string());
    }

    if definition.steps.is_empty() {
        errors.push("Job must define at least one step".to_string());
    }

    for (i, document) in definition.steps.iter().enumerate() {
        match StepConfig::from_document(document) {
            Ok(config) => validate_step(i, &config, &mut errors),
            Err(e) => errors.push(format!("Step {i}: {e}")),
        }
    }

    if !errors.is_empty() {
        bail!(
            "Job definition validation failed:\n  - {}",
            errors.join("\n  - ")
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn definition(steps: Vec<serde_json::Value>) -> JobDefinition {
        JobDefinition {
            name: "daily_balances".into(),
            steps,
            first_effective_date: None,
        }
    }

    #[test]
    fn test_valid_definition() {
        let def = definition(vec![
            json!({"type": "Source", "resultName": "b", "schema": "raw", "table": "balances", "columns": ["amount"]}),
            json!({"type": "Query", "resultName": "s", "sql": "select sum(amount) from b"}),
            json!({"type": "TableSink", "source": "s", "targetTable": "balance_totals", "writeMode": "Overwrite"}),
        ]);
        assert!(validate_job_definition(&def).is_ok());
    }

    #[test]
    fn test_empty_steps_rejected() {
        let err = validate_job_definition(&definition(vec![])).unwrap_err().to_string();
        assert!(err.contains("at least one step"));
    }

    #[test]
    fn test_all_errors_reported() {
        let mut def = definition(vec![
            json!({"type": "Source", "resultName": "b", "schema": "raw", "table": "t", "columns": []}),
            json!({"type": "Bogus"}),
            json!({"type": "Query", "resultName": "q", "sql": "   "}),
        ]);
        def.name = " ".into();
        let err = validate_job_definition(&def).unwrap_err().to_string();
        assert!(err.contains("Job name must not be empty"));
        assert!(err.contains("Step 0 (Source): at least one column"));
        assert!(err.contains("Step 1: configuration error: unknown step type 'Bogus'"));
        assert!(err.contains("Step 2 (Query): sql must not be empty"));
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let def = definition(vec![json!({
            "type": "Source", "resultName": "b", "schema": "raw", "table": "t",
            "columns": ["x"], "minEffectiveDate": "2024-02-01", "maxEffectiveDate": "2024-01-01"
        })]);
        let err = validate_job_definition(&def).unwrap_err().to_string();
        assert!(err.contains("is after maxEffectiveDate"));
    }
}
