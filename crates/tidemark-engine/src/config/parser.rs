//! Job definition and settings parsing with environment variable substitution.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;

use crate::config::settings::EngineSettings;
use crate::config::types::JobDefinition;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

/// Substitute `${VAR_NAME}` patterns with environment variable values.
///
/// # Errors
///
/// Returns an error naming every referenced variable that is not set.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let mut missing = Vec::new();

    let result = ENV_VAR_RE.replace_all(input, |cap: &regex::Captures<'_>| {
        let var_name = &cap[1];
        std::env::var(var_name).unwrap_or_else(|_| {
            missing.push(var_name.to_string());
            String::new()
        })
    });

    if !missing.is_empty() {
        missing.dedup();
        anyhow::bail!("Missing environment variable(s): {}", missing.join(", "));
    }

    Ok(result.into_owned())
}

/// Parse a job definition document (after env var substitution).
///
/// YAML is a superset of JSON, so both forms go through the YAML parser.
///
/// # Errors
///
/// Returns an error if substitution fails or the document is invalid.
pub fn parse_job_definition_str(input: &str) -> Result<JobDefinition> {
    let substituted = substitute_env_vars(input)?;
    let definition: JobDefinition =
        serde_yaml::from_str(&substituted).context("Failed to parse job definition")?;
    Ok(definition)
}

/// Parse a job definition file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the document is invalid.
pub fn parse_job_definition(path: &Path) -> Result<JobDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read job definition: {}", path.display()))?;
    parse_job_definition_str(&content)
        .with_context(|| format!("Invalid job definition: {}", path.display()))
}

/// Parse engine settings YAML (after env var substitution).
///
/// # Errors
///
/// Returns an error if substitution fails or the YAML is invalid.
pub fn parse_settings_str(yaml_str: &str) -> Result<EngineSettings> {
    let substituted = substitute_env_vars(yaml_str)?;
    let settings: EngineSettings =
        serde_yaml::from_str(&substituted).context("Failed to parse settings YAML")?;
    Ok(settings)
}

/// Parse an engine settings file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the YAML is invalid.
pub fn parse_settings(path: &Path) -> Result<EngineSettings> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
    parse_settings_str(&content)
}
