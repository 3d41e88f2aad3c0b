//! User-supplied steps.
//!
//! A module name is looked up first in the [`ExtensionRegistry`] built at
//! startup. Otherwise it names an executable that is spawned with the type
//! name as its only argument, receives `{"typeName", "state"}` as JSON on
//! stdin and must answer `{"state": ...}` or `{"error": "..."}` on stdout.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tidemark_types::{SharedState, Value};

use super::Step;
use crate::config::types::ExtensionConfig;
use crate::errors::{PipelineError, Result};
use crate::paths::ProjectRoot;

/// Builds a fresh step instance for one job run.
pub type StepConstructor = Arc<dyn Fn() -> Box<dyn Step> + Send + Sync>;

/// In-process extensions, keyed by module name then type name.
#[derive(Default, Clone)]
pub struct ExtensionRegistry {
    modules: HashMap<String, HashMap<String, StepConstructor>>,
}

impl ExtensionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, module: impl Into<String>, type_name: impl Into<String>, ctor: F)
    where
        F: Fn() -> Box<dyn Step> + Send + Sync + 'static,
    {
        self.modules
            .entry(module.into())
            .or_default()
            .insert(type_name.into(), Arc::new(ctor));
    }

    #[must_use]
    pub fn has_module(&self, module: &str) -> bool {
        self.modules.contains_key(module)
    }

    /// `None` when the module isn't registered at all.
    fn lookup(&self, module: &str, type_name: &str) -> Option<Result<Box<dyn Step>>> {
        let types = self.modules.get(module)?;
        Some(
            types
                .get(type_name)
                .map(|ctor| ctor())
                .ok_or_else(|| PipelineError::ExtensionTypeNotFound {
                    module: module.to_string(),
                    type_name: type_name.to_string(),
                }),
        )
    }
}

impl std::fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.modules.iter().map(|(m, types)| (m, types.keys().collect::<Vec<_>>())))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Subprocess wire format
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExtensionRequest<'a> {
    type_name: &'a str,
    state: &'a SharedState,
}

#[derive(Deserialize)]
struct ExtensionResponse {
    #[serde(default)]
    state: Option<SharedState>,
    #[serde(default)]
    error: Option<String>,
}

fn is_non_finite(value: &Value) -> bool {
    matches!(value, Value::Float64(f) if !f.is_finite())
}

/// Where the first NaN or infinite double sits. JSON has no encoding for
/// them, so they can't cross the subprocess boundary.
fn non_finite_location(state: &SharedState) -> Option<String> {
    let scalar = state
        .keys()
        .find(|key| state.scalar(key).is_some_and(is_non_finite))
        .map(|key| format!("scalar '{key}'"));
    scalar.or_else(|| {
        state.tables().find_map(|(name, table)| {
            table.rows().iter().enumerate().find_map(|(idx, row)| {
                row.iter()
                    .find(|(_, value)| is_non_finite(value))
                    .map(|(column, _)| format!("table '{name}' row {idx} column '{column}'"))
            })
        })
    })
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

enum Target {
    InProcess(Box<dyn Step>),
    Process(PathBuf),
}

/// A resolved extension, ready to execute.
pub struct ExtensionStep {
    type_name: String,
    target: Target,
}

impl ExtensionStep {
    /// Resolve `module`/`typeName` against the registry, then the filesystem.
    ///
    /// # Errors
    ///
    /// [`PipelineError::ExtensionTypeNotFound`] for an unknown type in a
    /// registered module; [`PipelineError::ExtensionModuleNotFound`] when the
    /// module is neither registered nor an existing file.
    pub fn resolve(
        config: &ExtensionConfig,
        registry: &ExtensionRegistry,
        root: &ProjectRoot,
    ) -> Result<Self> {
        if let Some(step) = registry.lookup(&config.module, &config.type_name) {
            return Ok(Self {
                type_name: config.type_name.clone(),
                target: Target::InProcess(step?),
            });
        }

        let program = root.resolve(Path::new(&config.module));
        if !program.is_file() {
            return Err(PipelineError::ExtensionModuleNotFound(config.module.clone()));
        }
        Ok(Self {
            type_name: config.type_name.clone(),
            target: Target::Process(program),
        })
    }

    fn failure(&self, message: impl Into<String>) -> PipelineError {
        PipelineError::Extension {
            type_name: self.type_name.clone(),
            message: message.into(),
        }
    }

    fn run_process(&self, program: &Path, state: &SharedState) -> Result<SharedState> {
        if let Some(location) = non_finite_location(state) {
            return Err(self.failure(format!("cannot send non-finite double in {location}")));
        }
        let request = serde_json::to_vec(&ExtensionRequest {
            type_name: &self.type_name,
            state,
        })
        .map_err(|e| self.failure(format!("cannot encode state: {e}")))?;

        let mut child = Command::new(program)
            .arg(&self.type_name)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| PipelineError::io(program, e))?;

        // Feed stdin from a separate thread so a chatty child can't deadlock
        // against a full stdout pipe.
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| self.failure("child stdin unavailable"))?;
        let feeder = std::thread::spawn(move || stdin.write_all(&request));

        let output = child
            .wait_with_output()
            .map_err(|e| PipelineError::io(program, e))?;
        let fed = feeder.join();

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(self.failure(format!("exited with {}: {}", output.status, stderr.trim())));
        }
        match fed {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(PipelineError::io(program, e)),
            Err(_) => return Err(self.failure("stdin writer panicked")),
        }

        let response: ExtensionResponse = serde_json::from_slice(&output.stdout)
            .map_err(|e| self.failure(format!("malformed response: {e}")))?;
        match (response.state, response.error) {
            (_, Some(error)) => Err(self.failure(error)),
            (Some(state), None) => Ok(state),
            (None, None) => Err(self.failure("response carried neither state nor error")),
        }
    }
}

impl Step for ExtensionStep {
    fn kind(&self) -> &'static str {
        "Extension"
    }

    fn execute(&self, state: SharedState) -> Result<SharedState> {
        tracing::debug!(type_name = %self.type_name, "running extension");
        match &self.target {
            Target::InProcess(step) => step.execute(state),
            Target::Process(program) => self.run_process(program, &state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidemark_types::Table;

    struct AddFlag;

    impl Step for AddFlag {
        fn kind(&self) -> &'static str {
            "AddFlag"
        }

        fn execute(&self, mut state: SharedState) -> Result<SharedState> {
            state.insert_scalar("flag", true);
            Ok(state)
        }
    }

    fn config(module: &str, type_name: &str) -> ExtensionConfig {
        ExtensionConfig {
            module: module.into(),
            type_name: type_name.into(),
        }
    }

    fn registry() -> ExtensionRegistry {
        let mut registry = ExtensionRegistry::new();
        registry.register("builtin", "AddFlag", || Box::new(AddFlag) as Box<dyn Step>);
        registry
    }

    #[test]
    fn registered_type_runs_in_process() {
        let root = ProjectRoot::new("/nonexistent");
        let step =
            ExtensionStep::resolve(&config("builtin", "AddFlag"), &registry(), &root).unwrap();
        let state = step.execute(SharedState::new()).unwrap();
        assert_eq!(state.scalar("flag"), Some(&Value::Boolean(true)));
    }

    #[test]
    fn unknown_type_and_module_are_distinct_errors() {
        let root = ProjectRoot::new("/nonexistent");
        let err = ExtensionStep::resolve(&config("builtin", "Nope"), &registry(), &root)
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::ExtensionTypeNotFound { .. }));

        let err = ExtensionStep::resolve(&config("missing.bin", "X"), &registry(), &root)
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::ExtensionModuleNotFound(m) if m == "missing.bin"));
    }

    #[cfg(unix)]
    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn subprocess_round_trips_state() {
        let dir = tempfile::tempdir().unwrap();
        // Echoing the request back is a valid response: `typeName` is ignored.
        script(dir.path(), "identity.sh", "exec cat");
        let root = ProjectRoot::new(dir.path());
        let step = ExtensionStep::resolve(&config("identity.sh", "Identity"), &registry(), &root)
            .unwrap();

        let mut state = SharedState::new();
        state.insert_table(
            "t",
            Table::from_rows(["a"], vec![vec![Value::Int64(7)]]).unwrap(),
        );
        let out = step.execute(state).unwrap();
        assert_eq!(out.table("t").unwrap().rows()[0].get("a"), &Value::Int64(7));
    }

    #[cfg(unix)]
    #[test]
    fn subprocess_rejects_non_finite_doubles() {
        let dir = tempfile::tempdir().unwrap();
        script(dir.path(), "identity.sh", "exec cat");
        let root = ProjectRoot::new(dir.path());
        let step = ExtensionStep::resolve(&config("identity.sh", "Identity"), &registry(), &root)
            .unwrap();

        let mut state = SharedState::new();
        state.insert_table(
            "prices",
            Table::from_rows(
                ["id", "px"],
                vec![
                    vec![Value::Int64(1), Value::Float64(1.5)],
                    vec![Value::Int64(2), Value::Float64(f64::NAN)],
                ],
            )
            .unwrap(),
        );
        let err = step.execute(state).unwrap_err();
        assert!(matches!(err, PipelineError::Extension { .. }));
        assert!(err.to_string().contains("table 'prices' row 1 column 'px'"), "{err}");

        let mut state = SharedState::new();
        state.insert_scalar("ratio", f64::INFINITY);
        let err = step.execute(state).unwrap_err();
        assert!(err.to_string().contains("scalar 'ratio'"), "{err}");
    }

    #[cfg(unix)]
    #[test]
    fn subprocess_error_response_and_exit_status() {
        let dir = tempfile::tempdir().unwrap();
        script(dir.path(), "fails.sh", "cat >/dev/null\necho '{\"error\":\"no rows\"}'");
        script(dir.path(), "crashes.sh", "cat >/dev/null\necho boom >&2\nexit 3");
        let root = ProjectRoot::new(dir.path());

        let step = ExtensionStep::resolve(&config("fails.sh", "T"), &registry(), &root).unwrap();
        let err = step.execute(SharedState::new()).unwrap_err();
        assert_eq!(err.to_string(), "extension 'T' failed: no rows");

        let step = ExtensionStep::resolve(&config("crashes.sh", "T"), &registry(), &root).unwrap();
        let err = step.execute(SharedState::new()).unwrap_err().to_string();
        assert!(err.contains("boom"), "got: {err}");
    }
}
