pub mod check;
pub mod run;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tidemark_engine::config::parser;
use tidemark_engine::config::settings::{ControlSettings, EngineSettings, WarehouseSettings};
use tidemark_engine::steps::ExtensionRegistry;
use tidemark_engine::warehouse::{PostgresWarehouse, SqliteWarehouse, Warehouse};
use tidemark_engine::{ExecutorService, JobRunner, ProjectRoot, StepFactory};
use tidemark_state::{ControlStore, PostgresControlStore, SqliteControlStore};

/// Settings file directory, or the working directory for a bare file name.
fn config_dir(config_path: &Path) -> &Path {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Explicit `projectRoot` (relative to the settings file), else discovered
/// upwards from the settings file.
fn project_root(settings: &EngineSettings, config_path: &Path) -> ProjectRoot {
    let base = config_dir(config_path);
    match &settings.project_root {
        Some(root) => ProjectRoot::new(base.join(root)),
        None => ProjectRoot::discover(base),
    }
}

fn warehouse(settings: &WarehouseSettings, root: &ProjectRoot) -> Arc<dyn Warehouse> {
    match settings {
        WarehouseSettings::Postgres { url } => Arc::new(PostgresWarehouse::new(url.clone())),
        WarehouseSettings::Sqlite { path } => Arc::new(SqliteWarehouse::new(root.resolve(path))),
    }
}

fn control_store(settings: &ControlSettings, root: &ProjectRoot) -> Result<Arc<dyn ControlStore>> {
    Ok(match settings {
        ControlSettings::Postgres { url } => Arc::new(PostgresControlStore::new(url.clone())),
        ControlSettings::Sqlite { path } => {
            let path = root.resolve(path);
            Arc::new(
                SqliteControlStore::open(&path)
                    .with_context(|| format!("Failed to open control store: {}", path.display()))?,
            )
        }
    })
}

/// Load settings once and wire every component from them.
pub(crate) fn build_service(config_path: &Path) -> Result<ExecutorService> {
    let settings = parser::parse_settings(config_path)?;
    let root = project_root(&settings, config_path);
    tracing::debug!(root = %root.as_path().display(), "project root");

    let factory = StepFactory::new(
        warehouse(&settings.warehouse, &root),
        root.clone(),
        settings.curated_schema.clone(),
        Arc::new(ExtensionRegistry::new()),
    );
    let store = control_store(&settings.control, &root)?;
    let today = chrono::Local::now().date_naive();
    Ok(ExecutorService::new(store, Arc::new(JobRunner::new(factory)), today))
}
