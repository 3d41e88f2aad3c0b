//! Engine settings (`tidemark.yaml`).

use std::path::PathBuf;

use serde::Deserialize;

fn default_curated_schema() -> String {
    "curated".to_string()
}

/// Resolved once at startup and passed down to every component.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSettings {
    /// Base for relative job definition and output paths.
    #[serde(default)]
    pub project_root: Option<PathBuf>,
    pub warehouse: WarehouseSettings,
    pub control: ControlSettings,
    /// Default schema for `TableSink` writes.
    #[serde(default = "default_curated_schema")]
    pub curated_schema: String,
}

/// Where sources read and table sinks write.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum WarehouseSettings {
    Postgres {
        url: String,
    },
    /// One database file per schema under `path`.
    Sqlite {
        path: PathBuf,
    },
}

/// Where the job registry and run audit live.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum ControlSettings {
    Postgres { url: String },
    Sqlite { path: PathBuf },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_backends() {
        let yaml = r"
warehouse:
  backend: postgres
  url: postgres://etl@localhost/warehouse
control:
  backend: sqlite
  path: state/control.db
curatedSchema: marts
";
        let settings: EngineSettings = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            settings.warehouse,
            WarehouseSettings::Postgres { ref url } if url.ends_with("/warehouse")
        ));
        assert!(matches!(settings.control, ControlSettings::Sqlite { .. }));
        assert_eq!(settings.curated_schema, "marts");
        assert!(settings.project_root.is_none());
    }

    #[test]
    fn curated_schema_defaults() {
        let yaml = r"
warehouse: { backend: sqlite, path: wh }
control: { backend: sqlite, path: control.db }
";
        let settings: EngineSettings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(settings.curated_schema, "curated");
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let yaml = r"
warehouse: { backend: oracle, url: x }
control: { backend: sqlite, path: control.db }
";
        assert!(serde_yaml::from_str::<EngineSettings>(yaml).is_err());
    }
}
