use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::json;
use sysinfo::System;
use tracing::info;

use crate::error::{MigrateError, Result};

pub const DEFAULT_CONFIG_FILE: &str = "dumpshift.json";
const MAX_DEFAULT_WORKERS: usize = 4;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(rename = "type", default = "default_db_type")]
    pub db_type: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub name: String,
    #[serde(default = "default_sslmode")]
    pub sslmode: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Worker count; sized from the host when absent.
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,
    #[serde(default = "default_import_data")]
    pub import_data: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: None,
            queue_capacity: default_queue_capacity(),
            results_dir: default_results_dir(),
            logs_dir: default_logs_dir(),
            import_data: default_import_data(),
        }
    }
}

impl PipelineConfig {
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(host_worker_count).max(1)
    }

    pub fn failed_inserts_path(&self) -> PathBuf {
        self.logs_dir.join("failed_inserts.sql")
    }

    pub fn merged_output_path(&self, target: &str) -> PathBuf {
        self.results_dir.join(format!("merged_{}.sql", target))
    }
}

fn default_db_type() -> String {
    "postgres".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_sslmode() -> String {
    "disable".to_string()
}

fn default_queue_capacity() -> usize {
    100
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_import_data() -> bool {
    true
}

fn host_worker_count() -> usize {
    let mut system = System::new_all();
    system.refresh_memory();
    info!(
        "Host has {} CPUs, {} MiB available memory",
        system.cpus().len(),
        system.available_memory() / (1024 * 1024)
    );
    system.cpus().len().clamp(1, MAX_DEFAULT_WORKERS)
}

fn config_schema() -> serde_json::Value {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "required": ["database"],
        "properties": {
            "database": {
                "type": "object",
                "required": ["host", "user", "name"],
                "properties": {
                    "type": { "type": "string" },
                    "host": { "type": "string" },
                    "port": { "type": "integer", "minimum": 1, "maximum": 65535 },
                    "user": { "type": "string" },
                    "password": { "type": "string" },
                    "name": { "type": "string" },
                    "sslmode": { "type": "string" }
                }
            },
            "pipeline": {
                "type": "object",
                "properties": {
                    "workers": { "type": "integer", "minimum": 1 },
                    "queue_capacity": { "type": "integer", "minimum": 1 },
                    "results_dir": { "type": "string" },
                    "logs_dir": { "type": "string" },
                    "import_data": { "type": "boolean" }
                }
            }
        }
    })
}

impl Config {
    /// Loads the configuration from `path`, falling back to the parent
    /// directory and a `config/` subdirectory.
    pub fn load(path: &Path) -> Result<Self> {
        let candidates = [
            path.to_path_buf(),
            Path::new("..").join(path),
            Path::new("config").join(path),
        ];

        for candidate in &candidates {
            if let Ok(text) = std::fs::read_to_string(candidate) {
                let config = Self::from_json_str(&text)?;
                info!("Config loaded from: {}", candidate.display());
                return Ok(config);
            }
        }

        Err(MigrateError::Config(format!(
            "{} not found in: {}",
            path.display(),
            candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )))
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| MigrateError::Config(format!("invalid JSON: {}", e)))?;
        jsonschema::validate(&config_schema(), &value)
            .map_err(|e| MigrateError::Config(e.to_string()))?;
        serde_json::from_value(value).map_err(|e| MigrateError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config = Config::from_json_str(
            r#"{"database": {"host": "localhost", "user": "app", "name": "shop"}}"#,
        )
        .unwrap();
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.database.sslmode, "disable");
        assert_eq!(config.database.db_type, "postgres");
        assert_eq!(config.pipeline.queue_capacity, 100);
        assert!(config.pipeline.import_data);
        assert_eq!(
            config.pipeline.merged_output_path("postgres"),
            PathBuf::from("results/merged_postgres.sql")
        );
        assert_eq!(
            config.pipeline.failed_inserts_path(),
            PathBuf::from("logs/failed_inserts.sql")
        );
    }

    #[test]
    fn test_schema_violations_are_config_errors() {
        let missing_db = Config::from_json_str(r#"{"pipeline": {}}"#).unwrap_err();
        assert!(matches!(missing_db, MigrateError::Config(_)));

        let bad_workers = Config::from_json_str(
            r#"{"database": {"host": "h", "user": "u", "name": "n"}, "pipeline": {"workers": 0}}"#,
        )
        .unwrap_err();
        assert!(matches!(bad_workers, MigrateError::Config(_)));

        assert!(matches!(
            Config::from_json_str("not json").unwrap_err(),
            MigrateError::Config(_)
        ));
    }

    #[test]
    fn test_explicit_workers_win() {
        let pipeline = PipelineConfig {
            workers: Some(3),
            ..PipelineConfig::default()
        };
        assert_eq!(pipeline.worker_count(), 3);
        assert!(PipelineConfig::default().worker_count() >= 1);
    }

    #[test]
    fn test_load_reports_missing_file() {
        let err = Config::load(Path::new("no-such-dumpshift-config.json")).unwrap_err();
        assert!(matches!(err, MigrateError::Config(_)));
    }

    #[test]
    fn test_load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dumpshift.json");
        std::fs::write(
            &path,
            r#"{"database": {"host": "db", "port": 6543, "user": "u", "name": "n"},
                "pipeline": {"workers": 2, "results_dir": "out"}}"#,
        )
        .unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.database.port, 6543);
        assert_eq!(config.pipeline.worker_count(), 2);
        assert_eq!(config.pipeline.results_dir, PathBuf::from("out"));
    }
}
