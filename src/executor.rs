//! Applies a generated schema and replays captured inserts against a target.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

use crate::db::{Connector, Session};
use crate::error::{MigrateError, Result};
use crate::generator::Generator;
use crate::model::Table;

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ImportReport {
    /// Tables that had at least one insert to replay.
    pub tables: usize,
    pub applied: usize,
    pub failed: usize,
    pub failed_record: Option<PathBuf>,
}

pub struct ImportExecutor {
    connector: Arc<dyn Connector>,
    generator: Arc<dyn Generator>,
    failed_inserts: PathBuf,
}

impl ImportExecutor {
    pub fn new(
        connector: Arc<dyn Connector>,
        generator: Arc<dyn Generator>,
        failed_inserts: impl Into<PathBuf>,
    ) -> Self {
        Self {
            connector,
            generator,
            failed_inserts: failed_inserts.into(),
        }
    }

    pub async fn run(&self, ddl_path: &Path, tables: &[Table]) -> Result<ImportReport> {
        let mut session = self.connector.connect().await?;
        if let Err(e) = session.ping().await {
            let _ = session.close().await;
            return Err(MigrateError::Connection(format!(
                "{}: ping failed: {}",
                self.connector.name(),
                e
            )));
        }

        let suspend = self.connector.suspend_constraints();
        if let Err(e) = session.exec(suspend).await {
            warn!("Failed to suspend constraints on {}: {}", self.connector.name(), e);
        }

        let outcome = self.apply(session.as_mut(), ddl_path, tables).await;

        // Restore runs whatever happened above.
        let restore = self.connector.restore_constraints();
        if let Err(e) = session.exec(restore).await {
            warn!("Failed to restore constraints on {}: {}", self.connector.name(), e);
        }
        if let Err(e) = session.close().await {
            warn!("Failed to close {} session: {}", self.connector.name(), e);
        }

        let report = outcome?;
        info!(
            tables = report.tables,
            applied = report.applied,
            failed = report.failed,
            "Import finished for {}",
            ddl_path.display()
        );
        Ok(report)
    }

    async fn apply(
        &self,
        session: &mut dyn Session,
        ddl_path: &Path,
        tables: &[Table],
    ) -> Result<ImportReport> {
        let ddl = tokio::fs::read_to_string(ddl_path).await?;
        session
            .exec(&ddl)
            .await
            .map_err(|e| MigrateError::SchemaApply(format!("{}: {}", ddl_path.display(), e)))?;
        info!("Schema applied from {}", ddl_path.display());

        let mut report = ImportReport::default();
        for table in tables.iter().filter(|t| !t.inserts.is_empty()) {
            report.tables += 1;
            for statement in &table.inserts {
                let prepared = self.generator.prepare_insert(statement);
                match session.exec(&prepared).await {
                    Ok(()) => report.applied += 1,
                    Err(e) => {
                        let err = MigrateError::RowInsert {
                            table: table.name.clone(),
                            reason: e.to_string(),
                        };
                        error!("{}", err);
                        report.failed += 1;
                        if let Err(e) = self.record_failure(&prepared).await {
                            error!(
                                "Could not write to {}: {}",
                                self.failed_inserts.display(),
                                e
                            );
                        } else {
                            report.failed_record = Some(self.failed_inserts.clone());
                        }
                    }
                }
            }
            info!("Replayed {} inserts into {}", table.inserts.len(), table.name);
        }

        Ok(report)
    }

    async fn record_failure(&self, statement: &str) -> Result<()> {
        if let Some(parent) = self.failed_inserts.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.failed_inserts)
            .await?;
        let line = format!("{};\n", statement.trim_end().trim_end_matches(';'));
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
