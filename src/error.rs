use std::path::PathBuf;

/// Errors raised while migrating a dump.
///
/// The variants fall into three severities that callers keep apart:
/// job-terminal failures (`DumpMissing`, `Parse`, `EmptyDump`,
/// `UnsupportedTarget`, `Generation`), run-terminal failures (`Connection`,
/// `SchemaApply`) and row-level failures (`RowInsert`) that are recorded and
/// skipped.
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("dump file not found: {}", .0.display())]
    DumpMissing(PathBuf),

    #[error("failed to read dump {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no tables found in {}", .0.display())]
    EmptyDump(PathBuf),

    #[error("unsupported target: {0}")]
    UnsupportedTarget(String),

    #[error("schema generation failed: {0}")]
    Generation(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("schema apply failed: {0}")]
    SchemaApply(String),

    #[error("insert into {table} failed: {reason}")]
    RowInsert { table: String, reason: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("job queue is closed")]
    QueueClosed,

    #[error("job queue is full")]
    QueueFull,

    #[error("import for job {0} ended before reporting")]
    ImportAborted(String),
}

pub type Result<T, E = MigrateError> = std::result::Result<T, E>;
