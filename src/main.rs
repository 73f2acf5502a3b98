use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use dumpshift::config::DEFAULT_CONFIG_FILE;
use dumpshift::{Config, DialectRegistry, JobStatus, Pipeline};

#[derive(Parser, Debug)]
#[command(name = "dumpshift", about = "Migrate MySQL dumps into another database")]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Target dialect
    #[arg(long, default_value = "postgres")]
    target: String,

    /// Only write the merged schema, skip the import
    #[arg(long)]
    schema_only: bool,

    /// Dump files to migrate
    #[arg(required = true)]
    dumps: Vec<PathBuf>,
}

fn init_logging(logs_dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(logs_dir)
        .with_context(|| format!("Failed to create {}", logs_dir.display()))?;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let file_appender = tracing_appender::rolling::never(logs_dir, "app.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    if cli.schema_only {
        config.pipeline.import_data = false;
    }

    let _guard = init_logging(&config.pipeline.logs_dir)?;
    info!(
        "Connecting imports to {}@{}:{}/{}",
        config.database.user, config.database.host, config.database.port, config.database.name
    );

    let registry = DialectRegistry::new()
        .with_postgres(&config.database)
        .context("Invalid database configuration")?;
    let pipeline = Pipeline::start(config.pipeline.clone(), Arc::new(registry));

    let mut tickets = Vec::with_capacity(cli.dumps.len());
    for dump in &cli.dumps {
        let ticket = pipeline.submit(dump.clone(), &cli.target).await?;
        println!("{}", serde_json::to_string(ticket.submission())?);
        tickets.push(ticket);
    }

    let mut failed = 0;
    for ticket in tickets {
        let report = ticket.wait().await?;
        if report.status == JobStatus::Failed {
            failed += 1;
            error!(
                "Job {} failed: {}",
                report.job_id,
                report.error.as_deref().unwrap_or("unknown error")
            );
            continue;
        }
        if let Some(import) = report.import {
            match import.wait().await {
                Ok(summary) => info!(
                    "Job {}: {} tables, {} inserts applied, {} failed",
                    report.job_id, summary.tables, summary.applied, summary.failed
                ),
                Err(e) => {
                    failed += 1;
                    error!("Job {} import failed: {}", report.job_id, e);
                }
            }
        }
    }

    pipeline.shutdown().await;

    if failed > 0 {
        anyhow::bail!("{} of {} jobs failed", failed, cli.dumps.len());
    }
    info!("Migration completed successfully!");
    Ok(())
}
