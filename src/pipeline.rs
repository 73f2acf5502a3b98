//! Bounded job queue drained by a fixed pool of workers.
//!
//! A worker takes a job through parse, generate and merged-file emission,
//! then hands the import off to a detached task that the pipeline tracks so
//! that [`Pipeline::shutdown`] can wait for it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::{MigrateError, Result};
use crate::executor::{ImportExecutor, ImportReport};
use crate::model::Table;
use crate::parser;
use crate::registry::DialectRegistry;

#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,
    pub file_path: PathBuf,
    pub target: String,
}

impl Job {
    pub fn new(file_path: impl Into<PathBuf>, target: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            file_path: file_path.into(),
            target: target.to_string(),
        }
    }
}

/// Receipt handed back to whoever enqueued a job.
#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    pub message: String,
    pub job_id: String,
    pub file_path: PathBuf,
    pub target: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

#[derive(Debug)]
pub struct ImportHandle {
    job_id: String,
    outcome: oneshot::Receiver<Result<ImportReport>>,
}

impl ImportHandle {
    pub async fn wait(self) -> Result<ImportReport> {
        self.outcome
            .await
            .map_err(|_| MigrateError::ImportAborted(self.job_id))?
    }
}

#[derive(Debug)]
pub struct JobReport {
    pub job_id: String,
    pub target: String,
    pub status: JobStatus,
    pub tables: usize,
    pub merged_path: Option<PathBuf>,
    pub error: Option<String>,
    pub import: Option<ImportHandle>,
}

pub struct JobTicket {
    submission: Submission,
    status: watch::Receiver<JobStatus>,
    report: oneshot::Receiver<JobReport>,
}

impl JobTicket {
    pub fn submission(&self) -> &Submission {
        &self.submission
    }

    pub fn status(&self) -> JobStatus {
        *self.status.borrow()
    }

    pub async fn wait(self) -> Result<JobReport> {
        self.report.await.map_err(|_| MigrateError::QueueClosed)
    }
}

struct QueuedJob {
    job: Job,
    status: watch::Sender<JobStatus>,
    report: oneshot::Sender<JobReport>,
}

struct Worker {
    config: PipelineConfig,
    registry: Arc<DialectRegistry>,
    imports: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

pub struct Pipeline {
    sender: mpsc::Sender<QueuedJob>,
    workers: Vec<JoinHandle<()>>,
    imports: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Pipeline {
    /// Spawns the worker pool. Must be called inside a tokio runtime.
    pub fn start(config: PipelineConfig, registry: Arc<DialectRegistry>) -> Self {
        let worker_count = config.worker_count();
        let capacity = config.queue_capacity.max(1);
        let (sender, receiver) = mpsc::channel::<QueuedJob>(capacity);
        let receiver = Arc::new(Mutex::new(receiver));
        let imports = Arc::new(Mutex::new(Vec::new()));

        let shared = Arc::new(Worker {
            config,
            registry,
            imports: imports.clone(),
        });

        let workers = (1..=worker_count)
            .map(|worker_id| {
                let receiver = receiver.clone();
                let shared = shared.clone();
                tokio::spawn(async move {
                    loop {
                        let next = receiver.lock().await.recv().await;
                        let Some(queued) = next else { break };
                        shared.handle(worker_id, queued).await;
                    }
                    info!("Worker {} stopped", worker_id);
                })
            })
            .collect();

        info!("Pipeline started: {} workers, queue capacity {}", worker_count, capacity);
        Self {
            sender,
            workers,
            imports,
        }
    }

    /// Enqueues a job, waiting for a free slot when the queue is full.
    pub async fn submit(&self, file_path: impl Into<PathBuf>, target: &str) -> Result<JobTicket> {
        let (queued, ticket) = enqueue(Job::new(file_path, target));
        self.sender
            .send(queued)
            .await
            .map_err(|_| MigrateError::QueueClosed)?;
        log_queued(&ticket.submission);
        Ok(ticket)
    }

    pub fn try_submit(&self, file_path: impl Into<PathBuf>, target: &str) -> Result<JobTicket> {
        let (queued, ticket) = enqueue(Job::new(file_path, target));
        self.sender.try_send(queued).map_err(|e| match e {
            TrySendError::Full(_) => MigrateError::QueueFull,
            TrySendError::Closed(_) => MigrateError::QueueClosed,
        })?;
        log_queued(&ticket.submission);
        Ok(ticket)
    }

    /// Closes the queue, lets the workers drain it, then waits for every
    /// import they started.
    pub async fn shutdown(self) {
        drop(self.sender);
        for result in join_all(self.workers).await {
            if let Err(e) = result {
                error!("Worker task failed: {}", e);
            }
        }

        let imports = std::mem::take(&mut *self.imports.lock().await);
        info!("Waiting for {} import tasks", imports.len());
        for result in join_all(imports).await {
            if let Err(e) = result {
                error!("Import task failed: {}", e);
            }
        }
        info!("Pipeline stopped");
    }
}

fn enqueue(job: Job) -> (QueuedJob, JobTicket) {
    let (status_tx, status_rx) = watch::channel(JobStatus::Queued);
    let (report_tx, report_rx) = oneshot::channel();
    let ticket = JobTicket {
        submission: Submission {
            message: "job queued".to_string(),
            job_id: job.id.clone(),
            file_path: job.file_path.clone(),
            target: job.target.clone(),
        },
        status: status_rx,
        report: report_rx,
    };
    let queued = QueuedJob {
        job,
        status: status_tx,
        report: report_tx,
    };
    (queued, ticket)
}

fn log_queued(submission: &Submission) {
    info!(
        "Job queued: {} ({} -> {})",
        submission.job_id,
        submission.file_path.display(),
        submission.target
    );
}

struct Processed {
    tables: usize,
    merged_path: PathBuf,
    import: Option<ImportHandle>,
}

impl Worker {
    async fn handle(&self, worker_id: usize, queued: QueuedJob) {
        let QueuedJob {
            job,
            status,
            report,
        } = queued;
        let _ = status.send(JobStatus::Running);
        info!("[Worker {}] Processing job {} ({})", worker_id, job.id, job.file_path.display());

        let outcome = self.process(&job).await;
        let report_value = match outcome {
            Ok(processed) => {
                info!(
                    "[Worker {}] Job {} completed: {} tables -> {}",
                    worker_id,
                    job.id,
                    processed.tables,
                    processed.merged_path.display()
                );
                let _ = status.send(JobStatus::Completed);
                JobReport {
                    job_id: job.id,
                    target: job.target,
                    status: JobStatus::Completed,
                    tables: processed.tables,
                    merged_path: Some(processed.merged_path),
                    error: None,
                    import: processed.import,
                }
            }
            Err(e) => {
                error!("[Worker {}] Job {} failed: {}", worker_id, job.id, e);
                let _ = status.send(JobStatus::Failed);
                JobReport {
                    job_id: job.id,
                    target: job.target,
                    status: JobStatus::Failed,
                    tables: 0,
                    merged_path: None,
                    error: Some(e.to_string()),
                    import: None,
                }
            }
        };
        // The submitter may have dropped its ticket.
        let _ = report.send(report_value);
    }

    async fn process(&self, job: &Job) -> Result<Processed> {
        if tokio::fs::metadata(&job.file_path).await.is_err() {
            return Err(MigrateError::DumpMissing(job.file_path.clone()));
        }

        let tables = parser::parse_file(&job.file_path).await?;
        if tables.is_empty() {
            return Err(MigrateError::EmptyDump(job.file_path.clone()));
        }
        let table_count = tables.len();

        let generator = self.registry.generator(&job.target)?;
        let views: Vec<Table> = tables.iter().map(Table::generation_view).collect();
        let schema = {
            let generator = generator.clone();
            tokio::task::spawn_blocking(move || generator.generate_schema(&views))
                .await
                .map_err(|e| MigrateError::Generation(format!("generator task failed: {}", e)))??
        };
        if schema.trim().is_empty() {
            return Err(MigrateError::Generation(format!(
                "{} produced no output",
                generator.dialect()
            )));
        }

        let merged_path = self.config.merged_output_path(&job.target);
        write_merged(&merged_path, &schema).await?;
        info!("Wrote {} bytes to {}", schema.len(), merged_path.display());

        let import = if self.config.import_data {
            self.launch_import(job, &merged_path, tables).await
        } else {
            None
        };

        Ok(Processed {
            tables: table_count,
            merged_path,
            import,
        })
    }

    /// Starts the import as a tracked task. Targets without a registered
    /// connector only get the merged file.
    async fn launch_import(
        &self,
        job: &Job,
        merged_path: &Path,
        tables: Vec<Table>,
    ) -> Option<ImportHandle> {
        let connector = match self.registry.connector(&job.target) {
            Ok(connector) => connector,
            Err(e) => {
                warn!("Skipping import for job {}: {}", job.id, e);
                return None;
            }
        };
        let generator = self.registry.generator(&job.target).ok()?;
        let executor = ImportExecutor::new(connector, generator, self.config.failed_inserts_path());

        let tables = Arc::new(tables);
        let ddl_path = merged_path.to_path_buf();
        let job_id = job.id.clone();
        let (outcome_tx, outcome_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            let outcome = executor.run(&ddl_path, &tables).await;
            match &outcome {
                Ok(report) => info!(
                    "Import for job {} done: {} applied, {} failed",
                    job_id, report.applied, report.failed
                ),
                Err(e) => error!("Import for job {} failed: {}", job_id, e),
            }
            let _ = outcome_tx.send(outcome);
        });

        let mut imports = self.imports.lock().await;
        imports.retain(|h| !h.is_finished());
        imports.push(handle);

        Some(ImportHandle {
            job_id: job.id.clone(),
            outcome: outcome_rx,
        })
    }
}

async fn write_merged(path: &Path, schema: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(path, schema).await?;
    Ok(())
}
