pub mod config;
pub mod db;
pub mod error;
pub mod executor;
pub mod generator;
pub mod model;
pub mod parser;
pub mod pipeline;
pub mod registry;

pub use config::{Config, DatabaseConfig, PipelineConfig};
pub use error::{MigrateError, Result};
pub use executor::{ImportExecutor, ImportReport};
pub use model::{Field, ForeignKey, Table};
pub use pipeline::{ImportHandle, Job, JobReport, JobStatus, JobTicket, Pipeline, Submission};
pub use registry::DialectRegistry;
