pub mod postgres;
pub mod stub;

use crate::error::Result;
use crate::model::Table;

pub use postgres::PostgresGenerator;
pub use stub::{MongoGenerator, SqliteGenerator};

/// Turns parsed tables into DDL for one target dialect.
///
/// Generation works on the whole table set at once so that constraints and
/// indexes from every table can be emitted after all table bodies.
pub trait Generator: Send + Sync {
    fn dialect(&self) -> &'static str;

    fn generate_schema(&self, tables: &[Table]) -> Result<String>;

    /// Rewrites a captured insert statement so the target can replay it.
    fn prepare_insert(&self, statement: &str) -> String {
        statement.to_string()
    }
}
