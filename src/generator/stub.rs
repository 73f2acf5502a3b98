use super::Generator;
use crate::error::Result;
use crate::model::Table;

pub struct MongoGenerator;

impl Generator for MongoGenerator {
    fn dialect(&self) -> &'static str {
        "mongodb"
    }

    fn generate_schema(&self, _tables: &[Table]) -> Result<String> {
        Ok("// Mongo schema generation not implemented yet\n".to_string())
    }
}

pub struct SqliteGenerator;

impl Generator for SqliteGenerator {
    fn dialect(&self) -> &'static str {
        "sqlite"
    }

    fn generate_schema(&self, _tables: &[Table]) -> Result<String> {
        Ok("-- SQLite schema generation not implemented yet\n".to_string())
    }
}
