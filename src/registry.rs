use std::collections::HashMap;
use std::sync::Arc;

use crate::config::DatabaseConfig;
use crate::db::{Connector, PostgresConnector};
use crate::error::{MigrateError, Result};
use crate::generator::{Generator, MongoGenerator, PostgresGenerator, SqliteGenerator};

/// Maps dialect names to the generator and connector that serve them.
/// Lookups ignore ASCII case.
#[derive(Default, Clone)]
pub struct DialectRegistry {
    generators: HashMap<String, Arc<dyn Generator>>,
    connectors: HashMap<String, Arc<dyn Connector>>,
}

impl DialectRegistry {
    /// Registry with the built-in generators and no connectors.
    pub fn new() -> Self {
        Self::empty()
            .with_generator(&["postgres", "postgresql"], Arc::new(PostgresGenerator))
            .with_generator(&["mongo", "mongodb"], Arc::new(MongoGenerator))
            .with_generator(&["sqlite"], Arc::new(SqliteGenerator))
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_postgres(self, config: &DatabaseConfig) -> Result<Self> {
        let connector = PostgresConnector::from_config(config)?;
        Ok(self.with_connector(&["postgres", "postgresql"], Arc::new(connector)))
    }

    pub fn with_generator(mut self, names: &[&str], generator: Arc<dyn Generator>) -> Self {
        for name in names {
            self.generators.insert(name.to_ascii_lowercase(), generator.clone());
        }
        self
    }

    pub fn with_connector(mut self, names: &[&str], connector: Arc<dyn Connector>) -> Self {
        for name in names {
            self.connectors.insert(name.to_ascii_lowercase(), connector.clone());
        }
        self
    }

    pub fn generator(&self, target: &str) -> Result<Arc<dyn Generator>> {
        self.generators
            .get(&target.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| MigrateError::UnsupportedTarget(target.to_string()))
    }

    pub fn connector(&self, target: &str) -> Result<Arc<dyn Connector>> {
        self.connectors
            .get(&target.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| MigrateError::UnsupportedTarget(target.to_string()))
    }
}
