//! Target database capability.
//!
//! The executor only needs to connect, run statements and toggle
//! referential-integrity enforcement for its session. Everything
//! driver-specific stays behind [`Connector`] and [`Session`].

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use sqlx::{Connection, PgConnection};
use tracing::info;

use crate::config::DatabaseConfig;
use crate::error::{MigrateError, Result};

#[async_trait]
pub trait Connector: Send + Sync {
    fn name(&self) -> &str;

    /// Opens a fresh, unpooled connection.
    async fn connect(&self) -> Result<Box<dyn Session>>;

    /// Statement that turns off foreign-key enforcement for the session.
    fn suspend_constraints(&self) -> &'static str;

    /// Statement that restores foreign-key enforcement for the session.
    fn restore_constraints(&self) -> &'static str;
}

#[async_trait]
pub trait Session: Send {
    /// Runs one or more statements without parameters.
    async fn exec(&mut self, sql: &str) -> Result<()>;

    async fn ping(&mut self) -> Result<()>;

    async fn close(self: Box<Self>) -> Result<()>;
}

pub struct PostgresConnector {
    options: PgConnectOptions,
    label: String,
}

impl PostgresConnector {
    pub fn from_config(config: &DatabaseConfig) -> Result<Self> {
        let ssl_mode = PgSslMode::from_str(&config.sslmode)
            .map_err(|e| MigrateError::Config(format!("invalid sslmode '{}': {}", config.sslmode, e)))?;

        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.name)
            .ssl_mode(ssl_mode);

        Ok(Self {
            options,
            label: format!("{}:{}/{}", config.host, config.port, config.name),
        })
    }
}

#[async_trait]
impl Connector for PostgresConnector {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn connect(&self) -> Result<Box<dyn Session>> {
        let conn = PgConnection::connect_with(&self.options)
            .await
            .map_err(|e| MigrateError::Connection(format!("{}: {}", self.label, e)))?;

        info!("PostgreSQL connection established: {}", self.label);
        Ok(Box::new(PostgresSession { conn }))
    }

    fn suspend_constraints(&self) -> &'static str {
        "SET session_replication_role = replica;"
    }

    fn restore_constraints(&self) -> &'static str {
        "SET session_replication_role = DEFAULT;"
    }
}

struct PostgresSession {
    conn: PgConnection,
}

#[async_trait]
impl Session for PostgresSession {
    async fn exec(&mut self, sql: &str) -> Result<()> {
        // raw_sql goes through the simple query protocol, which accepts a
        // whole script in one round trip.
        sqlx::Executor::execute(&mut self.conn, sqlx::raw_sql(sql)).await?;
        Ok(())
    }

    async fn ping(&mut self) -> Result<()> {
        self.conn.ping().await?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.conn.close().await?;
        Ok(())
    }
}
