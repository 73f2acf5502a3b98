#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dumpshift::db::{Connector, Session};
use dumpshift::{MigrateError, Result};

pub const SUSPEND: &str = "SET session_replication_role = replica;";
pub const RESTORE: &str = "SET session_replication_role = DEFAULT;";

/// Connector that records every executed statement instead of talking to a
/// server. Statements containing any of `fail_on` are rejected.
#[derive(Default, Clone)]
pub struct MemoryConnector {
    pub executed: Arc<Mutex<Vec<String>>>,
    fail_on: Vec<String>,
    refuse: bool,
    unresponsive: bool,
    closed: Arc<Mutex<bool>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(patterns: &[&str]) -> Self {
        Self {
            fail_on: patterns.iter().map(|p| p.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }

    /// Connects, but every ping fails.
    pub fn unresponsive() -> Self {
        Self {
            unresponsive: true,
            ..Self::default()
        }
    }

    pub fn was_closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }

    pub fn statements(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    fn name(&self) -> &str {
        "memory"
    }

    async fn connect(&self) -> Result<Box<dyn Session>> {
        if self.refuse {
            return Err(MigrateError::Connection("memory: connection refused".into()));
        }
        Ok(Box::new(MemorySession {
            executed: self.executed.clone(),
            fail_on: self.fail_on.clone(),
            unresponsive: self.unresponsive,
            closed: self.closed.clone(),
        }))
    }

    fn suspend_constraints(&self) -> &'static str {
        SUSPEND
    }

    fn restore_constraints(&self) -> &'static str {
        RESTORE
    }
}

struct MemorySession {
    executed: Arc<Mutex<Vec<String>>>,
    fail_on: Vec<String>,
    unresponsive: bool,
    closed: Arc<Mutex<bool>>,
}

#[async_trait]
impl Session for MemorySession {
    async fn exec(&mut self, sql: &str) -> Result<()> {
        if let Some(pattern) = self.fail_on.iter().find(|p| sql.contains(p.as_str())) {
            return Err(MigrateError::Connection(format!("rejected statement matching {}", pattern)));
        }
        self.executed.lock().unwrap().push(sql.to_string());
        Ok(())
    }

    async fn ping(&mut self) -> Result<()> {
        if self.unresponsive {
            return Err(MigrateError::Connection("memory: ping timed out".into()));
        }
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        *self.closed.lock().unwrap() = true;
        Ok(())
    }
}

pub const USERS_DUMP: &str = "\
CREATE TABLE `users` (
  `id` int(11) NOT NULL,
  `name` varchar(255) NOT NULL
) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4;

INSERT INTO `users` VALUES (1, 'Ann');

ALTER TABLE `users`
  ADD PRIMARY KEY (`id`);

ALTER TABLE `users`
  MODIFY `id` int(11) NOT NULL AUTO_INCREMENT;
";
