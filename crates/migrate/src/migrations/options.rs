//! Execution options for a single `up`/`down` run

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::logger::{MigrationEvent, MigrationLogger, TracingLogger};

/// Default run-wide deadline
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Options controlling how a batch of migrations is executed
///
/// The value is fixed for the whole run; build a new one to change behaviour.
#[derive(Clone)]
pub struct MigrateOptions {
    global_transaction: bool,
    timeout: Duration,
    logger: Option<Arc<dyn MigrationLogger>>,
}

impl MigrateOptions {
    pub fn new() -> Self {
        Self {
            global_transaction: false,
            timeout: DEFAULT_TIMEOUT,
            logger: Some(Arc::new(TracingLogger)),
        }
    }

    /// Run the whole batch inside one transaction (all-or-nothing)
    pub fn with_global_transaction(mut self, global_transaction: bool) -> Self {
        self.global_transaction = global_transaction;
        self
    }

    /// Deadline covering the entire run, not individual statements
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send progress events to `logger`
    pub fn with_logger(mut self, logger: Arc<dyn MigrationLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Suppress all migration logging
    pub fn without_logger(mut self) -> Self {
        self.logger = None;
        self
    }

    pub fn global_transaction(&self) -> bool {
        self.global_transaction
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn logging_enabled(&self) -> bool {
        self.logger.is_some()
    }

    pub(crate) fn log(&self, event: MigrationEvent) {
        if let Some(logger) = &self.logger {
            logger.log(&event);
        }
    }
}

impl Default for MigrateOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MigrateOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrateOptions")
            .field("global_transaction", &self.global_transaction)
            .field("timeout", &self.timeout)
            .field("logging_enabled", &self.logging_enabled())
            .finish()
    }
}
