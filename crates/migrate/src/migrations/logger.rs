//! Migration logging
//!
//! The migrator reports its progress as [`MigrationEvent`]s to a [`MigrationLogger`].
//! Loggers are infallible: nothing a logger does can fail a run.

use std::time::Duration;

use super::definitions::Direction;

/// Progress event emitted during a run
#[derive(Debug, Clone, PartialEq)]
pub enum MigrationEvent {
    /// Ledger bootstrapped and diff computed; `count` migrations will run
    RunStarted { direction: Direction, count: usize },
    MigrationStarted { direction: Direction, version: String },
    MigrationSucceeded { direction: Direction, version: String, elapsed: Duration },
    MigrationFailed { direction: Direction, version: String, error: String },
    /// Run completed; `count` migrations were processed
    RunFinished { direction: Direction, count: usize, elapsed: Duration },
    /// Run stopped early; in global-transaction mode nothing from it was kept
    RunFailed { direction: Direction, error: String },
}

/// Sink for migration progress events
pub trait MigrationLogger: Send + Sync {
    fn log(&self, event: &MigrationEvent);
}

/// Default logger forwarding events to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl MigrationLogger for TracingLogger {
    fn log(&self, event: &MigrationEvent) {
        match event {
            MigrationEvent::RunStarted { direction, count } => {
                if *count == 0 {
                    tracing::info!("No migrations to run ({})", direction);
                } else {
                    tracing::info!("Running {} migration(s) {}", count, direction);
                }
            }
            MigrationEvent::MigrationStarted { direction, version } => {
                tracing::info!("Migrating {}: {}", direction, version);
            }
            MigrationEvent::MigrationSucceeded { direction, version, elapsed } => {
                tracing::info!("Migrated {}: {} ({:?})", direction, version, elapsed);
            }
            MigrationEvent::MigrationFailed { direction, version, error } => {
                tracing::error!("Migration {} failed for {}: {}", direction, version, error);
            }
            MigrationEvent::RunFinished { direction, count, elapsed } => {
                tracing::info!("Finished {} migration(s) {} in {:?}", count, direction, elapsed);
            }
            MigrationEvent::RunFailed { direction, error } => {
                tracing::error!("Migration run {} aborted: {}", direction, error);
            }
        }
    }
}
