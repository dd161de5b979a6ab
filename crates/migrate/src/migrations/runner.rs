//! Migration Runner - executes migrations against the database
//!
//! A run moves through `bootstrapping -> diffing -> executing -> committed | failed`:
//! the ledger table is ensured, the applied set is read, the candidate migrations are
//! filtered and ordered, and each one is executed and recorded. No state other than the
//! ledger itself survives between runs, so an interrupted run is resumed by running again.
//!
//! In per-migration mode every migration commits on its own and a failure leaves earlier
//! migrations applied. In global-transaction mode the whole batch shares one transaction
//! and a failure leaves nothing applied.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use super::definitions::{
    Direction, MigrationRunResult, MigrationStatus, MigrationStatusEntry, RollbackResult,
};
use super::ledger::Ledger;
use super::logger::MigrationEvent;
use super::migration::Migration;
use super::options::MigrateOptions;
use crate::backends::{DatabaseConnection, DatabaseHandle, DatabaseTransaction, SqlDialect};
use crate::error::{MigrationError, MigrationResult, Phase};

/// Migrator that applies and rolls back migrations against a caller-owned connection
#[derive(Debug, Clone, Default)]
pub struct Migrator {
    ledger: Ledger,
    options: MigrateOptions,
}

impl Migrator {
    /// Create a migrator using the default `schema_migrations` ledger
    pub fn new(options: MigrateOptions) -> Self {
        Self {
            ledger: Ledger::new(),
            options,
        }
    }

    /// Use a different ledger table
    pub fn with_ledger(mut self, ledger: Ledger) -> Self {
        self.ledger = ledger;
        self
    }

    /// Get the ledger
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Get the execution options
    pub fn options(&self) -> &MigrateOptions {
        &self.options
    }

    /// Apply every migration in `migrations` that is not yet in the ledger, oldest first
    pub async fn up(
        &self,
        db: &mut dyn DatabaseConnection,
        migrations: &[Arc<dyn Migration>],
    ) -> MigrationResult<MigrationRunResult> {
        let start_time = Instant::now();
        let executed = self.run_with_deadline(db, migrations, Direction::Up).await?;

        Ok(MigrationRunResult {
            applied_count: executed.len(),
            skipped_count: migrations.len() - executed.len(),
            applied_migrations: executed,
            execution_time_ms: start_time.elapsed().as_millis(),
        })
    }

    /// Roll back every migration in `migrations` that is in the ledger, newest first.
    ///
    /// To roll back only part of the history, pass a truncated slice (see [`Migrator::plan`]).
    pub async fn down(
        &self,
        db: &mut dyn DatabaseConnection,
        migrations: &[Arc<dyn Migration>],
    ) -> MigrationResult<RollbackResult> {
        let start_time = Instant::now();
        let executed = self.run_with_deadline(db, migrations, Direction::Down).await?;

        Ok(RollbackResult {
            rolled_back_count: executed.len(),
            rolled_back_migrations: executed,
            execution_time_ms: start_time.elapsed().as_millis(),
        })
    }

    /// Migrations a run in `direction` would execute, in execution order
    pub async fn plan(
        &self,
        db: &mut dyn DatabaseConnection,
        migrations: &[Arc<dyn Migration>],
        direction: Direction,
    ) -> MigrationResult<Vec<Arc<dyn Migration>>> {
        self.ledger.ensure(db.as_handle()).await?;
        let applied = self.ledger.applied_set(db.as_handle()).await?;
        Ok(select(migrations, &applied, direction))
    }

    /// Migrations `up` would apply, oldest first
    pub async fn pending(
        &self,
        db: &mut dyn DatabaseConnection,
        migrations: &[Arc<dyn Migration>],
    ) -> MigrationResult<Vec<Arc<dyn Migration>>> {
        self.plan(db, migrations, Direction::Up).await
    }

    /// Applied/pending state of every candidate migration, oldest first
    pub async fn status(
        &self,
        db: &mut dyn DatabaseConnection,
        migrations: &[Arc<dyn Migration>],
    ) -> MigrationResult<Vec<MigrationStatusEntry>> {
        self.ledger.ensure(db.as_handle()).await?;
        let applied = self.ledger.applied_set(db.as_handle()).await?;

        let mut ordered: Vec<Arc<dyn Migration>> = migrations.to_vec();
        ordered.sort_by(|a, b| chronological(a.as_ref(), b.as_ref()));

        Ok(ordered
            .into_iter()
            .map(|migration| {
                let version = migration.version();
                let status = if applied.contains(&version) {
                    MigrationStatus::Applied
                } else {
                    MigrationStatus::Pending
                };
                MigrationStatusEntry {
                    version,
                    name: migration.name().to_string(),
                    timestamp: migration.timestamp(),
                    status,
                }
            })
            .collect())
    }

    async fn run_with_deadline(
        &self,
        db: &mut dyn DatabaseConnection,
        migrations: &[Arc<dyn Migration>],
        direction: Direction,
    ) -> MigrationResult<Vec<String>> {
        let timeout = self.options.timeout();
        match tokio::time::timeout(timeout, self.run(db, migrations, direction)).await {
            Ok(result) => result,
            Err(_) => {
                let err = MigrationError::Timeout(timeout);
                self.options.log(MigrationEvent::RunFailed {
                    direction,
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        db: &mut dyn DatabaseConnection,
        migrations: &[Arc<dyn Migration>],
        direction: Direction,
    ) -> MigrationResult<Vec<String>> {
        let start_time = Instant::now();

        self.ledger.ensure(db.as_handle()).await?;
        let applied = self.ledger.applied_set(db.as_handle()).await?;
        let selected = select(migrations, &applied, direction);

        self.options.log(MigrationEvent::RunStarted {
            direction,
            count: selected.len(),
        });

        let outcome = if selected.is_empty() {
            Ok(Vec::new())
        } else if self.options.global_transaction() {
            self.run_in_global_transaction(db, &selected, direction).await
        } else {
            self.run_each(db, &selected, direction).await
        };

        let event = match &outcome {
            Ok(executed) => MigrationEvent::RunFinished {
                direction,
                count: executed.len(),
                elapsed: start_time.elapsed(),
            },
            Err(err) => MigrationEvent::RunFailed {
                direction,
                error: err.to_string(),
            },
        };
        self.options.log(event);
        outcome
    }

    /// Per-migration mode: each migration commits independently
    async fn run_each(
        &self,
        db: &mut dyn DatabaseConnection,
        selected: &[Arc<dyn Migration>],
        direction: Direction,
    ) -> MigrationResult<Vec<String>> {
        let dialect = db.dialect();
        let mut executed = Vec::with_capacity(selected.len());

        for migration in selected {
            let version = migration.version();
            let started = self.started(direction, &version);

            let result = if migration.use_transaction(direction) {
                self.execute_in_transaction(db, migration.as_ref(), direction, &version).await
            } else {
                self.execute_step(db.as_handle(), dialect, migration.as_ref(), direction, &version).await
            };

            self.finished(direction, &version, started, &result);
            result?;
            executed.push(version);
        }

        Ok(executed)
    }

    /// Global-transaction mode: the whole batch commits or rolls back together
    async fn run_in_global_transaction(
        &self,
        db: &mut dyn DatabaseConnection,
        selected: &[Arc<dyn Migration>],
        direction: Direction,
    ) -> MigrationResult<Vec<String>> {
        let dialect = db.dialect();
        let mut tx = db.begin_transaction().await?;
        let mut executed = Vec::with_capacity(selected.len());

        for migration in selected {
            let version = migration.version();
            if !migration.use_transaction(direction) {
                tracing::warn!(
                    "Migration {} opts out of transactions but runs inside the global transaction",
                    version
                );
            }
            let started = self.started(direction, &version);

            let result = self
                .execute_step(tx.as_handle(), dialect, migration.as_ref(), direction, &version)
                .await;

            if let Err(err) = result {
                self.options.log(MigrationEvent::MigrationFailed {
                    direction,
                    version,
                    error: err.to_string(),
                });
                rollback_quietly(tx).await;
                return Err(err);
            }
            executed.push((version, started.elapsed()));
        }

        tx.commit().await.map_err(|e| {
            MigrationError::Transaction(format!("Failed to commit global transaction: {}", e))
        })?;

        // Success is reported only once the batch is committed
        Ok(executed
            .into_iter()
            .map(|(version, elapsed)| {
                self.options.log(MigrationEvent::MigrationSucceeded {
                    direction,
                    version: version.clone(),
                    elapsed,
                });
                version
            })
            .collect())
    }

    async fn execute_in_transaction(
        &self,
        db: &mut dyn DatabaseConnection,
        migration: &dyn Migration,
        direction: Direction,
        version: &str,
    ) -> MigrationResult<()> {
        let dialect = db.dialect();
        let mut tx = db
            .begin_transaction()
            .await
            .map_err(|e| MigrationError::failed(version, migration.name(), Phase::Begin, e))?;

        if let Err(err) = self
            .execute_step(tx.as_handle(), dialect, migration, direction, version)
            .await
        {
            rollback_quietly(tx).await;
            return Err(err);
        }

        tx.commit()
            .await
            .map_err(|e| MigrationError::failed(version, migration.name(), Phase::Commit, e))
    }

    /// Run the schema operation and update the ledger on the same handle
    async fn execute_step(
        &self,
        handle: &mut dyn DatabaseHandle,
        dialect: SqlDialect,
        migration: &dyn Migration,
        direction: Direction,
        version: &str,
    ) -> MigrationResult<()> {
        migration
            .run(direction, &mut *handle)
            .await
            .map_err(|e| MigrationError::failed(version, migration.name(), Phase::operation(direction), e))?;

        let ledger_update = match direction {
            Direction::Up => self.ledger.record_applied(handle, dialect, version).await,
            Direction::Down => self.ledger.record_rolled_back(handle, dialect, version).await,
        };
        ledger_update.map_err(|e| MigrationError::failed(version, migration.name(), Phase::ledger(direction), e))
    }

    fn started(&self, direction: Direction, version: &str) -> Instant {
        self.options.log(MigrationEvent::MigrationStarted {
            direction,
            version: version.to_string(),
        });
        Instant::now()
    }

    fn finished(&self, direction: Direction, version: &str, started: Instant, result: &MigrationResult<()>) {
        let event = match result {
            Ok(()) => MigrationEvent::MigrationSucceeded {
                direction,
                version: version.to_string(),
                elapsed: started.elapsed(),
            },
            Err(err) => MigrationEvent::MigrationFailed {
                direction,
                version: version.to_string(),
                error: err.to_string(),
            },
        };
        self.options.log(event);
    }
}

async fn rollback_quietly(tx: Box<dyn DatabaseTransaction>) {
    if let Err(e) = tx.rollback().await {
        tracing::warn!("Failed to roll back migration transaction: {}", e);
    }
}

/// Order by timestamp, then by name for equal timestamps
fn chronological(a: &dyn Migration, b: &dyn Migration) -> Ordering {
    a.timestamp()
        .cmp(&b.timestamp())
        .then_with(|| a.name().cmp(b.name()))
}

/// Pick the migrations a run in `direction` acts on, in execution order.
///
/// `Up` takes those absent from the ledger, oldest first; `Down` takes those present,
/// newest first.
fn select(
    migrations: &[Arc<dyn Migration>],
    applied: &HashSet<String>,
    direction: Direction,
) -> Vec<Arc<dyn Migration>> {
    let want_applied = direction == Direction::Down;
    let mut selected: Vec<Arc<dyn Migration>> = migrations
        .iter()
        .filter(|m| applied.contains(&m.version()) == want_applied)
        .cloned()
        .collect();

    selected.sort_by(|a, b| chronological(a.as_ref(), b.as_ref()));
    if direction == Direction::Down {
        selected.reverse();
    }
    selected
}
