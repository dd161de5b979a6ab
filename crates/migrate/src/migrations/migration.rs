//! Migration abstraction
//!
//! A [`Migration`] is one unit of schema change with a forward and a backward operation.
//! Its identity is the pair `(name, timestamp)`, formatted as the version identifier
//! `{YYYYMMDDHHMMSS}_{name}` under which it is recorded in the ledger.
//!
//! Implement the trait directly for programmatic migrations, or use [`FnMigration`] to
//! build one from closures. SQL file migrations live in [`super::sql`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

use super::definitions::{format_version, Direction};
use crate::backends::DatabaseHandle;
use crate::error::{MigrationError, MigrationResult};

/// A unit of schema change
///
/// The handle passed to [`Migration::up`] and [`Migration::down`] is either the caller's
/// connection or an open transaction; implementations must not assume which.
#[async_trait]
pub trait Migration: Send + Sync {
    /// Human-readable name, the second half of the version identifier
    fn name(&self) -> &str;

    /// Timestamp that orders this migration relative to the others
    fn timestamp(&self) -> DateTime<Utc>;

    /// Whether the operation for `direction` runs inside a transaction.
    ///
    /// Override to return `false` for statements that cannot run in a transaction,
    /// such as `CREATE INDEX CONCURRENTLY`.
    fn use_transaction(&self, _direction: Direction) -> bool {
        true
    }

    /// Apply the schema change
    async fn up(&self, db: &mut dyn DatabaseHandle) -> MigrationResult<()>;

    /// Revert the schema change
    async fn down(&self, db: &mut dyn DatabaseHandle) -> MigrationResult<()>;

    /// `(name, timestamp)` pair used for ordering and version formatting
    fn identity(&self) -> (&str, DateTime<Utc>) {
        (self.name(), self.timestamp())
    }

    /// Version identifier recorded in the ledger
    fn version(&self) -> String {
        format_version(self.name(), &self.timestamp())
    }

    /// Run the operation for `direction`
    async fn run(&self, direction: Direction, db: &mut dyn DatabaseHandle) -> MigrationResult<()> {
        match direction {
            Direction::Up => self.up(db).await,
            Direction::Down => self.down(db).await,
        }
    }
}

/// Boxed migration operation accepted by [`FnMigration`]
pub type MigrationFn =
    Box<dyn for<'a> Fn(&'a mut dyn DatabaseHandle) -> BoxFuture<'a, MigrationResult<()>> + Send + Sync>;

/// Programmatic migration built from closures
///
/// ```ignore
/// let migration = FnMigration::new("add_index", at, |db| {
///     Box::pin(async move {
///         db.execute("CREATE INDEX CONCURRENTLY idx_users_email ON users (email)", &[]).await?;
///         Ok(())
///     })
/// })
/// .with_up_transaction(false);
/// ```
pub struct FnMigration {
    name: String,
    timestamp: DateTime<Utc>,
    up: MigrationFn,
    down: Option<MigrationFn>,
    up_transaction: bool,
    down_transaction: bool,
}

impl FnMigration {
    /// Create a migration with a forward operation and no backward operation
    pub fn new<U>(name: impl Into<String>, timestamp: DateTime<Utc>, up: U) -> Self
    where
        U: for<'a> Fn(&'a mut dyn DatabaseHandle) -> BoxFuture<'a, MigrationResult<()>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            timestamp,
            up: Box::new(up),
            down: None,
            up_transaction: true,
            down_transaction: true,
        }
    }

    /// Set the backward operation
    pub fn with_down<D>(mut self, down: D) -> Self
    where
        D: for<'a> Fn(&'a mut dyn DatabaseHandle) -> BoxFuture<'a, MigrationResult<()>> + Send + Sync + 'static,
    {
        self.down = Some(Box::new(down));
        self
    }

    /// Choose whether the forward operation runs in a transaction
    pub fn with_up_transaction(mut self, use_transaction: bool) -> Self {
        self.up_transaction = use_transaction;
        self
    }

    /// Choose whether the backward operation runs in a transaction
    pub fn with_down_transaction(mut self, use_transaction: bool) -> Self {
        self.down_transaction = use_transaction;
        self
    }
}

impl std::fmt::Debug for FnMigration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnMigration")
            .field("name", &self.name)
            .field("timestamp", &self.timestamp)
            .field("has_down", &self.down.is_some())
            .field("up_transaction", &self.up_transaction)
            .field("down_transaction", &self.down_transaction)
            .finish()
    }
}

#[async_trait]
impl Migration for FnMigration {
    fn name(&self) -> &str {
        &self.name
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn use_transaction(&self, direction: Direction) -> bool {
        match direction {
            Direction::Up => self.up_transaction,
            Direction::Down => self.down_transaction,
        }
    }

    async fn up(&self, db: &mut dyn DatabaseHandle) -> MigrationResult<()> {
        (self.up)(db).await
    }

    async fn down(&self, db: &mut dyn DatabaseHandle) -> MigrationResult<()> {
        match &self.down {
            Some(down) => down(db).await,
            None => Err(MigrationError::MissingDown { version: self.version() }),
        }
    }
}
