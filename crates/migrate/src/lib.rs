//! # tidemark: schema migrations for SQL databases
//!
//! Applies and rolls back an ordered set of migrations against a database, recording the
//! applied versions in a `schema_migrations` ledger table so repeated runs are idempotent.
//!
//! Migrations are either programmatic (implement [`Migration`] or use [`FnMigration`]) or
//! SQL files named `{YYYYMMDDHHMMSS}_{name}.sql` with `-- migrate:up` / `-- migrate:down`
//! sections (see [`SqlMigration`]). A [`Migrator`] runs them on a caller-owned
//! [`DatabaseConnection`], either one transaction per migration or the whole batch in a
//! single transaction.
//!
//! ```ignore
//! let mut db = tidemark::backends::connect("sqlite://app.db").await?;
//! let migrations = tidemark::load_migrations_dir("migrations".as_ref())?
//!     .into_iter()
//!     .map(|m| Arc::new(m) as Arc<dyn Migration>)
//!     .collect::<Vec<_>>();
//!
//! let migrator = Migrator::new(MigrateOptions::new().with_global_transaction(true));
//! let report = migrator.up(&mut *db, &migrations).await?;
//! ```

pub mod backends;
pub mod config;
pub mod error;
pub mod migrations;

pub use backends::{
    DatabaseBackendType, DatabaseConnection, DatabaseHandle, DatabaseTransaction, SqlDialect,
};
pub use config::*;
pub use error::*;
pub use migrations::*;
