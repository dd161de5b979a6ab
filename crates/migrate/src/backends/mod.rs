//! Database Backend Abstractions
//!
//! The migrator talks to the database only through the traits in [`core`]. PostgreSQL and
//! SQLite implementations are provided on top of `sqlx`.

pub mod core;
pub mod postgres;
pub mod sqlite;

// Re-export core traits and types
pub use self::core::*;
pub use postgres::{PostgresPool, PostgresTransaction};
pub use sqlite::{SqlitePool, SqliteTransaction};

use crate::error::{MigrationError, MigrationResult};

/// Database backend type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseBackendType {
    PostgreSQL,
    SQLite,
}

impl DatabaseBackendType {
    /// Detect database backend type from URL
    pub fn from_url(url: &str) -> MigrationResult<Self> {
        if url.starts_with("postgresql://") || url.starts_with("postgres://") {
            Ok(DatabaseBackendType::PostgreSQL)
        } else if url.starts_with("sqlite:") {
            Ok(DatabaseBackendType::SQLite)
        } else {
            Err(MigrationError::Connection(format!(
                "Unable to detect database backend from URL: {}",
                url
            )))
        }
    }
}

impl std::fmt::Display for DatabaseBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseBackendType::PostgreSQL => write!(f, "postgresql"),
            DatabaseBackendType::SQLite => write!(f, "sqlite"),
        }
    }
}

/// Open a connection pool for the backend named by the URL scheme
pub async fn connect(database_url: &str) -> MigrationResult<Box<dyn DatabaseConnection>> {
    let backend = DatabaseBackendType::from_url(database_url)?;
    tracing::debug!("Connecting to {} database", backend);

    match backend {
        DatabaseBackendType::PostgreSQL => Ok(Box::new(PostgresPool::connect(database_url).await?)),
        DatabaseBackendType::SQLite => Ok(Box::new(SqlitePool::connect(database_url).await?)),
    }
}
