//! Core Database Backend Traits
//!
//! A migration receives one uniform handle whether it runs against a live connection or
//! inside an open transaction. [`DatabaseHandle`] is that handle; [`DatabaseConnection`]
//! and [`DatabaseTransaction`] extend it with the capabilities only the migrator uses.

use async_trait::async_trait;

use crate::error::{MigrationError, MigrationResult};

/// Statement execution capability shared by connections and transactions
#[async_trait]
pub trait DatabaseHandle: Send {
    /// Execute a statement and return the affected row count.
    ///
    /// With no parameters the text is sent unprepared, so a block of several
    /// `;`-separated statements runs as one batch.
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<u64>;

    /// Execute a query and return the result rows
    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<Vec<Box<dyn DatabaseRow>>>;
}

/// Caller-owned connection (usually a pool) the migrator runs against
#[async_trait]
pub trait DatabaseConnection: DatabaseHandle {
    /// Begin a transaction
    async fn begin_transaction(&mut self) -> MigrationResult<Box<dyn DatabaseTransaction>>;

    /// SQL dialect spoken by this connection
    fn dialect(&self) -> SqlDialect;

    /// View this connection as a plain handle
    fn as_handle(&mut self) -> &mut dyn DatabaseHandle;
}

/// Open transaction
#[async_trait]
pub trait DatabaseTransaction: DatabaseHandle {
    /// Commit the transaction
    async fn commit(self: Box<Self>) -> MigrationResult<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> MigrationResult<()>;

    /// View this transaction as a plain handle
    fn as_handle(&mut self) -> &mut dyn DatabaseHandle;
}

/// Abstract database row trait
pub trait DatabaseRow: Send {
    /// Get a column value by index
    fn get_by_index(&self, index: usize) -> MigrationResult<DatabaseValue>;

    /// Get a column value by name
    fn get_by_name(&self, name: &str) -> MigrationResult<DatabaseValue>;

    /// Get column count
    fn column_count(&self) -> usize;

    /// Get column names
    fn column_names(&self) -> Vec<String>;
}

/// Database value enumeration for parameter binding and row access
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    DateTime(chrono::DateTime<chrono::Utc>),
}

impl DatabaseValue {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }

    /// Borrow the value as a string slice, if it is textual
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DatabaseValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Read the value as an integer, widening 32-bit values
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DatabaseValue::Int32(i) => Some(i64::from(*i)),
            DatabaseValue::Int64(i) => Some(*i),
            _ => None,
        }
    }

    /// Consume the value as an owned string or fail with a descriptive error
    pub fn into_string(self) -> MigrationResult<String> {
        match self {
            DatabaseValue::String(s) => Ok(s),
            other => Err(MigrationError::Database(format!(
                "Expected a text value, found {:?}",
                other
            ))),
        }
    }
}

impl From<bool> for DatabaseValue {
    fn from(value: bool) -> Self {
        DatabaseValue::Bool(value)
    }
}

impl From<i32> for DatabaseValue {
    fn from(value: i32) -> Self {
        DatabaseValue::Int32(value)
    }
}

impl From<i64> for DatabaseValue {
    fn from(value: i64) -> Self {
        DatabaseValue::Int64(value)
    }
}

impl From<f64> for DatabaseValue {
    fn from(value: f64) -> Self {
        DatabaseValue::Float64(value)
    }
}

impl From<String> for DatabaseValue {
    fn from(value: String) -> Self {
        DatabaseValue::String(value)
    }
}

impl From<&str> for DatabaseValue {
    fn from(value: &str) -> Self {
        DatabaseValue::String(value.to_string())
    }
}

impl From<Vec<u8>> for DatabaseValue {
    fn from(value: Vec<u8>) -> Self {
        DatabaseValue::Bytes(value)
    }
}

impl From<chrono::DateTime<chrono::Utc>> for DatabaseValue {
    fn from(value: chrono::DateTime<chrono::Utc>) -> Self {
        DatabaseValue::DateTime(value)
    }
}

impl<T> From<Option<T>> for DatabaseValue
where
    T: Into<DatabaseValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => DatabaseValue::Null,
        }
    }
}

/// SQL dialect enumeration for generating database-specific SQL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    PostgreSQL,
    SQLite,
}

impl SqlDialect {
    /// Get the parameter placeholder for the zero-based parameter `index`
    pub fn parameter_placeholder(&self, index: usize) -> String {
        match self {
            SqlDialect::PostgreSQL => format!("${}", index + 1),
            SqlDialect::SQLite => "?".to_string(),
        }
    }
}
