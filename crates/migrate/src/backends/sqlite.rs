//! SQLite Backend Implementation
//!
//! Implements the backend traits on top of a `sqlx` SQLite pool. The pool is capped at a
//! single connection so that `sqlite::memory:` databases survive for the pool's lifetime.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow as RawSqliteRow};
use sqlx::{Column, Executor, Row as SqlxRow, Sqlite, TypeInfo, ValueRef};

use super::core::*;
use crate::error::{MigrationError, MigrationResult};

/// SQLite connection pool handed to the migrator
#[derive(Debug, Clone)]
pub struct SqlitePool {
    pool: sqlx::SqlitePool,
}

impl SqlitePool {
    /// Wrap an existing pool
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a single-connection pool from a database URL, creating the file if missing
    pub async fn connect(database_url: &str) -> MigrationResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| MigrationError::Connection(format!("Invalid SQLite URL: {}", e)))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| MigrationError::Connection(format!("Failed to create SQLite pool: {}", e)))?;

        Ok(Self::new(pool))
    }

    /// Open a private in-memory database
    pub async fn in_memory() -> MigrationResult<Self> {
        Self::connect("sqlite::memory:").await
    }

    /// Get the underlying sqlx pool
    pub fn inner(&self) -> &sqlx::SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl DatabaseHandle for SqlitePool {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<u64> {
        let result = if params.is_empty() {
            (&self.pool).execute(sql).await
        } else {
            bind_all(sqlx::query(sql), params).execute(&self.pool).await
        };
        let result = result.map_err(|e| MigrationError::Database(format!("Query execution failed: {}", e)))?;

        Ok(result.rows_affected())
    }

    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<Vec<Box<dyn DatabaseRow>>> {
        let rows = bind_all(sqlx::query(sql), params)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MigrationError::Database(format!("Query fetch failed: {}", e)))?;

        Ok(rows.into_iter().map(|row| Box::new(SqliteRow::new(row)) as Box<dyn DatabaseRow>).collect())
    }
}

#[async_trait]
impl DatabaseConnection for SqlitePool {
    async fn begin_transaction(&mut self) -> MigrationResult<Box<dyn DatabaseTransaction>> {
        let tx = self.pool.begin()
            .await
            .map_err(|e| MigrationError::Transaction(format!("Failed to begin transaction: {}", e)))?;

        Ok(Box::new(SqliteTransaction::new(tx)))
    }

    fn dialect(&self) -> SqlDialect {
        SqlDialect::SQLite
    }

    fn as_handle(&mut self) -> &mut dyn DatabaseHandle {
        self
    }
}

/// SQLite transaction implementation
pub struct SqliteTransaction {
    tx: Option<sqlx::Transaction<'static, Sqlite>>,
}

impl SqliteTransaction {
    pub fn new(tx: sqlx::Transaction<'static, Sqlite>) -> Self {
        Self { tx: Some(tx) }
    }

    fn active(&mut self) -> MigrationResult<&mut sqlx::Transaction<'static, Sqlite>> {
        self.tx.as_mut().ok_or_else(|| MigrationError::Transaction("Transaction already completed".to_string()))
    }
}

#[async_trait]
impl DatabaseHandle for SqliteTransaction {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<u64> {
        let tx = self.active()?;

        let result = if params.is_empty() {
            (&mut **tx).execute(sql).await
        } else {
            bind_all(sqlx::query(sql), params).execute(&mut **tx).await
        };
        let result = result.map_err(|e| MigrationError::Database(format!("Query execution failed: {}", e)))?;

        Ok(result.rows_affected())
    }

    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<Vec<Box<dyn DatabaseRow>>> {
        let tx = self.active()?;

        let rows = bind_all(sqlx::query(sql), params)
            .fetch_all(&mut **tx)
            .await
            .map_err(|e| MigrationError::Database(format!("Query fetch failed: {}", e)))?;

        Ok(rows.into_iter().map(|row| Box::new(SqliteRow::new(row)) as Box<dyn DatabaseRow>).collect())
    }
}

#[async_trait]
impl DatabaseTransaction for SqliteTransaction {
    async fn commit(mut self: Box<Self>) -> MigrationResult<()> {
        let tx = self.tx.take().ok_or_else(|| MigrationError::Transaction("Transaction already completed".to_string()))?;

        tx.commit()
            .await
            .map_err(|e| MigrationError::Transaction(format!("Transaction commit failed: {}", e)))
    }

    async fn rollback(mut self: Box<Self>) -> MigrationResult<()> {
        let tx = self.tx.take().ok_or_else(|| MigrationError::Transaction("Transaction already completed".to_string()))?;

        tx.rollback()
            .await
            .map_err(|e| MigrationError::Transaction(format!("Transaction rollback failed: {}", e)))
    }

    fn as_handle(&mut self) -> &mut dyn DatabaseHandle {
        self
    }
}

/// SQLite row implementation
pub struct SqliteRow {
    row: RawSqliteRow,
}

impl SqliteRow {
    pub fn new(row: RawSqliteRow) -> Self {
        Self { row }
    }
}

impl DatabaseRow for SqliteRow {
    fn get_by_index(&self, index: usize) -> MigrationResult<DatabaseValue> {
        sqlite_value_to_database_value(&self.row, index)
    }

    fn get_by_name(&self, name: &str) -> MigrationResult<DatabaseValue> {
        let index = self.row.columns().iter().position(|col| col.name() == name)
            .ok_or_else(|| MigrationError::Database(format!("Column '{}' not found", name)))?;

        sqlite_value_to_database_value(&self.row, index)
    }

    fn column_count(&self) -> usize {
        self.row.len()
    }

    fn column_names(&self) -> Vec<String> {
        self.row.columns().iter().map(|col| col.name().to_string()).collect()
    }
}

type LiteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

fn bind_all<'q>(mut query: LiteQuery<'q>, params: &[DatabaseValue]) -> LiteQuery<'q> {
    for value in params {
        query = match value {
            DatabaseValue::Null => query.bind(Option::<String>::None),
            DatabaseValue::Bool(b) => query.bind(*b),
            DatabaseValue::Int32(i) => query.bind(*i),
            DatabaseValue::Int64(i) => query.bind(*i),
            DatabaseValue::Float64(f) => query.bind(*f),
            DatabaseValue::String(s) => query.bind(s.clone()),
            DatabaseValue::Bytes(b) => query.bind(b.clone()),
            DatabaseValue::DateTime(dt) => query.bind(*dt),
        };
    }
    query
}

/// Convert a SQLite column value to DatabaseValue
fn sqlite_value_to_database_value(row: &RawSqliteRow, index: usize) -> MigrationResult<DatabaseValue> {
    let raw = row.try_get_raw(index)
        .map_err(|e| MigrationError::Database(format!("Failed to read column {}: {}", index, e)))?;
    if raw.is_null() {
        return Ok(DatabaseValue::Null);
    }
    let type_name = raw.type_info().name().to_string();

    let decode_err = |e: sqlx::Error| {
        MigrationError::Database(format!("Failed to decode {} column {}: {}", type_name, index, e))
    };

    let value = match type_name.as_str() {
        "BOOLEAN" => DatabaseValue::Bool(row.try_get(index).map_err(decode_err)?),
        "INTEGER" => DatabaseValue::Int64(row.try_get(index).map_err(decode_err)?),
        "REAL" => DatabaseValue::Float64(row.try_get(index).map_err(decode_err)?),
        "BLOB" => DatabaseValue::Bytes(row.try_get(index).map_err(decode_err)?),
        "DATETIME" => DatabaseValue::DateTime(row.try_get(index).map_err(decode_err)?),
        _ => DatabaseValue::String(row.try_get(index).map_err(decode_err)?),
    };

    Ok(value)
}
