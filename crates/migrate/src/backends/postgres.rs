//! PostgreSQL Backend Implementation
//!
//! Implements the backend traits on top of a `sqlx` PostgreSQL pool.

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::{Column, Executor, PgPool, Postgres, Row as SqlxRow, TypeInfo, ValueRef};

use super::core::*;
use crate::error::{MigrationError, MigrationResult};

/// PostgreSQL connection pool handed to the migrator
#[derive(Debug, Clone)]
pub struct PostgresPool {
    pool: PgPool,
}

impl PostgresPool {
    /// Wrap an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a pool from a database URL
    pub async fn connect(database_url: &str) -> MigrationResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| MigrationError::Connection(format!("Failed to create PostgreSQL pool: {}", e)))?;

        Ok(Self::new(pool))
    }

    /// Get the underlying sqlx pool
    pub fn inner(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl DatabaseHandle for PostgresPool {
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

        Ok(rows.into_iter().map(|row| Box::new(PostgresRow::new(row)) as Box<dyn DatabaseRow>).collect())
    }
}

#[async_trait]
impl DatabaseConnection for PostgresPool {
    async fn begin_transaction(&mut self) -> MigrationResult<Box<dyn DatabaseTransaction>> {
        let tx = self.pool.begin()
            .await
            .map_err(|e| MigrationError::Transaction(format!("Failed to begin transaction: {}", e)))?;

        Ok(Box::new(PostgresTransaction::new(tx)))
    }

    fn dialect(&self) -> SqlDialect {
        SqlDialect::PostgreSQL
    }

    fn as_handle(&mut self) -> &mut dyn DatabaseHandle {
        self
    }
}

/// PostgreSQL transaction implementation
pub struct PostgresTransaction {
    tx: Option<sqlx::Transaction<'static, Postgres>>,
}

impl PostgresTransaction {
    pub fn new(tx: sqlx::Transaction<'static, Postgres>) -> Self {
        Self { tx: Some(tx) }
    }

    fn active(&mut self) -> MigrationResult<&mut sqlx::Transaction<'static, Postgres>> {
        self.tx.as_mut().ok_or_else(|| MigrationError::Transaction("Transaction already completed".to_string()))
    }
}

#[async_trait]
impl DatabaseHandle for PostgresTransaction {
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

        Ok(rows.into_iter().map(|row| Box::new(PostgresRow::new(row)) as Box<dyn DatabaseRow>).collect())
    }
}

#[async_trait]
impl DatabaseTransaction for PostgresTransaction {
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

/// PostgreSQL row implementation
pub struct PostgresRow {
    row: PgRow,
}

impl PostgresRow {
    pub fn new(row: PgRow) -> Self {
        Self { row }
    }
}

impl DatabaseRow for PostgresRow {
    fn get_by_index(&self, index: usize) -> MigrationResult<DatabaseValue> {
        postgres_value_to_database_value(&self.row, index)
    }

    fn get_by_name(&self, name: &str) -> MigrationResult<DatabaseValue> {
        let index = self.row.columns().iter().position(|col| col.name() == name)
            .ok_or_else(|| MigrationError::Database(format!("Column '{}' not found", name)))?;

        postgres_value_to_database_value(&self.row, index)
    }

    fn column_count(&self) -> usize {
        self.row.len()
    }

    fn column_names(&self) -> Vec<String> {
        self.row.columns().iter().map(|col| col.name().to_string()).collect()
    }
}

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

/// Bind every DatabaseValue to a sqlx query
fn bind_all<'q>(mut query: PgQuery<'q>, params: &[DatabaseValue]) -> PgQuery<'q> {
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

/// Convert a PostgreSQL column value to DatabaseValue
fn postgres_value_to_database_value(row: &PgRow, index: usize) -> MigrationResult<DatabaseValue> {
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
        "BOOL" => DatabaseValue::Bool(row.try_get(index).map_err(decode_err)?),
        "INT2" => DatabaseValue::Int32(i32::from(row.try_get::<i16, _>(index).map_err(decode_err)?)),
        "INT4" => DatabaseValue::Int32(row.try_get(index).map_err(decode_err)?),
        "INT8" => DatabaseValue::Int64(row.try_get(index).map_err(decode_err)?),
        "FLOAT4" => DatabaseValue::Float64(f64::from(row.try_get::<f32, _>(index).map_err(decode_err)?)),
        "FLOAT8" => DatabaseValue::Float64(row.try_get(index).map_err(decode_err)?),
        "BYTEA" => DatabaseValue::Bytes(row.try_get(index).map_err(decode_err)?),
        "TIMESTAMPTZ" => DatabaseValue::DateTime(row.try_get(index).map_err(decode_err)?),
        "TIMESTAMP" => {
            let naive: chrono::NaiveDateTime = row.try_get(index).map_err(decode_err)?;
            DatabaseValue::DateTime(naive.and_utc())
        }
        _ => DatabaseValue::String(row.try_get(index).map_err(decode_err)?),
    };

    Ok(value)
}
