//! Version Ledger - the table recording which migration versions are applied
//!
//! The ledger is a single `version` column acting as primary key. Rows are inserted when a
//! migration is applied and deleted when it is rolled back; nothing else is stored so the
//! table stays interoperable with existing `schema_migrations` deployments.

use std::collections::HashSet;

use crate::backends::{DatabaseHandle, DatabaseValue, SqlDialect};
use crate::error::{MigrationError, MigrationResult};

/// Default ledger table name
pub const DEFAULT_LEDGER_TABLE: &str = "schema_migrations";

/// Reads and writes the applied-version ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ledger {
    table: String,
}

impl Ledger {
    /// Ledger backed by the default `schema_migrations` table
    pub fn new() -> Self {
        Self {
            table: DEFAULT_LEDGER_TABLE.to_string(),
        }
    }

    /// Ledger backed by a custom table.
    ///
    /// The name is spliced into SQL, so anything other than a plain (optionally
    /// schema-qualified) identifier is rejected.
    pub fn with_table(table: impl Into<String>) -> MigrationResult<Self> {
        let table = table.into();
        if !is_valid_table_name(&table) {
            return Err(MigrationError::Configuration(format!(
                "'{}' is not a valid ledger table name",
                table
            )));
        }
        Ok(Self { table })
    }

    /// Get the ledger table name
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the ledger table if it does not exist
    pub async fn ensure(&self, db: &mut dyn DatabaseHandle) -> MigrationResult<()> {
        db.execute(&self.create_table_sql(), &[])
            .await
            .map_err(|e| MigrationError::Bootstrap(e.to_string()))?;
        Ok(())
    }

    /// Fetch every applied version identifier
    pub async fn applied_set(&self, db: &mut dyn DatabaseHandle) -> MigrationResult<HashSet<String>> {
        let rows = db
            .fetch_all(&self.applied_versions_sql(), &[])
            .await
            .map_err(|e| MigrationError::Diff(e.to_string()))?;

        let mut applied = HashSet::with_capacity(rows.len());
        for row in rows {
            let version = row
                .get_by_index(0)
                .and_then(DatabaseValue::into_string)
                .map_err(|e| MigrationError::Diff(format!("Failed to read version column: {}", e)))?;
            applied.insert(version);
        }

        Ok(applied)
    }

    /// Record `version` as applied
    pub async fn record_applied(&self, db: &mut dyn DatabaseHandle, dialect: SqlDialect, version: &str) -> MigrationResult<()> {
        db.execute(&self.insert_version_sql(dialect), &[version.into()]).await?;
        Ok(())
    }

    /// Remove `version` from the ledger
    pub async fn record_rolled_back(&self, db: &mut dyn DatabaseHandle, dialect: SqlDialect, version: &str) -> MigrationResult<()> {
        db.execute(&self.delete_version_sql(dialect), &[version.into()]).await?;
        Ok(())
    }

    /// SQL to create the ledger table
    pub fn create_table_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    \
                version VARCHAR NOT NULL PRIMARY KEY\n\
            )",
            self.table
        )
    }

    /// SQL to list applied versions
    pub fn applied_versions_sql(&self) -> String {
        format!("SELECT version FROM {}", self.table)
    }

    /// SQL to record a version as applied
    pub fn insert_version_sql(&self, dialect: SqlDialect) -> String {
        format!(
            "INSERT INTO {} (version) VALUES ({})",
            self.table,
            dialect.parameter_placeholder(0)
        )
    }

    /// SQL to remove a version record
    pub fn delete_version_sql(&self, dialect: SqlDialect) -> String {
        format!(
            "DELETE FROM {} WHERE version = {}",
            self.table,
            dialect.parameter_placeholder(0)
        )
    }
}

/// Plain SQL identifier, optionally schema-qualified (`schema.table`)
pub fn is_valid_table_name(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}
