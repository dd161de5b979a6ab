//! Environment-driven configuration for migration drivers

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::error::MigrationResult;
use crate::migrations::{is_valid_table_name, Ledger, MigrateOptions, DEFAULT_LEDGER_TABLE};

/// Configuration for a process that runs migrations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigratorConfig {
    pub database_url: String,
    pub migrations_dir: PathBuf,
    pub table: String,
    pub timeout: Duration,
    pub global_transaction: bool,
}

impl MigratorConfig {
    /// Configuration for `database_url` with every other field at its default
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            migrations_dir: PathBuf::from("migrations"),
            table: DEFAULT_LEDGER_TABLE.to_string(),
            timeout: Duration::from_secs(15),
            global_transaction: false,
        }
    }

    /// Load configuration from environment variables
    ///
    /// | Variable                 | Default             |
    /// |--------------------------|---------------------|
    /// | `DATABASE_URL`           | required            |
    /// | `MIGRATIONS_DIR`         | `migrations`        |
    /// | `MIGRATIONS_TABLE`       | `schema_migrations` |
    /// | `MIGRATION_TIMEOUT_SECS` | `15`                |
    /// | `MIGRATION_GLOBAL_TX`    | `false`             |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = get_required(&lookup, "DATABASE_URL")?;
        let migrations_dir = get_or_default(&lookup, "MIGRATIONS_DIR", "migrations");
        let table = get_or_default(&lookup, "MIGRATIONS_TABLE", DEFAULT_LEDGER_TABLE);

        let timeout = get_or_default(&lookup, "MIGRATION_TIMEOUT_SECS", "15");
        let timeout = timeout.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
            field: "timeout".to_string(),
            value: timeout.clone(),
            expected: "whole number of seconds".to_string(),
        })?;

        let global_transaction = get_or_default(&lookup, "MIGRATION_GLOBAL_TX", "false");
        let global_transaction = parse_flag(&global_transaction).ok_or_else(|| ConfigError::InvalidValue {
            field: "global_transaction".to_string(),
            value: global_transaction.clone(),
            expected: "true or false".to_string(),
        })?;

        Ok(Self {
            database_url,
            migrations_dir: PathBuf::from(migrations_dir),
            table,
            timeout: Duration::from_secs(timeout),
            global_transaction,
        })
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::ValidationFailed {
                field: "database_url".to_string(),
                reason: "Database URL cannot be empty".to_string(),
            });
        }

        if self.timeout.is_zero() {
            return Err(ConfigError::ValidationFailed {
                field: "timeout".to_string(),
                reason: "Timeout must be greater than zero".to_string(),
            });
        }

        if !is_valid_table_name(&self.table) {
            return Err(ConfigError::ValidationFailed {
                field: "table".to_string(),
                reason: format!("'{}' is not a valid table name", self.table),
            });
        }

        Ok(())
    }

    /// Execution options for a run with this configuration
    pub fn to_options(&self) -> MigrateOptions {
        MigrateOptions::new()
            .with_global_transaction(self.global_transaction)
            .with_timeout(self.timeout)
    }

    /// Ledger for the configured table
    pub fn ledger(&self) -> MigrationResult<Ledger> {
        Ledger::with_table(self.table.clone())
    }
}

fn get_required<F>(lookup: &F, key: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).ok_or_else(|| ConfigError::MissingEnvVar { var: key.to_string() })
}

fn get_or_default<F>(lookup: &F, key: &str, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).unwrap_or_else(|| default.to_string())
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {var}")]
    MissingEnvVar { var: String },

    #[error("Invalid value for {field}: '{value}', expected {expected}")]
    InvalidValue { field: String, value: String, expected: String },

    #[error("Validation failed for {field}: {reason}")]
    ValidationFailed { field: String, reason: String },
}
