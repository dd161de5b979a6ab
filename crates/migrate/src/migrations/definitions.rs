//! Migration Definitions - Core types shared across the migration system
//!
//! Directions, version identifiers, status records and the reports returned by a run.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Timestamp layout used in version identifiers and file names (UTC)
pub const VERSION_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Migration direction for execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Apply the migration (run UP statements)
    Up,
    /// Rollback the migration (run DOWN statements)
    Down,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Format the version identifier `{YYYYMMDDHHMMSS}_{name}` for a migration
pub fn format_version(name: &str, at: &DateTime<Utc>) -> String {
    format!("{}_{}", at.format(VERSION_TIMESTAMP_FORMAT), name)
}

/// Migration status in the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationStatus {
    /// Migration is pending (not yet applied)
    Pending,
    /// Migration has been applied
    Applied,
}

/// Status of one candidate migration as reported by `Migrator::status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatusEntry {
    pub version: String,
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub status: MigrationStatus,
}

/// Result of running migrations
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationRunResult {
    /// Number of migrations that were applied
    pub applied_count: usize,
    /// Versions of migrations that were applied, in execution order
    pub applied_migrations: Vec<String>,
    /// Number of candidate migrations that were skipped (already applied)
    pub skipped_count: usize,
    /// Total execution time in milliseconds
    pub execution_time_ms: u128,
}

/// Result of rolling back migrations
#[derive(Debug, Clone, Default, Serialize)]
pub struct RollbackResult {
    /// Number of migrations that were rolled back
    pub rolled_back_count: usize,
    /// Versions of migrations that were rolled back, in execution order
    pub rolled_back_migrations: Vec<String>,
    /// Total execution time in milliseconds
    pub execution_time_ms: u128,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_version_format() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 9, 5, 3).unwrap();
        assert_eq!(format_version("create_users", &at), "20240101090503_create_users");
    }

    #[test]
    fn test_direction_display() {
        assert_eq!(Direction::Up.to_string(), "up");
        assert_eq!(Direction::Down.as_str(), "down");
        assert_eq!(serde_json::to_string(&Direction::Down).unwrap(), "\"down\"");
    }
}
