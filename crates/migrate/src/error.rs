//! Error types for the migration engine
//!
//! Every failure that can stop a run is a [`MigrationError`]. Failures raised while a
//! specific migration is being processed are wrapped in [`MigrationError::Failed`] so the
//! caller always learns which version broke and in which phase.

use std::fmt;
use std::time::Duration;

use crate::migrations::definitions::Direction;

/// Result type alias for migration operations
pub type MigrationResult<T> = Result<T, MigrationError>;

/// The step of a single migration's execution protocol that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Opening the per-migration or global transaction
    Begin,
    /// Running the forward operation
    Apply,
    /// Running the backward operation
    Revert,
    /// Inserting the ledger row after a forward operation
    RecordApplied,
    /// Deleting the ledger row after a backward operation
    RemoveRecord,
    /// Committing the transaction
    Commit,
}

impl Phase {
    /// Phase in which the schema operation itself runs for a direction
    pub fn operation(direction: Direction) -> Self {
        match direction {
            Direction::Up => Phase::Apply,
            Direction::Down => Phase::Revert,
        }
    }

    /// Phase in which the ledger is updated for a direction
    pub fn ledger(direction: Direction) -> Self {
        match direction {
            Direction::Up => Phase::RecordApplied,
            Direction::Down => Phase::RemoveRecord,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Begin => write!(f, "begin transaction"),
            Phase::Apply => write!(f, "apply"),
            Phase::Revert => write!(f, "revert"),
            Phase::RecordApplied => write!(f, "record applied version"),
            Phase::RemoveRecord => write!(f, "remove applied version"),
            Phase::Commit => write!(f, "commit"),
        }
    }
}

/// Error types for migration operations
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// The ledger table could not be created
    #[error("Failed to bootstrap migration ledger: {0}")]
    Bootstrap(String),

    /// The applied set could not be read from the ledger
    #[error("Failed to read applied migrations: {0}")]
    Diff(String),

    /// A SQL migration file name does not follow `{YYYYMMDDHHMMSS}_{name}.sql`
    #[error("Invalid migration file name '{filename}': {reason}")]
    InvalidFilename { filename: String, reason: String },

    /// A SQL migration body is malformed
    #[error("Failed to parse migration '{filename}': {reason}")]
    Parse { filename: String, reason: String },

    /// Rollback was requested for a migration that declares no down block
    #[error("Migration {version} has no down block")]
    MissingDown { version: String },

    /// A single migration failed; `source` carries the underlying cause
    #[error("Migration {version} ({name}) failed to {phase}: {source}")]
    Failed {
        version: String,
        name: String,
        phase: Phase,
        #[source]
        source: Box<MigrationError>,
    },

    /// The run-wide deadline expired before the run finished
    #[error("Migration run timed out after {0:?}")]
    Timeout(Duration),

    /// Transaction begin/commit/rollback error outside of a specific migration
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Statement or query error reported by the driver
    #[error("Database error: {0}")]
    Database(String),

    /// Connection pool error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Filesystem error while reading or writing migration files
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MigrationError {
    /// Wrap an error with the identity of the migration and the failing phase
    pub fn failed(version: impl Into<String>, name: impl Into<String>, phase: Phase, source: MigrationError) -> Self {
        MigrationError::Failed {
            version: version.into(),
            name: name.into(),
            phase,
            source: Box::new(source),
        }
    }

    /// Version of the migration that failed, if the error is tied to one
    pub fn version(&self) -> Option<&str> {
        match self {
            MigrationError::Failed { version, .. } => Some(version),
            MigrationError::MissingDown { version } => Some(version),
            _ => None,
        }
    }

    /// Phase that failed, if the error is tied to a migration
    pub fn phase(&self) -> Option<Phase> {
        match self {
            MigrationError::Failed { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// True when the schema operation succeeded but the ledger could not be updated.
    ///
    /// In per-migration mode without a transaction this leaves the schema and the
    /// ledger out of sync; the caller must reconcile by hand.
    pub fn is_ledger_failure(&self) -> bool {
        matches!(
            self.phase(),
            Some(Phase::RecordApplied) | Some(Phase::RemoveRecord)
        )
    }
}

impl From<sqlx::Error> for MigrationError {
    fn from(err: sqlx::Error) -> Self {
        MigrationError::Database(err.to_string())
    }
}
