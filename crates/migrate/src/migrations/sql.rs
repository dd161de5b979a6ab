//! SQL file migrations
//!
//! A SQL migration is a file named `{YYYYMMDDHHMMSS}_{name}.sql` whose body is split into
//! blocks by directive lines:
//!
//! ```sql
//! -- migrate:up transaction=false
//! CREATE INDEX CONCURRENTLY idx_users_email ON users (email);
//!
//! -- migrate:down
//! DROP INDEX idx_users_email;
//! ```
//!
//! Directives are matched case-insensitively. `transaction=` defaults to `true` when it is
//! omitted or not a boolean. A missing `-- migrate:up` block is a parse error; a missing
//! `-- migrate:down` block only fails when the migration is rolled back.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use super::definitions::{Direction, VERSION_TIMESTAMP_FORMAT};
use super::migration::Migration;
use crate::backends::DatabaseHandle;
use crate::error::{MigrationError, MigrationResult};

static FILENAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{14})_(.+)\.sql$").expect("filename pattern is valid"));

static DIRECTIVE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*--\s*migrate:(up|down)(?:\s+transaction\s*=\s*(\S*))?\s*$")
        .expect("directive pattern is valid")
});

/// Migration declared in a SQL file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlMigration {
    name: String,
    timestamp: DateTime<Utc>,
    up_sql: String,
    down_sql: Option<String>,
    up_transaction: bool,
    down_transaction: bool,
}

impl SqlMigration {
    /// Build a migration from a file name and its contents.
    ///
    /// `filename` may carry a directory prefix; only the final component is matched.
    pub fn parse(filename: &str, content: &str) -> MigrationResult<Self> {
        let (timestamp, name) = parse_filename(filename)?;
        let body = parse_body(content).map_err(|reason| MigrationError::Parse {
            filename: filename.to_string(),
            reason,
        })?;

        Ok(Self {
            name,
            timestamp,
            up_sql: body.up_sql,
            down_sql: body.down_sql,
            up_transaction: body.up_transaction,
            down_transaction: body.down_transaction,
        })
    }

    /// Read and parse a migration file
    pub fn from_path(path: &Path) -> MigrationResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse(&path.to_string_lossy(), &content)
    }

    pub fn up_sql(&self) -> &str {
        &self.up_sql
    }

    /// Down block, or `None` when the file declares no `-- migrate:down` directive
    pub fn down_sql(&self) -> Option<&str> {
        self.down_sql.as_deref()
    }
}

#[async_trait]
impl Migration for SqlMigration {
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
        execute_block(db, &self.up_sql).await
    }

    async fn down(&self, db: &mut dyn DatabaseHandle) -> MigrationResult<()> {
        match &self.down_sql {
            Some(sql) => execute_block(db, sql).await,
            None => Err(MigrationError::MissingDown { version: self.version() }),
        }
    }
}

async fn execute_block(db: &mut dyn DatabaseHandle, sql: &str) -> MigrationResult<()> {
    if sql.trim().is_empty() {
        return Ok(());
    }
    db.execute(sql, &[]).await?;
    Ok(())
}

fn parse_filename(filename: &str) -> MigrationResult<(DateTime<Utc>, String)> {
    let invalid = |reason: &str| MigrationError::InvalidFilename {
        filename: filename.to_string(),
        reason: reason.to_string(),
    };

    let base = Path::new(filename)
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| invalid("file name is not valid UTF-8"))?;

    let captures = FILENAME_PATTERN
        .captures(base)
        .ok_or_else(|| invalid("expected {YYYYMMDDHHMMSS}_{name}.sql"))?;

    let timestamp = NaiveDateTime::parse_from_str(&captures[1], VERSION_TIMESTAMP_FORMAT)
        .map_err(|e| invalid(&format!("invalid timestamp: {}", e)))?
        .and_utc();

    Ok((timestamp, captures[2].to_string()))
}

struct ParsedBody {
    up_sql: String,
    down_sql: Option<String>,
    up_transaction: bool,
    down_transaction: bool,
}

/// Split a migration body into its up and down blocks.
///
/// A repeated directive continues the block it names; the last `transaction=` seen wins.
fn parse_body(content: &str) -> Result<ParsedBody, String> {
    let mut up_lines: Option<Vec<&str>> = None;
    let mut down_lines: Option<Vec<&str>> = None;
    let mut up_transaction = true;
    let mut down_transaction = true;
    let mut current: Option<Direction> = None;

    for line in content.lines() {
        if let Some(captures) = DIRECTIVE_PATTERN.captures(line) {
            let use_transaction = captures
                .get(2)
                .and_then(|value| parse_bool(value.as_str()))
                .unwrap_or(true);

            if captures[1].eq_ignore_ascii_case("up") {
                up_lines.get_or_insert_with(Vec::new);
                up_transaction = use_transaction;
                current = Some(Direction::Up);
            } else {
                down_lines.get_or_insert_with(Vec::new);
                down_transaction = use_transaction;
                current = Some(Direction::Down);
            }
            continue;
        }

        match current {
            Some(Direction::Up) => up_lines.get_or_insert_with(Vec::new).push(line),
            Some(Direction::Down) => down_lines.get_or_insert_with(Vec::new).push(line),
            None => {}
        }
    }

    let up_lines = up_lines.ok_or_else(|| "missing '-- migrate:up' directive".to_string())?;

    Ok(ParsedBody {
        up_sql: trim_blank_lines(&up_lines),
        down_sql: down_lines.as_deref().map(trim_blank_lines),
        up_transaction,
        down_transaction,
    })
}

fn trim_blank_lines(lines: &[&str]) -> String {
    let start = lines.iter().position(|l| !l.trim().is_empty());
    let end = lines.iter().rposition(|l| !l.trim().is_empty());

    match (start, end) {
        (Some(start), Some(end)) => lines[start..=end].join("\n"),
        _ => String::new(),
    }
}

/// Boolean spellings accepted in `transaction=`
fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

/// Load every `*.sql` migration in `dir`, sorted by timestamp then name.
///
/// A missing directory yields no migrations; any unparsable file fails the whole load.
pub fn load_migrations_dir(dir: &Path) -> MigrationResult<Vec<SqlMigration>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut migrations = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().map_or(false, |ext| ext == "sql") {
            migrations.push(SqlMigration::from_path(&path)?);
        }
    }

    migrations.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.name.cmp(&b.name)));
    tracing::debug!("Loaded {} SQL migration(s) from {}", migrations.len(), dir.display());
    Ok(migrations)
}

/// Write a new, empty migration file stamped with the current UTC time
pub fn create_migration_file(dir: &Path, name: &str) -> MigrationResult<PathBuf> {
    let name = name.trim().replace(' ', "_").to_lowercase();
    if name.is_empty() {
        return Err(MigrationError::Configuration("Migration name cannot be empty".to_string()));
    }

    fs::create_dir_all(dir)?;

    let now = Utc::now();
    let filename = format!("{}_{}.sql", now.format(VERSION_TIMESTAMP_FORMAT), name);
    let path = dir.join(&filename);
    if path.exists() {
        return Err(MigrationError::Configuration(format!(
            "Migration file {} already exists",
            path.display()
        )));
    }

    let template = format!(
        "-- Migration: {}\n\
         -- Created: {}\n\n\
         -- migrate:up\n\n\n\
         -- migrate:down\n\n",
        name,
        now.format("%Y-%m-%d %H:%M:%S UTC")
    );
    fs::write(&path, template)?;

    tracing::info!("Created migration {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_filename_validation() {
        let migration = SqlMigration::parse("20240101000000_init.sql", "-- migrate:up\nSELECT 1;").unwrap();
        assert_eq!(migration.name(), "init");
        assert_eq!(migration.timestamp(), Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(migration.version(), "20240101000000_init");

        for bad in ["bad.sql", "20240101_init.sql", "20240101000000init.sql", "20240101000000_init.txt", "20241399000000_init.sql"] {
            let err = SqlMigration::parse(bad, "-- migrate:up\nSELECT 1;").unwrap_err();
            assert!(matches!(err, MigrationError::InvalidFilename { .. }), "{} should be rejected", bad);
        }
    }

    #[test]
    fn test_filename_with_directory_prefix() {
        let migration = SqlMigration::parse("db/migrations/20240101000000_create_users.sql", "-- migrate:up\n").unwrap();
        assert_eq!(migration.name(), "create_users");
    }

    #[test]
    fn test_transaction_overrides() {
        let content = "-- migrate:up transaction=false\n\
                       CREATE INDEX CONCURRENTLY idx_users_email ON users (email);\n\
                       -- migrate:down\n\
                       DROP INDEX idx_users_email;\n";
        let migration = SqlMigration::parse("20240101000000_index.sql", content).unwrap();

        assert!(!migration.use_transaction(Direction::Up));
        assert!(migration.use_transaction(Direction::Down));
        assert_eq!(migration.up_sql(), "CREATE INDEX CONCURRENTLY idx_users_email ON users (email);");
        assert_eq!(migration.down_sql(), Some("DROP INDEX idx_users_email;"));
    }

    #[test]
    fn test_directives_are_case_insensitive_and_lenient() {
        let content = "  --MIGRATE:UP   Transaction = FALSE  \n\
                       SELECT 1;\n\
                       -- Migrate:Down transaction=maybe\n\
                       SELECT 2;";
        let migration = SqlMigration::parse("20240101000000_mixed.sql", content).unwrap();

        assert!(!migration.use_transaction(Direction::Up));
        assert!(migration.use_transaction(Direction::Down));
        assert_eq!(migration.up_sql(), "SELECT 1;");
        assert_eq!(migration.down_sql(), Some("SELECT 2;"));
    }

    #[test]
    fn test_blocks_trim_outer_blank_lines_only() {
        let content = "-- header comment is ignored\n\
                       -- migrate:up\n\
                       \n\
                       CREATE TABLE a (id INT);\n\
                       \n\
                       CREATE TABLE b (id INT);\n\
                       \n\
                       \n\
                       -- migrate:down\n\
                       \n";
        let migration = SqlMigration::parse("20240101000000_tables.sql", content).unwrap();

        assert_eq!(migration.up_sql(), "CREATE TABLE a (id INT);\n\nCREATE TABLE b (id INT);");
        assert_eq!(migration.down_sql(), Some(""));
    }

    #[test]
    fn test_missing_up_is_a_parse_error() {
        let err = SqlMigration::parse("20240101000000_broken.sql", "-- migrate:down\nDROP TABLE a;").unwrap_err();
        assert!(matches!(err, MigrationError::Parse { .. }));
        assert!(err.to_string().contains("migrate:up"));
    }

    #[test]
    fn test_missing_down_is_allowed_at_parse_time() {
        let migration = SqlMigration::parse("20240101000000_forward.sql", "-- migrate:up\nCREATE TABLE a (id INT);").unwrap();
        assert_eq!(migration.down_sql(), None);
    }

    #[test]
    fn test_load_migrations_dir() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("20240101130000_second.sql"), "-- migrate:up\nCREATE TABLE b (id INT);").unwrap();
        fs::write(temp_dir.path().join("20240101120000_first.sql"), "-- migrate:up\nCREATE TABLE a (id INT);").unwrap();
        fs::write(temp_dir.path().join("README.md"), "not a migration").unwrap();

        let migrations = load_migrations_dir(temp_dir.path()).unwrap();
        let names: Vec<_> = migrations.iter().map(|m| m.name().to_string()).collect();
        assert_eq!(names, vec!["first", "second"]);

        assert!(load_migrations_dir(&temp_dir.path().join("missing")).unwrap().is_empty());
    }

    #[test]
    fn test_load_migrations_dir_fails_on_bad_file() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("bad.sql"), "-- migrate:up\nSELECT 1;").unwrap();

        assert!(load_migrations_dir(temp_dir.path()).is_err());
    }

    #[test]
    fn test_create_migration_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = create_migration_file(temp_dir.path(), "Create Users Table").unwrap();

        let filename = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(filename.ends_with("_create_users_table.sql"));

        let migration = SqlMigration::from_path(&path).unwrap();
        assert_eq!(migration.name(), "create_users_table");
        assert_eq!(migration.up_sql(), "");
        assert_eq!(migration.down_sql(), Some(""));

        assert!(create_migration_file(temp_dir.path(), "   ").is_err());
    }
}
