//! End-to-end migrator behaviour against an in-memory SQLite database

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::future::BoxFuture;
use tidemark::backends::SqlitePool;
use tidemark::{
    create_migration_file, load_migrations_dir, DatabaseHandle, Direction, FnMigration, Ledger,
    MigrateOptions, Migration, MigrationError, MigrationEvent, MigrationLogger, MigrationResult,
    Migrator, Phase, SqlMigration,
};

type CallLog = Arc<Mutex<Vec<String>>>;

/// Creates (up) or drops (down) a table named after itself, recording every call
struct TableMigration {
    name: String,
    at: DateTime<Utc>,
    calls: CallLog,
    fail_up: bool,
}

impl TableMigration {
    fn new(name: &str, hour: u32, calls: &CallLog) -> Self {
        Self {
            name: name.to_string(),
            at: Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap(),
            calls: calls.clone(),
            fail_up: false,
        }
    }

    fn failing(mut self) -> Self {
        self.fail_up = true;
        self
    }
}

#[async_trait]
impl Migration for TableMigration {
    fn name(&self) -> &str {
        &self.name
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.at
    }

    async fn up(&self, db: &mut dyn DatabaseHandle) -> MigrationResult<()> {
        self.calls.lock().unwrap().push(format!("up:{}", self.name));
        db.execute(&format!("CREATE TABLE {} (id INTEGER PRIMARY KEY)", self.name), &[])
            .await?;
        if self.fail_up {
            return Err(MigrationError::Database(format!("{} exploded", self.name)));
        }
        Ok(())
    }

    async fn down(&self, db: &mut dyn DatabaseHandle) -> MigrationResult<()> {
        self.calls.lock().unwrap().push(format!("down:{}", self.name));
        db.execute(&format!("DROP TABLE {}", self.name), &[]).await?;
        Ok(())
    }
}

#[derive(Default, Clone)]
struct CollectingLogger {
    events: Arc<Mutex<Vec<MigrationEvent>>>,
}

impl MigrationLogger for CollectingLogger {
    fn log(&self, event: &MigrationEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

fn quiet() -> Migrator {
    Migrator::new(MigrateOptions::new().without_logger())
}

fn global() -> Migrator {
    Migrator::new(MigrateOptions::new().with_global_transaction(true).without_logger())
}

fn boxed<M: Migration + 'static>(migrations: Vec<M>) -> Vec<Arc<dyn Migration>> {
    migrations
        .into_iter()
        .map(|m| Arc::new(m) as Arc<dyn Migration>)
        .collect()
}

fn sql(filename: &str, body: &str) -> Arc<dyn Migration> {
    Arc::new(SqlMigration::parse(filename, body).unwrap())
}

async fn applied(pool: &mut SqlitePool) -> HashSet<String> {
    Ledger::new().applied_set(pool).await.unwrap()
}

async fn table_exists(pool: &mut SqlitePool, table: &str) -> bool {
    let rows = pool
        .fetch_all(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?",
            &[table.into()],
        )
        .await
        .unwrap();
    !rows.is_empty()
}

fn set(versions: &[&str]) -> HashSet<String> {
    versions.iter().map(|v| v.to_string()).collect()
}

#[tokio::test]
async fn test_up_is_idempotent() {
    let mut pool = SqlitePool::in_memory().await.unwrap();
    let calls = CallLog::default();
    let migrations = boxed(vec![
        TableMigration::new("accounts", 0, &calls),
        TableMigration::new("invoices", 1, &calls),
    ]);
    let migrator = quiet();

    let first = migrator.up(&mut pool, &migrations).await.unwrap();
    assert_eq!(first.applied_count, 2);
    assert_eq!(first.skipped_count, 0);
    let ledger_after_first = applied(&mut pool).await;

    let second = migrator.up(&mut pool, &migrations).await.unwrap();
    assert_eq!(second.applied_count, 0);
    assert_eq!(second.skipped_count, 2);
    assert!(second.applied_migrations.is_empty());

    assert_eq!(applied(&mut pool).await, ledger_after_first);
    assert_eq!(calls.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_up_then_down_restores_empty_schema() {
    for migrator in [quiet(), global()] {
        let mut pool = SqlitePool::in_memory().await.unwrap();
        let calls = CallLog::default();
        let migrations = boxed(vec![
            TableMigration::new("accounts", 0, &calls),
            TableMigration::new("invoices", 1, &calls),
        ]);

        migrator.up(&mut pool, &migrations).await.unwrap();
        assert!(table_exists(&mut pool, "accounts").await);

        let report = migrator.down(&mut pool, &migrations).await.unwrap();
        assert_eq!(report.rolled_back_count, 2);
        assert!(applied(&mut pool).await.is_empty());
        assert!(!table_exists(&mut pool, "accounts").await);
        assert!(!table_exists(&mut pool, "invoices").await);
    }
}

#[tokio::test]
async fn test_execution_order_follows_timestamps() {
    let mut pool = SqlitePool::in_memory().await.unwrap();
    let calls = CallLog::default();
    // Supplied out of order on purpose
    let migrations = boxed(vec![
        TableMigration::new("t3", 3, &calls),
        TableMigration::new("t1", 1, &calls),
        TableMigration::new("t2", 2, &calls),
    ]);
    let migrator = quiet();

    let report = migrator.up(&mut pool, &migrations).await.unwrap();
    assert_eq!(
        report.applied_migrations,
        vec!["20240101010000_t1", "20240101020000_t2", "20240101030000_t3"]
    );

    let report = migrator.down(&mut pool, &migrations).await.unwrap();
    assert_eq!(
        report.rolled_back_migrations,
        vec!["20240101030000_t3", "20240101020000_t2", "20240101010000_t1"]
    );

    assert_eq!(
        *calls.lock().unwrap(),
        vec!["up:t1", "up:t2", "up:t3", "down:t3", "down:t2", "down:t1"]
    );
}

#[tokio::test]
async fn test_per_migration_failure_keeps_earlier_work_and_resumes() {
    let mut pool = SqlitePool::in_memory().await.unwrap();
    let calls = CallLog::default();
    let migrator = quiet();

    let broken = boxed(vec![
        TableMigration::new("a", 0, &calls),
        TableMigration::new("b", 1, &calls).failing(),
        TableMigration::new("c", 2, &calls),
    ]);
    let err = migrator.up(&mut pool, &broken).await.unwrap_err();

    assert_eq!(err.version(), Some("20240101010000_b"));
    assert_eq!(err.phase(), Some(Phase::Apply));
    assert!(err.to_string().contains("20240101010000_b (b)"));
    assert_eq!(applied(&mut pool).await, set(&["20240101000000_a"]));
    assert!(table_exists(&mut pool, "a").await);
    // b ran in its own transaction, so its table was rolled back
    assert!(!table_exists(&mut pool, "b").await);
    assert!(!table_exists(&mut pool, "c").await);

    let fixed = boxed(vec![
        TableMigration::new("a", 0, &calls),
        TableMigration::new("b", 1, &calls),
        TableMigration::new("c", 2, &calls),
    ]);
    let report = migrator.up(&mut pool, &fixed).await.unwrap();
    assert_eq!(report.applied_migrations, vec!["20240101010000_b", "20240101020000_c"]);
    assert_eq!(report.skipped_count, 1);
    assert_eq!(
        *calls.lock().unwrap(),
        vec!["up:a", "up:b", "up:b", "up:c"]
    );
}

#[tokio::test]
async fn test_global_transaction_failure_applies_nothing() {
    let mut pool = SqlitePool::in_memory().await.unwrap();
    let calls = CallLog::default();
    let migrator = global();

    let broken = boxed(vec![
        TableMigration::new("a", 0, &calls),
        TableMigration::new("b", 1, &calls).failing(),
        TableMigration::new("c", 2, &calls),
    ]);
    let err = migrator.up(&mut pool, &broken).await.unwrap_err();

    assert_eq!(err.version(), Some("20240101010000_b"));
    assert!(applied(&mut pool).await.is_empty());
    assert!(!table_exists(&mut pool, "a").await);
    assert!(!table_exists(&mut pool, "b").await);
    assert_eq!(*calls.lock().unwrap(), vec!["up:a", "up:b"]);
}

#[tokio::test]
async fn test_sql_scenario_apply_partial_rollback_and_reapply() {
    let mut pool = SqlitePool::in_memory().await.unwrap();
    let migrations = vec![
        sql(
            "20240101000000_a.sql",
            "-- migrate:up\nCREATE TABLE a (id INTEGER);\n-- migrate:down\nDROP TABLE a;\n",
        ),
        sql(
            "20240101010000_b.sql",
            "-- migrate:up\nCREATE TABLE b (id INTEGER);\nINSERT INTO b (id) VALUES (1);\n-- migrate:down\nDROP TABLE b;\n",
        ),
        sql(
            "20240101020000_c.sql",
            "-- migrate:up\nCREATE TABLE c (id INTEGER);\n-- migrate:down\nDROP TABLE c;\n",
        ),
    ];
    let migrator = quiet();

    migrator.up(&mut pool, &migrations).await.unwrap();
    assert_eq!(
        applied(&mut pool).await,
        set(&["20240101000000_a", "20240101010000_b", "20240101020000_c"])
    );

    // Roll back only the newest migration by passing a truncated list
    let mut newest = migrator.plan(&mut pool, &migrations, Direction::Down).await.unwrap();
    newest.truncate(1);
    migrator.down(&mut pool, &newest).await.unwrap();
    assert_eq!(
        applied(&mut pool).await,
        set(&["20240101000000_a", "20240101010000_b"])
    );
    assert!(!table_exists(&mut pool, "c").await);

    let pending = migrator.pending(&mut pool, &migrations).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].version(), "20240101020000_c");

    let report = migrator.up(&mut pool, &migrations).await.unwrap();
    assert_eq!(report.applied_migrations, vec!["20240101020000_c"]);
    assert!(table_exists(&mut pool, "c").await);
}

#[tokio::test]
async fn test_non_transactional_migration_keeps_partial_effects() {
    fn create_then_fail(db: &mut dyn DatabaseHandle) -> BoxFuture<'_, MigrationResult<()>> {
        Box::pin(async move {
            db.execute("CREATE TABLE half_done (id INTEGER)", &[]).await?;
            Err(MigrationError::Database("second statement failed".to_string()))
        })
    }

    let at = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();

    let mut pool = SqlitePool::in_memory().await.unwrap();
    let outside = boxed(vec![FnMigration::new("outside", at, create_then_fail).with_up_transaction(false)]);
    assert!(quiet().up(&mut pool, &outside).await.is_err());
    assert!(table_exists(&mut pool, "half_done").await);
    assert!(applied(&mut pool).await.is_empty());

    let mut pool = SqlitePool::in_memory().await.unwrap();
    let inside = boxed(vec![FnMigration::new("inside", at, create_then_fail)]);
    assert!(quiet().up(&mut pool, &inside).await.is_err());
    assert!(!table_exists(&mut pool, "half_done").await);
}

#[tokio::test]
async fn test_sql_transaction_directive_runs_outside_transaction() {
    let mut pool = SqlitePool::in_memory().await.unwrap();
    // VACUUM cannot run inside a transaction on SQLite
    let migrations = vec![
        sql("20240101000000_base.sql", "-- migrate:up\nCREATE TABLE base (id INTEGER);\n"),
        sql("20240101010000_compact.sql", "-- migrate:up transaction=false\nVACUUM;\n"),
    ];

    let report = quiet().up(&mut pool, &migrations).await.unwrap();
    assert_eq!(report.applied_count, 2);
    assert!(applied(&mut pool).await.contains("20240101010000_compact"));
}

#[tokio::test]
async fn test_rollback_without_down_block_fails_only_on_down() {
    let mut pool = SqlitePool::in_memory().await.unwrap();
    let migrations = vec![sql("20240101000000_one_way.sql", "-- migrate:up\nCREATE TABLE one_way (id INTEGER);\n")];
    let migrator = quiet();

    migrator.up(&mut pool, &migrations).await.unwrap();

    let err = migrator.down(&mut pool, &migrations).await.unwrap_err();
    assert_eq!(err.phase(), Some(Phase::Revert));
    assert!(matches!(
        err,
        MigrationError::Failed { ref source, .. } if matches!(**source, MigrationError::MissingDown { .. })
    ));
    assert_eq!(applied(&mut pool).await, set(&["20240101000000_one_way"]));
    assert!(table_exists(&mut pool, "one_way").await);
}

/// Up block that records its own version, so the migrator's ledger insert hits the primary key
fn self_recording(directive: &str) -> Arc<dyn Migration> {
    sql(
        "20240101000000_sneaky.sql",
        &format!(
            "{}\nCREATE TABLE sneaky (id INTEGER);\nINSERT INTO schema_migrations (version) VALUES ('20240101000000_sneaky');\n",
            directive
        ),
    )
}

#[tokio::test]
async fn test_ledger_update_failure_is_reported_separately() {
    let mut pool = SqlitePool::in_memory().await.unwrap();
    let migrations = vec![self_recording("-- migrate:up")];

    let err = quiet().up(&mut pool, &migrations).await.unwrap_err();
    assert!(err.is_ledger_failure());
    assert_eq!(err.phase(), Some(Phase::RecordApplied));
    assert!(applied(&mut pool).await.is_empty());
    assert!(!table_exists(&mut pool, "sneaky").await);
}

#[tokio::test]
async fn test_ledger_update_failure_without_transaction_keeps_schema_change() {
    let mut pool = SqlitePool::in_memory().await.unwrap();
    let migrations = vec![self_recording("-- migrate:up transaction=false")];

    let err = quiet().up(&mut pool, &migrations).await.unwrap_err();
    assert!(err.is_ledger_failure());
    assert_eq!(err.version(), Some("20240101000000_sneaky"));
    assert!(table_exists(&mut pool, "sneaky").await);
}

#[tokio::test]
async fn test_ledger_update_failure_in_global_transaction_rolls_back_schema_change() {
    let mut pool = SqlitePool::in_memory().await.unwrap();
    let migrations = vec![
        sql("20231231000000_first.sql", "-- migrate:up\nCREATE TABLE first (id INTEGER);\n"),
        self_recording("-- migrate:up"),
    ];

    let err = global().up(&mut pool, &migrations).await.unwrap_err();
    assert!(err.is_ledger_failure());
    assert_eq!(err.phase(), Some(Phase::RecordApplied));
    assert!(applied(&mut pool).await.is_empty());
    assert!(!table_exists(&mut pool, "first").await);
    assert!(!table_exists(&mut pool, "sneaky").await);
}

#[tokio::test]
async fn test_ledger_removal_failure_rolls_back_revert() {
    // The down block drops the ledger table, so removing the version fails afterwards
    let mut pool = SqlitePool::in_memory().await.unwrap();
    let migrations = vec![sql(
        "20240101000000_keeper.sql",
        "-- migrate:up\nCREATE TABLE keeper (id INTEGER);\n-- migrate:down\nDROP TABLE keeper;\nDROP TABLE schema_migrations;\n",
    )];
    let migrator = quiet();
    migrator.up(&mut pool, &migrations).await.unwrap();

    let err = migrator.down(&mut pool, &migrations).await.unwrap_err();
    assert!(err.is_ledger_failure());
    assert_eq!(err.phase(), Some(Phase::RemoveRecord));
    assert!(table_exists(&mut pool, "keeper").await);
    assert_eq!(applied(&mut pool).await, set(&["20240101000000_keeper"]));
}

#[tokio::test]
async fn test_run_wide_timeout() {
    fn slow(_db: &mut dyn DatabaseHandle) -> BoxFuture<'_, MigrationResult<()>> {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(())
        })
    }

    let mut pool = SqlitePool::in_memory().await.unwrap();
    let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let migrations = boxed(vec![FnMigration::new("slow", at, slow)]);
    let migrator = Migrator::new(
        MigrateOptions::new()
            .with_timeout(Duration::from_millis(50))
            .without_logger(),
    );

    let err = migrator.up(&mut pool, &migrations).await.unwrap_err();
    assert!(matches!(err, MigrationError::Timeout(d) if d == Duration::from_millis(50)));
    assert!(applied(&mut pool).await.is_empty());
}

#[tokio::test]
async fn test_empty_run_succeeds() {
    let mut pool = SqlitePool::in_memory().await.unwrap();
    let report = quiet().up(&mut pool, &[]).await.unwrap();
    assert_eq!(report.applied_count, 0);

    let report = quiet().down(&mut pool, &[]).await.unwrap();
    assert_eq!(report.rolled_back_count, 0);
    assert!(applied(&mut pool).await.is_empty());
}

#[tokio::test]
async fn test_logger_receives_events_unless_disabled() {
    let calls = CallLog::default();
    let logger = CollectingLogger::default();
    let migrations = boxed(vec![TableMigration::new("logged", 0, &calls)]);

    let mut pool = SqlitePool::in_memory().await.unwrap();
    let migrator = Migrator::new(MigrateOptions::new().with_logger(Arc::new(logger.clone())));
    migrator.up(&mut pool, &migrations).await.unwrap();
    assert_eq!(logger.events.lock().unwrap().len(), 4);

    let options = migrator.options().clone().without_logger();
    let silent = Migrator::new(options);
    silent.down(&mut pool, &migrations).await.unwrap();
    assert_eq!(logger.events.lock().unwrap().len(), 4);
}

#[tokio::test]
async fn test_custom_ledger_table() {
    let mut pool = SqlitePool::in_memory().await.unwrap();
    let calls = CallLog::default();
    let migrations = boxed(vec![TableMigration::new("custom", 0, &calls)]);
    let migrator = quiet().with_ledger(Ledger::with_table("app_versions").unwrap());

    migrator.up(&mut pool, &migrations).await.unwrap();

    assert!(table_exists(&mut pool, "app_versions").await);
    assert!(!table_exists(&mut pool, "schema_migrations").await);
    let versions = Ledger::with_table("app_versions").unwrap().applied_set(&mut pool).await.unwrap();
    assert_eq!(versions, set(&["20240101000000_custom"]));
}

#[tokio::test]
async fn test_migrations_directory_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let path = create_migration_file(dir.path(), "Create Users").unwrap();
    std::fs::write(
        &path,
        "-- migrate:up\nCREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT NOT NULL);\nCREATE INDEX idx_users_email ON users (email);\n\n-- migrate:down\nDROP TABLE users;\n",
    )
    .unwrap();
    std::fs::write(dir.path().join("README.md"), "not a migration").unwrap();

    let migrations: Vec<Arc<dyn Migration>> = load_migrations_dir(dir.path())
        .unwrap()
        .into_iter()
        .map(|m| Arc::new(m) as Arc<dyn Migration>)
        .collect();
    assert_eq!(migrations.len(), 1);
    assert_eq!(migrations[0].name(), "create_users");

    let mut pool = SqlitePool::in_memory().await.unwrap();
    let migrator = global();
    migrator.up(&mut pool, &migrations).await.unwrap();
    assert!(table_exists(&mut pool, "users").await);

    let status = migrator.status(&mut pool, &migrations).await.unwrap();
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].status, tidemark::MigrationStatus::Applied);

    migrator.down(&mut pool, &migrations).await.unwrap();
    assert!(!table_exists(&mut pool, "users").await);
}
