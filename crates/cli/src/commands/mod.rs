pub mod create;
pub mod down;
pub mod status;
pub mod up;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use tidemark::{load_migrations_dir, Migration, MigratorConfig};

/// Settings shared by every command
#[derive(Debug, Clone)]
pub struct Context {
    pub database_url: Option<String>,
    pub dir: PathBuf,
    pub table: String,
}

impl Context {
    /// Validated configuration for a database command
    pub fn config(&self, global_transaction: bool, timeout_secs: u64) -> anyhow::Result<MigratorConfig> {
        let database_url = self
            .database_url
            .clone()
            .context("No database URL given; set DATABASE_URL or pass --database-url")?;

        let config = MigratorConfig {
            migrations_dir: self.dir.clone(),
            table: self.table.clone(),
            timeout: Duration::from_secs(timeout_secs),
            global_transaction,
            ..MigratorConfig::new(database_url)
        };
        config.validate()?;
        Ok(config)
    }
}

/// Load the SQL migrations in `dir` as runnable migrations
pub fn load(dir: &Path) -> anyhow::Result<Vec<Arc<dyn Migration>>> {
    let migrations = load_migrations_dir(dir)
        .with_context(|| format!("Failed to load migrations from {}", dir.display()))?;

    Ok(migrations
        .into_iter()
        .map(|migration| Arc::new(migration) as Arc<dyn Migration>)
        .collect())
}
