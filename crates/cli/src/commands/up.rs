use tidemark::{backends, Migrator};

use super::{load, Context};

pub async fn run(context: &Context, global_transaction: bool, timeout_secs: u64) -> anyhow::Result<()> {
    let config = context.config(global_transaction, timeout_secs)?;
    let migrations = load(&config.migrations_dir)?;

    let mut db = backends::connect(&config.database_url).await?;
    let migrator = Migrator::new(config.to_options()).with_ledger(config.ledger()?);
    let report = migrator.up(&mut *db, &migrations).await?;

    if report.applied_count == 0 {
        println!("Nothing to migrate");
    } else {
        println!(
            "Applied {} migration(s) in {}ms:",
            report.applied_count, report.execution_time_ms
        );
        for version in &report.applied_migrations {
            println!("  {}", version);
        }
    }

    Ok(())
}
