use tidemark::{backends, MigrationStatus, Migrator};

use super::{load, Context};

pub async fn run(context: &Context, json: bool) -> anyhow::Result<()> {
    let config = context.config(false, 15)?;
    let migrations = load(&config.migrations_dir)?;

    let mut db = backends::connect(&config.database_url).await?;
    let migrator = Migrator::new(config.to_options().without_logger()).with_ledger(config.ledger()?);
    let entries = migrator.status(&mut *db, &migrations).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No migrations found in {}", config.migrations_dir.display());
        return Ok(());
    }

    let pending = entries
        .iter()
        .filter(|entry| entry.status == MigrationStatus::Pending)
        .count();

    println!("Migration Status:");
    for entry in &entries {
        let marker = match entry.status {
            MigrationStatus::Applied => "applied",
            MigrationStatus::Pending => "pending",
        };
        println!("  [{:>7}] {}", marker, entry.version);
    }
    println!();
    println!("{} applied, {} pending", entries.len() - pending, pending);

    Ok(())
}
