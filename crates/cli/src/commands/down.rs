use tidemark::{backends, Direction, Migrator};

use super::{load, Context};

pub async fn run(
    context: &Context,
    steps: Option<usize>,
    global_transaction: bool,
    timeout_secs: u64,
) -> anyhow::Result<()> {
    let config = context.config(global_transaction, timeout_secs)?;
    let migrations = load(&config.migrations_dir)?;

    let mut db = backends::connect(&config.database_url).await?;
    let migrator = Migrator::new(config.to_options()).with_ledger(config.ledger()?);

    let mut targets = migrator.plan(&mut *db, &migrations, Direction::Down).await?;
    if let Some(steps) = steps {
        targets.truncate(steps);
    }

    let report = migrator.down(&mut *db, &targets).await?;

    if report.rolled_back_count == 0 {
        println!("Nothing to roll back");
    } else {
        println!(
            "Rolled back {} migration(s) in {}ms:",
            report.rolled_back_count, report.execution_time_ms
        );
        for version in &report.rolled_back_migrations {
            println!("  {}", version);
        }
    }

    Ok(())
}
