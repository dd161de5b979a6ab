mod commands;
mod logging;

use std::path::PathBuf;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser, Subcommand};
use commands::*;

#[derive(Parser)]
#[command(name = "tidemark")]
#[command(about = "Apply and roll back SQL schema migrations")]
struct Cli {
    /// Database connection URL (postgres:// or sqlite:)
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    /// Directory holding `{YYYYMMDDHHMMSS}_{name}.sql` files
    #[arg(long, env = "MIGRATIONS_DIR", default_value = "migrations", global = true)]
    dir: PathBuf,

    /// Ledger table recording applied versions
    #[arg(long, env = "MIGRATIONS_TABLE", default_value = "schema_migrations", global = true)]
    table: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new migration file
    Create {
        /// Migration name
        name: String,
    },

    /// Apply all pending migrations
    Up {
        /// Run every migration inside a single transaction
        #[arg(long, env = "MIGRATION_GLOBAL_TX", action = ArgAction::SetTrue, value_parser = BoolishValueParser::new())]
        global_transaction: bool,

        /// Deadline for the whole run, in seconds
        #[arg(long, env = "MIGRATION_TIMEOUT_SECS", default_value_t = 15)]
        timeout: u64,
    },

    /// Roll back applied migrations, newest first
    Down {
        /// Number of migrations to roll back (all when omitted)
        #[arg(long)]
        steps: Option<usize>,

        /// Run every rollback inside a single transaction
        #[arg(long, env = "MIGRATION_GLOBAL_TX", action = ArgAction::SetTrue, value_parser = BoolishValueParser::new())]
        global_transaction: bool,

        /// Deadline for the whole run, in seconds
        #[arg(long, env = "MIGRATION_TIMEOUT_SECS", default_value_t = 15)]
        timeout: u64,
    },

    /// Show applied and pending migrations
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.json_logs)?;

    let context = Context {
        database_url: cli.database_url,
        dir: cli.dir,
        table: cli.table,
    };

    match cli.command {
        Commands::Create { name } => {
            create::run(&context, &name)?;
        }
        Commands::Up { global_transaction, timeout } => {
            up::run(&context, global_transaction, timeout).await?;
        }
        Commands::Down { steps, global_transaction, timeout } => {
            down::run(&context, steps, global_transaction, timeout).await?;
        }
        Commands::Status { json } => {
            status::run(&context, json).await?;
        }
    }

    Ok(())
}
