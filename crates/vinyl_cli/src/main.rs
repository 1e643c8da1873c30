//! Command-line front end for the vinyl store.
//!
//! # Responsibility
//! - Import people from a JSON array into a file store, in saved batches.
//! - Report the core version and stored row counts.

mod person;

use clap::{Parser, Subcommand};
use log::info;
use person::Person;
use std::error::Error;
use std::path::PathBuf;
use vinyl_core::logging::LOG_DIR_ENV;
use vinyl_core::{
    default_log_level, import_in_batches, init_logging, ImportMapping, RecordRepository, Stack,
    StackConfig,
};

const DEFAULT_BATCH_SIZE: usize = 500;

#[derive(Debug, Parser)]
#[command(name = "vinyl", version, about = "Record helpers and bulk import over SQLite")]
struct Cli {
    /// Absolute directory for rolling log files; logging is off when unset.
    #[arg(long, global = true, env = LOG_DIR_ENV)]
    log_dir: Option<PathBuf>,

    /// trace|debug|info|warn|error
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the core crate version.
    Version,
    /// Upsert people from a JSON array, keyed by `id`.
    Import {
        db: PathBuf,
        people: PathBuf,
        #[arg(default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,
        /// JSON import mapping; defaults to `id -> remote_id`.
        #[arg(long)]
        mapping: Option<PathBuf>,
    },
    /// Print how many people the store holds.
    Count { db: PathBuf },
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    if let Some(log_dir) = &cli.log_dir {
        let level = cli.log_level.as_deref().unwrap_or(default_log_level());
        init_logging(level, &log_dir.to_string_lossy())?;
    }

    match cli.command {
        Command::Version => {
            println!("vinyl_core version={}", vinyl_core::core_version());
        }
        Command::Import {
            db,
            people,
            batch_size,
            mapping,
        } => {
            let mapping = match mapping {
                Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
                None => ImportMapping::new().with_primary_key_field("id"),
            };
            let records: Vec<serde_json::Value> =
                serde_json::from_str(&std::fs::read_to_string(&people)?)?;

            let stack = open_people_store(db)?;
            let context = stack.new_background_context()?;
            let summary = import_in_batches::<Person>(&context, &records, batch_size, &mapping)?;
            info!(
                "event=cli_import module=cli status=ok source={} records={}",
                people.display(),
                summary.records
            );
            println!(
                "batches={} records={} created={} updated={}",
                summary.batches, summary.records, summary.created, summary.updated
            );
        }
        Command::Count { db } => {
            let stack = open_people_store(db)?;
            let context = stack.new_background_context()?;
            let count = context.repository::<Person>().count(None)?;
            println!("people={count}");
        }
    }
    Ok(())
}

fn open_people_store(db: PathBuf) -> Result<Stack, Box<dyn Error>> {
    let stack = Stack::open(&StackConfig::file(db))?;
    stack.register::<Person>()?;
    Ok(stack)
}
