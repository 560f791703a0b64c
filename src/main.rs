//! vibestore - maintenance tool for a vibestore data directory

use anyhow::{Context, Result, bail};
use clap::{Parser as ClapParser, Subcommand};
use std::path::PathBuf;
use vibestore::config::{EvictionPolicy, StorageConfig};
use vibestore::database::Database;

/// vibestore - inspect and recover a vibestore data directory
#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Data directory
    #[arg(short = 'D', long, default_value = "./vibestore_data")]
    data_dir: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Page size for newly created files
    #[arg(long, default_value = "8192")]
    page_size: usize,

    /// Byte budget of the buffer pool
    #[arg(long, default_value = "4194304")]
    buffer_bytes: usize,

    /// Buffer pool eviction order (fifo or lru)
    #[arg(long, default_value = "lru")]
    eviction: EvictionPolicy,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run crash recovery and shut down cleanly
    Recover,
    /// Print every log record in the recovery range
    DumpWal,
    /// Check the structure of a B+-tree index
    VerifyIndex {
        /// Index name, without the .idx suffix
        name: String,
    },
    /// Print the kind, page size and page count of a file
    Stats {
        /// File name inside the data directory
        file: String,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let config = StorageConfig::new(&args.data_dir)
        .with_page_size(args.page_size)
        .with_buffer_pool_bytes(args.buffer_bytes)
        .with_eviction_policy(args.eviction);
    // The log is dumped as found, before recovery consumes it.
    let db = match args.command {
        Command::DumpWal => Database::open_without_recovery(config),
        _ => Database::open(config),
    }
    .with_context(|| format!("Failed to open {}", args.data_dir.display()))?;

    let result = run(&db, &args.command);
    db.shutdown().context("Failed to shut down cleanly")?;
    result
}

fn run(db: &Database, command: &Command) -> Result<()> {
    match command {
        Command::Recover => {
            match db.recovery_stats() {
                Some(stats) => println!("Recovery: {}", stats),
                None => println!("Transactions are disabled; nothing to recover"),
            }
        }
        Command::DumpWal => {
            let txns = db
                .transactions()
                .context("Transactions are disabled; there is no log")?;
            let (first, next) = txns.recovery_range();
            println!("Log range [{}, {})", first, next);
            for (lsn, record) in txns.log_records().context("Failed to read the log")? {
                println!("{} {}", lsn, record);
            }
        }
        Command::VerifyIndex { name } => {
            let index = db
                .open_index(name)
                .with_context(|| format!("Failed to open index {}", name))?;
            let session = db.new_session();
            let problems = index.verify(&session)?;
            if !problems.is_empty() {
                for problem in &problems {
                    println!("{}", problem);
                }
                bail!("index {} has {} problems", name, problems.len());
            }
            println!(
                "Index {} is consistent ({} entries, height {})",
                name,
                index.entries(&session)?.len(),
                index.height(&session)?
            );
        }
        Command::Stats { file } => {
            let stats = db
                .file_stats(file)
                .with_context(|| format!("Failed to open {}", file))?;
            println!("File:      {}", stats.name);
            println!("Kind:      {}", stats.kind);
            println!("Page size: {}", stats.page_size);
            println!("Pages:     {}", stats.num_pages);
        }
    }
    Ok(())
}
