//! StrataKV CLI
//!
//! Command-line interface for inspecting and editing a StrataKV directory.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use stratakv::{Config, Db, Direction};
use tracing_subscriber::{fmt, EnvFilter};

/// StrataKV CLI
#[derive(Parser, Debug)]
#[command(name = "stratakv-cli")]
#[command(about = "CLI for the StrataKV embedded key-value store")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./stratakv_data")]
    data_dir: String,

    /// Open without modifying anything on disk
    #[arg(long)]
    read_only: bool,

    /// MemTable size limit in MB before flush
    #[arg(short = 'm', long, default_value = "4")]
    memtable_mb: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Put {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Delete a key
    Del {
        /// The key to delete
        key: String,
    },

    /// Print every key-value pair in key order
    Scan {
        /// Iterate from the largest key down
        #[arg(short, long)]
        reverse: bool,

        /// Start at this key instead of the first/last one
        #[arg(long)]
        from: Option<String>,
    },

    /// Compact segments overlapping an inclusive key range
    Compact {
        #[arg(long)]
        start: Option<String>,

        #[arg(long)]
        end: Option<String>,
    },

    /// Flush buffered writes to a segment
    Flush,

    /// Print engine statistics
    Stats,
}

fn main() -> ExitCode {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,stratakv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> stratakv::Result<()> {
    let config = Config::builder()
        .data_dir(&args.data_dir)
        .read_only(args.read_only)
        .memtable_size_limit(args.memtable_mb * 1024 * 1024)
        .build();

    let db = Db::open_with_config(config)?;

    match args.command {
        Commands::Get { key } => match db.get(&key)? {
            Some(value) => println!("{}", String::from_utf8_lossy(&value)),
            None => println!("(nil)"),
        },
        Commands::Put { key, value } => {
            db.put(&key, &value)?;
            println!("OK");
        }
        Commands::Del { key } => {
            db.delete(&key)?;
            println!("OK");
        }
        Commands::Scan { reverse, from } => {
            let direction = if reverse { Direction::Reverse } else { Direction::Forward };
            let mut cursor = db.iter(direction)?;
            if let Some(from) = from {
                cursor.seek(from.as_bytes())?;
            }
            for pair in cursor {
                let (key, value) = pair?;
                println!(
                    "{}\t{}",
                    String::from_utf8_lossy(&key),
                    String::from_utf8_lossy(&value)
                );
            }
        }
        Commands::Compact { start, end } => {
            db.compact(start.as_deref().map(str::as_bytes), end.as_deref().map(str::as_bytes))?;
            println!("OK");
        }
        Commands::Flush => {
            db.flush()?;
            println!("OK");
        }
        Commands::Stats => {
            if let Some(stats) = db.property("stratakv.stats")? {
                println!("{}", stats);
            }
        }
    }

    db.close()
}
