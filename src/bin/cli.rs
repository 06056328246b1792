//! hdbstore CLI
//!
//! Command-line interface for inspecting and editing a database directory.

use std::io::Write;
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use hdbstore::{Config, HierarchicalDatabase};
use tracing_subscriber::{fmt, EnvFilter};

/// hdbstore CLI
#[derive(Parser, Debug)]
#[command(name = "hdb-cli")]
#[command(about = "CLI for the hdbstore hierarchical blob database")]
#[command(version)]
struct Args {
    /// Storage directory
    #[arg(short, long, default_value = "./hdb_data")]
    dir: PathBuf,

    /// Database name (used for thread names and logs)
    #[arg(short, long, default_value = "hdb")]
    name: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print a blob to stdout
    Get {
        /// Folder path, segments separated by '/'
        path: String,

        /// Blob hash
        hash: u64,
    },

    /// Store a blob
    Put {
        /// Folder path, segments separated by '/'
        path: String,

        /// Blob hash
        hash: u64,

        /// Value to store
        #[arg(conflicts_with = "file")]
        value: Option<String>,

        /// Read the value from this file instead
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Delete a blob
    Delete {
        /// Folder path, segments separated by '/'
        path: String,

        /// Blob hash
        hash: u64,
    },

    /// Drop entries not accessed for the given time
    Cleanup {
        /// Timeout in milliseconds
        #[arg(short, long, default_value = "604800000")]
        timeout_ms: u64,
    },

    /// Print database statistics
    Stats,

    /// Delete all data
    Clear,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,hdbstore=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    // The CLI decides itself when to clean up
    let config = Config::builder()
        .storage_dir(&args.dir)
        .name(&args.name)
        .deletion_timeout_ms(None)
        .build();

    let database = match HierarchicalDatabase::open(config) {
        Ok(database) => database,
        Err(e) => {
            tracing::error!("Failed to open database at {}: {}", args.dir.display(), e);
            process::exit(1);
        }
    };

    let mut status = match run(&database, args.command) {
        Ok(status) => status,
        Err(e) => {
            tracing::error!("{}", e);
            1
        }
    };

    // Always close, so access times and partial changes reach the index
    if let Err(e) = database.close() {
        tracing::error!("Failed to write index: {}", e);
        status = 1;
    }
    process::exit(status);
}

/// Execute one command; returns the process exit status
fn run(database: &HierarchicalDatabase, command: Commands) -> hdbstore::Result<i32> {
    match command {
        Commands::Get { path, hash } => match database.get(&split_path(&path), hash)? {
            Some(value) => {
                let mut stdout = std::io::stdout().lock();
                stdout.write_all(&value)?;
                stdout.flush()?;
            }
            None => {
                eprintln!("(nil)");
                return Ok(2);
            }
        },
        Commands::Put {
            path,
            hash,
            value,
            file,
        } => {
            let bytes = match (value, file) {
                (_, Some(file)) => std::fs::read(file)?,
                (Some(value), None) => value.into_bytes(),
                (None, None) => Vec::new(),
            };
            database.put(&split_path(&path), hash, &bytes)?;
            println!("OK ({} bytes)", bytes.len());
        }
        Commands::Delete { path, hash } => {
            let removed = database.delete(&split_path(&path), hash)?;
            println!("{}", if removed { "(1)" } else { "(0)" });
        }
        Commands::Cleanup { timeout_ms } => {
            database.cleanup(timeout_ms)?;
            println!("OK");
        }
        Commands::Stats => {
            let stats = database.stats();
            println!("storage files:   {}", stats.storage_files);
            println!("folders:         {}", stats.folders);
            println!("entries:         {}", stats.entries);
            println!("live bytes:      {}", stats.live_bytes);
            println!("allocated bytes: {}", stats.allocated_bytes);
        }
        Commands::Clear => {
            database.delete_all()?;
            println!("OK");
        }
    }
    Ok(0)
}

/// "a/b/c" → ["a", "b", "c"]; empty segments are skipped so "/" is the root
fn split_path(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}
