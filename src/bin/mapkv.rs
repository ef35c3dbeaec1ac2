//! mapkv CLI
//!
//! Command-line front end for a mapkv environment.
//!
//! # Commands
//!
//! - `get` / `set` / `delete` - Point access to one key
//! - `dump` - Print every record, or a batch script that recreates them
//! - `batch` - Run a JSON batch request
//! - `script` - Run a Lua script in one write transaction
//! - `stat` / `info` - Engine statistics
//! - `copy` - Hot backup to another directory

use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use mapkv::batch::BatchRequest;
use mapkv::script::LuaExecutor;
use mapkv::service::{ErrorResponse, KvService};
use mapkv::{Binding, EnvOptions, Environment};

/// Command-line tools for a mapkv environment.
#[derive(Parser)]
#[command(name = "mapkv")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the environment directory (or file for single-file stores)
    #[arg(global = true, short, long, default_value = ".")]
    path: PathBuf,

    /// JSON file with environment options
    #[arg(global = true, short, long)]
    config: Option<PathBuf>,

    /// Named keyspace to use instead of the default one
    #[arg(global = true, short, long)]
    database: Option<String>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the value stored under a key
    Get {
        /// Key to look up
        key: String,
    },

    /// Store a value under a key
    Set {
        /// Key to write
        key: String,

        /// Value to store; read from stdin when omitted
        value: Option<String>,
    },

    /// Remove a key
    Delete {
        /// Key to remove
        key: String,
    },

    /// Print every record of the keyspace
    Dump {
        /// Print a batch request that recreates the records instead
        #[arg(short, long)]
        script: bool,
    },

    /// Run a JSON batch request and print the report
    Batch {
        /// Request file; read from stdin when omitted
        file: Option<PathBuf>,
    },

    /// Run a Lua script inside one write transaction
    Script {
        /// Script file
        file: PathBuf,

        /// Abort the script after this many seconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Show B-tree statistics
    Stat,

    /// Show environment information
    Info,

    /// Copy the environment to another directory
    Copy {
        /// Destination directory; must exist and be empty
        dest: PathBuf,
    },

    /// Show version information
    Version,
}

fn read_stdin() -> anyhow::Result<Vec<u8>> {
    let mut buf = Vec::new();
    std::io::stdin().read_to_end(&mut buf).context("failed to read stdin")?;
    Ok(buf)
}

fn open(cli: &Cli) -> anyhow::Result<Environment> {
    let options = match &cli.config {
        Some(file) => EnvOptions::from_file(file)
            .with_context(|| format!("failed to load options from {}", file.display()))?,
        None => EnvOptions::default(),
    };
    let env = Environment::open_with(Binding::new()?, &cli.path, &options)
        .with_context(|| format!("failed to open environment at {}", cli.path.display()))?;
    Ok(env)
}

fn service(cli: &Cli, env: Environment) -> KvService {
    let service = KvService::new(env);
    match &cli.database {
        Some(name) => service.with_database(name.clone()),
        None => service,
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Prints the error body of a point operation and exits nonzero.
fn fail(body: ErrorResponse) -> ! {
    if let Ok(json) = serde_json::to_string(&body) {
        println!("{}", json);
    }
    std::process::exit(if body.status() == 404 { 2 } else { 1 })
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Version => {
            let version = Binding::new()?.version();
            println!("mapkv v{}", env!("CARGO_PKG_VERSION"));
            println!("{}", version.text);
        }
        Commands::Get { key } => {
            let service = service(&cli, open(&cli)?);
            match service.get(key) {
                Ok(Some(value)) => std::io::stdout().write_all(&value)?,
                Ok(None) => fail(ErrorResponse::not_found(key)),
                Err(e) => fail(ErrorResponse::from_error(&e, Some(key))),
            }
        }
        Commands::Set { key, value } => {
            let value = match value {
                Some(value) => value.clone().into_bytes(),
                None => read_stdin()?,
            };
            let service = service(&cli, open(&cli)?);
            match service.set(key, &value) {
                Ok(response) => print_json(&response)?,
                Err(e) => fail(ErrorResponse::from_error(&e, Some(key))),
            }
        }
        Commands::Delete { key } => {
            let service = service(&cli, open(&cli)?);
            match service.delete(key) {
                Ok(response) => print_json(&response)?,
                Err(e) => fail(ErrorResponse::from_error(&e, Some(key))),
            }
        }
        Commands::Dump { script } => {
            let service = service(&cli, open(&cli)?);
            if *script {
                println!("{}", service.dump_script()?.to_json()?);
            } else {
                for entry in service.dump()?.entries {
                    println!(
                        "{}\t{}",
                        String::from_utf8_lossy(&entry.key),
                        String::from_utf8_lossy(&entry.value)
                    );
                }
            }
        }
        Commands::Batch { file } => {
            let json = match file {
                Some(file) => std::fs::read_to_string(file)
                    .with_context(|| format!("failed to read {}", file.display()))?,
                None => String::from_utf8(read_stdin()?).context("request is not UTF-8")?,
            };
            // Malformed requests fail before any transaction is opened
            let request = BatchRequest::from_json(&json).context("malformed batch request")?;
            let service = service(&cli, open(&cli)?);
            print_json(&service.execute(&request)?)?;
        }
        Commands::Script { file, timeout } => {
            let script = std::fs::read_to_string(file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let env = open(&cli)?;
            let mut executor = LuaExecutor::new(env, timeout.map(Duration::from_secs));
            if let Some(name) = &cli.database {
                executor = executor.with_database(name.clone());
            }
            if let Some(result) = executor.execute_with_result(&script)? {
                println!("{}", result);
            }
        }
        Commands::Stat => {
            let env = open(&cli)?;
            let stat = match &cli.database {
                None => env.stat()?,
                Some(name) => env.read(|txn| txn.database(Some(name.as_str()), Default::default())?.stat())?,
            };
            print_json(&stat)?;
        }
        Commands::Info => {
            let env = open(&cli)?;
            print_json(&env.info()?)?;
        }
        Commands::Copy { dest } => {
            if !dest.is_dir() {
                bail!("destination {} is not a directory", dest.display());
            }
            let env = open(&cli)?;
            env.copy(dest)?;
            log::info!("Copied {} to {}", cli.path.display(), dest.display());
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { log::LevelFilter::Debug } else { log::LevelFilter::Warn };
    env_logger::Builder::from_default_env().filter_level(level).init();

    run(cli)
}
