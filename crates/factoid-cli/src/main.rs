//! Factoid CLI
//!
//! Operator access to a reply store: one store operation per invocation.
//!
//! # Usage
//! ```bash
//! factoid --config factoid.toml set greeting say "hi there" --editor "nick!user@host"
//! factoid get greeting
//! factoid replace greeting /there/ everyone --editor "nick!user@host"
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::builder::NonEmptyStringValueParser;
use clap::{Parser, Subcommand};
use factoid_core::{Intent, NewRecord, Pattern, Store, StoreConfig, StoreError};
use tracing_subscriber::EnvFilter;

/// Factoid - persistent reply store for chat bots
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the TOML configuration (defaults apply when absent)
    #[arg(short, long, value_name = "FILE", default_value = "factoid.toml")]
    config: PathBuf,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a key (following aliases) and print its reply
    Get { key: String },

    /// Store a reply
    Set {
        key: String,
        /// say, act or alias
        intent: Intent,
        #[arg(value_parser = NonEmptyStringValueParser::new())]
        message: String,
        #[arg(long, value_parser = NonEmptyStringValueParser::new())]
        editor: String,
    },

    /// Delete a reply, keeping its lock
    Delete {
        key: String,
        #[arg(long)]
        editor: String,
    },

    /// Edit a reply in place with a /pattern/flags substitution
    Replace {
        key: String,
        pattern: String,
        replacement: String,
        #[arg(long)]
        editor: String,
    },

    /// Lock a key against edits by non-admins
    Freeze { key: String },

    /// Remove the lock from a key
    Unfreeze { key: String },

    /// Print the raw stored record as JSON
    Show { key: String },

    /// List keys that hold a reply
    List,

    /// Rewrite the log to one snapshot per key
    Compact,

    /// Write a default configuration file
    InitConfig { path: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Commands::InitConfig { path } = &cli.command {
        StoreConfig::default()
            .to_file(path)
            .with_context(|| format!("writing {}", path.display()))?;
        println!("Wrote default configuration to {}", path.display());
        return Ok(ExitCode::SUCCESS);
    }

    let config = load_config(&cli.config)?;
    let store = Store::open(config.clone(), config.authority(), config.update_policy())
        .context("opening record store")?;

    match run(&store, cli.command).await {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) if e.is_user_error() => {
            eprintln!("{}", e);
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e).context("store failure"),
    }
}

fn init_tracing(verbose: bool) {
    if verbose {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new("debug"))
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn load_config(path: &Path) -> anyhow::Result<StoreConfig> {
    if path.exists() {
        StoreConfig::from_file(path).with_context(|| format!("loading {}", path.display()))
    } else {
        tracing::debug!(path = %path.display(), "no configuration file, using defaults");
        Ok(StoreConfig::default())
    }
}

async fn run(store: &Store, command: Commands) -> Result<(), StoreError> {
    match command {
        Commands::Get { key } => {
            let reply = store.get(&key)?;
            match reply.intent {
                Intent::Act => println!("* {}", reply.message),
                _ => println!("{}", reply.message),
            }
        }
        Commands::Set {
            key,
            intent,
            message,
            editor,
        } => {
            let record = store.set(&key, NewRecord::new(intent, message, editor)).await?;
            println!("Learned '{}'{}", key, frozen_suffix(record.frozen));
        }
        Commands::Delete { key, editor } => {
            store.delete(&key, &editor).await?;
            println!("Forgot '{}'", key);
        }
        Commands::Replace {
            key,
            pattern,
            replacement,
            editor,
        } => {
            let pattern = Pattern::parse(&pattern)?;
            let record = store.replace(&key, &pattern, &replacement, &editor).await?;
            println!("{}", record.message.unwrap_or_default());
        }
        Commands::Freeze { key } => {
            store.freeze(&key).await?;
            println!("Locked '{}'", key);
        }
        Commands::Unfreeze { key } => {
            if store.unfreeze(&key).await? {
                println!("Unlocked '{}'", key);
            } else {
                println!("Nothing stored under '{}'", key);
            }
        }
        Commands::Show { key } => match store.record(&key) {
            Some(record) => println!(
                "{}",
                serde_json::to_string_pretty(&record).unwrap_or_else(|e| e.to_string())
            ),
            None => return Err(StoreError::DoesNotExist),
        },
        Commands::List => {
            for key in store.keys() {
                println!("{}", key);
            }
        }
        Commands::Compact => {
            let removed = store.compact()?;
            println!("Removed {} superseded snapshots", removed);
        }
        Commands::InitConfig { .. } => unreachable!("handled before the store is opened"),
    }
    Ok(())
}

fn frozen_suffix(frozen: bool) -> &'static str {
    if frozen {
        " (locked)"
    } else {
        ""
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_set_requires_non_empty_message() {
        let parsed = Cli::try_parse_from(["factoid", "set", "k", "say", "", "--editor", "u1"]);
        assert!(parsed.is_err());

        let parsed =
            Cli::try_parse_from(["factoid", "set", "k", "act", "waves", "--editor", "u1"]).unwrap();
        assert!(matches!(
            parsed.command,
            Commands::Set { intent: Intent::Act, .. }
        ));
    }
}
