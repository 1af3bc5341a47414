//! opsdesk-configctl
//!
//! Operator tool for the configuration records of the opsdesk dashboard,
//! backed by a local SQLite entity store.

mod roles;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use opsdesk_config::{ConfigStore, ConfigStoreSettings};
use opsdesk_store::SqliteEntityStore;

#[derive(Parser, Debug)]
#[command(name = "opsdesk-configctl", version, about)]
struct Args {
    /// SQLite database holding the config records
    #[arg(long, env = "OPSDESK_DB", default_value = "opsdesk.db")]
    db: PathBuf,

    /// TOML file with configuration store settings
    #[arg(long, env = "OPSDESK_SETTINGS")]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the current value stored under a key
    Get {
        key: String,
        /// JSON printed when nothing usable is stored
        #[arg(long, default_value = "null")]
        fallback: String,
    },
    /// Store a JSON value under a key; `@path` reads it from a file
    Set { key: String, value: String },
    /// List every stored generation of a key, newest first
    Inspect { key: String },
    /// Show or edit the roles configuration
    Roles(roles::RolesArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let settings = load_settings(args.settings.as_deref())?;
    let store = SqliteEntityStore::open(&args.db)
        .with_context(|| format!("opening {}", args.db.display()))?;
    let configs = Arc::new(ConfigStore::new(Arc::new(store), settings)?);

    let result = run(args.cmd, &configs).await;
    // Let queued deletions of superseded generations finish before exit.
    configs.cleanup_queue().flush().await;
    result
}

async fn run(cmd: Command, configs: &Arc<ConfigStore>) -> anyhow::Result<()> {
    match cmd {
        Command::Get { key, fallback } => {
            let fallback: Value =
                serde_json::from_str(&fallback).context("--fallback must be JSON")?;
            let value = configs.load(&key, fallback).await;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Command::Set { key, value } => {
            let data = parse_value(&value)?;
            let receipt = configs.save(&key, &data).await?;
            println!(
                "saved {} as {} ({:?}, {} chunks, {} superseded)",
                key,
                receipt.master_id,
                receipt.mode,
                receipt.chunk_ids.len(),
                receipt.superseded
            );
        }
        Command::Inspect { key } => {
            let summaries = configs.inspect(&key).await;
            if summaries.is_empty() {
                bail!("no records stored under {}", key);
            }
            println!("{}", serde_json::to_string_pretty(&summaries)?);
        }
        Command::Roles(args) => roles::run(args, Arc::clone(configs)).await?,
    }
    Ok(())
}

fn load_settings(path: Option<&std::path::Path>) -> anyhow::Result<ConfigStoreSettings> {
    let Some(path) = path else {
        return Ok(ConfigStoreSettings::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading settings {}", path.display()))?;
    let settings = ConfigStoreSettings::from_toml(&text)
        .with_context(|| format!("parsing settings {}", path.display()))?;
    settings.validate()?;
    Ok(settings)
}

fn parse_value(raw: &str) -> anyhow::Result<Value> {
    let text = match raw.strip_prefix('@') {
        Some(path) => {
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path))?
        }
        None => raw.to_string(),
    };
    serde_json::from_str(&text).context("value must be JSON")
}
