//! # tether
//!
//! Offline maintenance for tether queue files: locate, inspect, append to
//! and purge the `<api_key>.eventstream` backlog of a channel. Every command
//! takes the same advisory lock a live channel does, so it is safe to run
//! next to one.

#![deny(unsafe_code)]

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use tether_core::EventRecord;
use tether_core::logging::init_subscriber;
use tether_queue::{PurgeMode, QueueContext, QueueEntry, QueueFile, StreamRegistry};
use tether_settings::TetherSettings;

/// Tether queue maintenance.
#[derive(Parser, Debug)]
#[command(name = "tether", about = "Inspect and maintain tether event queues")]
struct Cli {
    /// Settings file (defaults to `~/.tether/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Queue directory (overrides settings).
    #[arg(long, global = true)]
    queue_dir: Option<PathBuf>,

    /// Log filter (overrides settings; `RUST_LOG` still wins).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Print the queue file path for an API key.
    Path {
        /// API key of the channel.
        api_key: String,
    },
    /// List pending records, flagging lines that do not decode.
    Inspect {
        /// API key of the channel.
        api_key: String,
        /// Emit a JSON array instead of one line per record.
        #[arg(long)]
        json: bool,
    },
    /// Append a record as if the peer were disconnected.
    Enqueue {
        /// API key of the channel.
        api_key: String,
        /// Event name.
        event: String,
        /// JSON payload.
        #[arg(long)]
        data: Option<String>,
        /// Epoch milliseconds (defaults to now).
        #[arg(long)]
        timestamp: Option<i64>,
    },
    /// Remove pending records.
    Purge {
        /// API key of the channel.
        api_key: String,
        /// Only remove lines that fail to decode.
        #[arg(long)]
        malformed_only: bool,
    },
}

impl Cli {
    fn load_settings(&self) -> Result<TetherSettings> {
        let path = self
            .settings
            .clone()
            .unwrap_or_else(tether_settings::settings_path);
        let mut settings = tether_settings::load_settings_from_path(&path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?;
        if let Some(dir) = &self.queue_dir {
            settings.queue.dir.clone_from(dir);
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.load_settings()?;
    init_subscriber(&settings.logging.level, settings.logging.format);

    let ctx = QueueContext::from_settings(&settings.queue, Arc::new(StreamRegistry::new()));
    let mut stdout = std::io::stdout().lock();
    run(&ctx, cli.command, &mut stdout).await
}

async fn run(ctx: &QueueContext, command: Command, out: &mut impl Write) -> Result<()> {
    match command {
        Command::Path { api_key } => {
            let queue = QueueFile::open(ctx, &api_key)?;
            writeln!(out, "{}", queue.path().display())?;
        }
        Command::Inspect { api_key, json } => {
            let queue = QueueFile::open(ctx, &api_key)?;
            let entries = queue.inspect().await?;
            if json {
                let rows: Vec<Value> = entries.iter().map(entry_json).collect();
                writeln!(out, "{}", serde_json::to_string_pretty(&rows)?)?;
            } else {
                for entry in &entries {
                    writeln!(out, "{}", entry_line(entry))?;
                }
            }
        }
        Command::Enqueue {
            api_key,
            event,
            data,
            timestamp,
        } => {
            if event.is_empty() {
                bail!("event name must not be empty");
            }
            let data = match data {
                Some(raw) => serde_json::from_str(&raw).context("--data is not valid JSON")?,
                None => Value::Null,
            };
            let queue = QueueFile::open(ctx, &api_key)?;
            queue.ensure().await?;
            let record = EventRecord::new(event, data, timestamp);
            queue.append(&record).await?;
            tracing::info!(api_key, event = %record.event, "enqueued record");
        }
        Command::Purge {
            api_key,
            malformed_only,
        } => {
            let mode = if malformed_only {
                PurgeMode::MalformedOnly
            } else {
                PurgeMode::All
            };
            let queue = QueueFile::open(ctx, &api_key)?;
            let removed = queue.purge(mode).await?;
            writeln!(out, "removed {removed} line(s)")?;
        }
    }
    Ok(())
}

fn entry_line(entry: &QueueEntry) -> String {
    match &entry.record {
        Ok(r) => format!("{}\t{}\t{}\t{}", entry.line, r.timestamp, r.event, r.data),
        Err(e) => format!("{}\tMALFORMED\t{e}", entry.line),
    }
}

fn entry_json(entry: &QueueEntry) -> Value {
    match &entry.record {
        Ok(r) => json!({ "line": entry.line, "record": r }),
        Err(e) => json!({ "line": entry.line, "raw": entry.raw_lossy(), "error": e.to_string() }),
    }
}
