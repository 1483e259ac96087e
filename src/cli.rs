//! Command-line interface for tab-recall.
//!
//! Inspects and resets the persisted tab history, and replays scripted
//! browser sessions against the tracker.

use crate::config::{Config, LogLevel};
use crate::history::{HistorySnapshot, HistoryTracker, JsonFileStore, KeyValueStore, MemoryStore};
use crate::replay::{Replay, ReplayScript};
use crate::router::RouterOptions;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

/// tab-recall - Focus the previously active tab when a tab closes
#[derive(Parser)]
#[command(name = "tab-recall")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file to use instead of ~/.config/tab-recall/config.yaml
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// History file to use instead of the configured one
    #[arg(long, global = true, value_name = "PATH")]
    pub store: Option<PathBuf>,

    /// Log level for the debug log (off, error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL", value_parser = parse_log_level)]
    pub log_level: Option<LogLevel>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the persisted history, most recent tab last
    Show,

    /// Forget all persisted history
    Clear,

    /// Play a YAML script of browser actions and print the resulting history
    Replay {
        /// Script to play
        script: PathBuf,

        /// Keep history in memory instead of reading and writing the store
        #[arg(long)]
        ephemeral: bool,
    },
}

fn parse_log_level(value: &str) -> Result<LogLevel, String> {
    LogLevel::from_name(value).ok_or_else(|| format!("unknown log level '{}'", value))
}

/// Runtime options passed from CLI to the application
#[derive(Clone, Debug, Default)]
pub struct RuntimeOptions {
    /// Explicit config file
    pub config_path: Option<PathBuf>,
    /// Explicit history file
    pub store_path: Option<PathBuf>,
    /// Log level override from CLI (takes precedence over config and RUST_LOG)
    pub log_level: Option<LogLevel>,
}

impl Cli {
    pub fn runtime_options(&self) -> RuntimeOptions {
        RuntimeOptions {
            config_path: self.config.clone(),
            store_path: self.store.clone(),
            log_level: self.log_level,
        }
    }
}

/// Load the config named on the command line, or the default one
pub fn load_config(options: &RuntimeOptions) -> Result<Config> {
    match &options.config_path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

/// History file selected by `--store`, else by the config
pub fn store_path(config: &Config, options: &RuntimeOptions) -> PathBuf {
    options
        .store_path
        .clone()
        .unwrap_or_else(|| config.history_path())
}

/// Run a parsed subcommand
pub async fn run(command: Commands, config: &Config, options: &RuntimeOptions) -> Result<()> {
    let path = store_path(config, options);
    match command {
        Commands::Show => {
            let snapshot = read_history(Arc::new(JsonFileStore::new(&path))).await?;
            println!("History file: {}", path.display());
            print!("{}", format_snapshot(&snapshot));
        }
        Commands::Clear => {
            let tracker = HistoryTracker::spawn(Arc::new(JsonFileStore::new(&path)));
            tracker
                .clear()
                .await
                .with_context(|| format!("Failed to clear history at {:?}", path))?;
            tracker.shutdown().await?;
            println!("Cleared tab history at {}", path.display());
        }
        Commands::Replay { script, ephemeral } => {
            let script = ReplayScript::load(&script)?;
            let store: Arc<dyn KeyValueStore> = if ephemeral {
                Arc::new(MemoryStore::new())
            } else {
                Arc::new(JsonFileStore::new(&path))
            };
            let mut replay = Replay::start(store, RouterOptions::from(config)).await?;
            replay.run_script(&script).await?;
            let snapshot = replay.finish().await?;
            println!("Replayed {} steps", script.steps.len());
            print!("{}", format_snapshot(&snapshot));
        }
    }
    Ok(())
}

async fn read_history(store: Arc<dyn KeyValueStore>) -> Result<HistorySnapshot> {
    let tracker = HistoryTracker::spawn(store);
    tracker.load().await.context("Failed to load tab history")?;
    let snapshot = tracker.snapshot().await?;
    tracker.shutdown().await?;
    Ok(snapshot)
}

/// One line per window, tabs oldest to most recent
pub fn format_snapshot(snapshot: &HistorySnapshot) -> String {
    let mut out = String::new();
    if snapshot.tab_list_of_window.is_empty() {
        out.push_str("(no tab history)\n");
        return out;
    }
    for (window_id, tabs) in &snapshot.tab_list_of_window {
        let tabs: Vec<String> = tabs.iter().map(|t| t.to_string()).collect();
        let _ = writeln!(out, "window {}: {}", window_id, tabs.join(" -> "));
    }
    if snapshot.unsaved_changes {
        out.push_str("warning: latest changes could not be saved\n");
    }
    out
}
