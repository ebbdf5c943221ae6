//! CLI for the gridsched transfer broker.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use gridsched_core::config::{self, GridConfig};
use gridsched_core::store::SqliteStore;
use std::path::PathBuf;

use commands::{run_drain, run_node, run_share, run_status};

/// Top-level CLI for the gridsched transfer broker.
#[derive(Debug, Parser)]
#[command(name = "gridsched")]
#[command(about = "gridsched: transfer broker scheduling node", long_about = None)]
pub struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/gridsched/config.toml).
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Switch {
    On,
    Off,
}

impl Switch {
    pub fn is_on(self) -> bool {
        self == Switch::On
    }
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Run this node: heartbeat, scheduler, optimizer and reaper until Ctrl-C.
    Run,

    /// Put a node into drain mode or take it out again.
    Drain {
        /// `on` stops the node from leading and admitting; `off` resumes.
        state: Switch,
        /// Node to toggle (default: this node's id).
        #[arg(long, value_name = "NODE")]
        node: Option<String>,
    },

    /// Show per-link queues, stream counts, node heartbeats and loop passes.
    Status,

    /// Set the share of an organization on a link.
    Share {
        /// Source endpoint or URL.
        source: String,
        /// Destination endpoint or URL.
        destination: String,
        /// Organization (VO); use `public` for the catch-all share.
        vo: String,
        /// Non-negative weight.
        weight: f64,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<GridConfig> {
    let cfg = match path {
        Some(path) => config::load_or_init_at(path)?,
        None => config::load_or_init()?,
    };
    cfg.validate()?;
    Ok(cfg)
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = load_config(cli.config.as_ref())?;
        tracing::debug!("loaded config: {:?}", cfg);
        let store = SqliteStore::open_at(cfg.database_path()?).await?;

        match cli.command {
            CliCommand::Run => run_node(store, cfg).await?,
            CliCommand::Drain { state, node } => {
                let node = node.unwrap_or_else(|| cfg.node_id());
                run_drain(&store, &node, state.is_on()).await?;
            }
            CliCommand::Status => run_status(&store).await?,
            CliCommand::Share {
                source,
                destination,
                vo,
                weight,
            } => run_share(&store, &source, &destination, &vo, weight).await?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
