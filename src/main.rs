//! Bybit Copy-Trading Engine
//!
//! Mirrors fills from a source account onto a destination account, scaled
//! by a fixed multiplier, with tiered protective stop-losses and periodic
//! drift reconciliation.

mod api;
mod bot;
mod config;
mod models;
mod notify;
mod replication;
mod state;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::bot::Copier;
use crate::config::CopierConfig;

#[derive(Parser)]
#[command(
    name = "bybit-copier",
    about = "Mirrors fills from a source Bybit account onto a destination account",
    version
)]
struct Cli {
    /// Log filter, e.g. "info" or "bybit_copier=debug"
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Initial sync, then replicate fills until interrupted
    Run,
    /// Mirror the source positions once and exit
    Sync,
    /// Cancel every destination order and flatten every position
    CloseAll,
    /// Print the resolved configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cli.log_level))
        .init();

    let config = CopierConfig::from_env()?;

    match cli.command {
        Command::Run => {
            let mut copier = Copier::new(config)?;
            copier.run().await
        }
        Command::Sync => {
            let mut copier = Copier::new(config)?;
            copier.initial_sync().await
        }
        Command::CloseAll => {
            let mut copier = Copier::new(config)?;
            copier.close_all().await
        }
        Command::Config => {
            print_config(&config);
            Ok(())
        }
    }
}

fn print_config(config: &CopierConfig) {
    info!(
        multiplier = %config.multiplier,
        qty_precision = config.qty_precision,
        price_precision = config.price_precision,
        account_mode = ?config.account_mode,
        "Copy settings"
    );
    info!(
        tiers = ?config.sl_loss_tiers_usd,
        "Stop-loss tiers (USD, widest first)"
    );
    info!(
        aggregation_window_secs = config.aggregation_window_secs,
        loop_interval_secs = config.loop_interval_secs,
        reconcile_interval_secs = config.reconcile_interval_secs,
        idle_cycles_before_reconcile = config.idle_cycles_before_reconcile,
        fill_fetch_limit = config.fill_fetch_limit,
        "Timing"
    );
    info!(
        symbols = ?config.symbols_to_copy,
        data_dir = %config.data_dir.display(),
        "Scope"
    );
    info!(
        source_key = %mask(&config.source.api_key),
        source_demo = config.source.demo,
        destination_key = %mask(&config.destination.api_key),
        destination_demo = config.destination.demo,
        "Accounts"
    );
}

fn mask(key: &str) -> String {
    if key.len() <= 4 {
        return "****".to_string();
    }
    format!("{}****", &key[..4])
}
