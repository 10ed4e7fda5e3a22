//! Engine configuration.
//!
//! Loaded once at startup from the environment (a `.env` file is honored)
//! and passed by reference into every component; there is no ambient global
//! state. Missing or invalid required values abort startup.

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use std::path::PathBuf;

use crate::models::Side;

/// Position-index convention on the destination account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountMode {
    /// Single position slot per symbol (index 0).
    OneWay,
    /// Separate long/short legs (index 1 for Buy, 2 for Sell).
    Hedge,
}

impl AccountMode {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "oneway" | "one-way" | "one_way" => Ok(AccountMode::OneWay),
            "hedge" => Ok(AccountMode::Hedge),
            other => bail!("unknown account mode '{}', expected Oneway or Hedge", other),
        }
    }

    /// Venue slot for an order in the given direction.
    pub fn position_idx(&self, side: Side) -> u8 {
        match self {
            AccountMode::OneWay => 0,
            AccountMode::Hedge => match side {
                Side::Buy => 1,
                Side::Sell => 2,
            },
        }
    }
}

/// Credentials for one account.
#[derive(Debug, Clone)]
pub struct ApiCredentials {
    pub api_key: String,
    pub api_secret: String,
    /// Demo endpoint instead of mainnet.
    pub demo: bool,
}

#[derive(Debug, Clone)]
pub struct CopierConfig {
    pub source: ApiCredentials,
    pub destination: ApiCredentials,

    /// Destination quantity = source quantity x multiplier. Must be > 0.
    pub multiplier: Decimal,

    /// Decimal places for quantities on the destination venue.
    pub qty_precision: u32,

    /// Decimal places for prices (stop-loss rounding).
    pub price_precision: u32,

    /// Target-loss tiers in USD, widest protection first.
    pub sl_loss_tiers_usd: Vec<Decimal>,

    /// Seconds fills are buffered before one corrective action is emitted.
    pub aggregation_window_secs: u64,

    /// Main poll loop sleep.
    pub loop_interval_secs: u64,

    /// Coarse reconciliation cadence.
    pub reconcile_interval_secs: u64,

    /// A reconciliation pass is also triggered after this many consecutive
    /// idle poll cycles.
    pub idle_cycles_before_reconcile: u32,

    /// How many recent executions to fetch per poll.
    pub fill_fetch_limit: u32,

    /// Only copy these symbols; empty means copy everything.
    pub symbols_to_copy: Vec<String>,

    pub account_mode: AccountMode,

    /// Directory for the state document, event log, and status report.
    pub data_dir: PathBuf,
}

impl CopierConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let source = ApiCredentials {
            api_key: required("BYBIT_SOURCE_API_KEY")?,
            api_secret: required("BYBIT_SOURCE_API_SECRET")?,
            demo: flag("BYBIT_SOURCE_DEMO", false)?,
        };
        let destination = ApiCredentials {
            api_key: required("BYBIT_DEST_API_KEY")?,
            api_secret: required("BYBIT_DEST_API_SECRET")?,
            demo: flag("BYBIT_DEST_DEMO", true)?,
        };

        let multiplier: Decimal = optional("COPY_MULTIPLIER", "1.0")?
            .parse()
            .context("COPY_MULTIPLIER must be a decimal")?;
        if multiplier <= Decimal::ZERO {
            bail!("COPY_MULTIPLIER must be > 0, got {}", multiplier);
        }

        let mut sl_loss_tiers_usd = parse_tiers(&optional("SL_LOSS_TIERS_USD", "10, 20, 30")?)?;
        // Widest protection first; the calculator walks narrower on rejects.
        sl_loss_tiers_usd.sort_by(|a, b| b.cmp(a));

        let config = Self {
            source,
            destination,
            multiplier,
            qty_precision: optional("QTY_PRECISION", "4")?
                .parse()
                .context("QTY_PRECISION must be an integer")?,
            price_precision: optional("PRICE_PRECISION", "4")?
                .parse()
                .context("PRICE_PRECISION must be an integer")?,
            sl_loss_tiers_usd,
            aggregation_window_secs: optional("AGGREGATION_WINDOW_SECONDS", "3")?
                .parse()
                .context("AGGREGATION_WINDOW_SECONDS must be an integer")?,
            loop_interval_secs: optional("LOOP_INTERVAL_SECONDS", "10")?
                .parse()
                .context("LOOP_INTERVAL_SECONDS must be an integer")?,
            reconcile_interval_secs: optional("RECONCILE_INTERVAL_SECONDS", "300")?
                .parse()
                .context("RECONCILE_INTERVAL_SECONDS must be an integer")?,
            idle_cycles_before_reconcile: optional("IDLE_CYCLES_BEFORE_RECONCILE", "10")?
                .parse()
                .context("IDLE_CYCLES_BEFORE_RECONCILE must be an integer")?,
            fill_fetch_limit: optional("FILL_FETCH_LIMIT", "100")?
                .parse()
                .context("FILL_FETCH_LIMIT must be an integer")?,
            symbols_to_copy: parse_symbols(&optional("SYMBOLS_TO_COPY", "")?),
            account_mode: AccountMode::parse(&optional("ACCOUNT_MODE", "Hedge")?)?,
            data_dir: PathBuf::from(optional("DATA_DIR", "./data")?),
        };

        if config.loop_interval_secs == 0 {
            bail!("LOOP_INTERVAL_SECONDS must be at least 1");
        }

        Ok(config)
    }

    /// True when the symbol passes the copy allowlist.
    pub fn copies_symbol(&self, symbol: &str) -> bool {
        self.symbols_to_copy.is_empty() || self.symbols_to_copy.iter().any(|s| s == symbol)
    }
}

fn required(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("missing required environment variable {}", name))
}

fn optional(name: &str, default: &str) -> Result<String> {
    Ok(std::env::var(name).unwrap_or_else(|_| default.to_string()))
}

fn flag(name: &str, default: bool) -> Result<bool> {
    match std::env::var(name) {
        Ok(v) => v
            .parse()
            .with_context(|| format!("{} must be true or false", name)),
        Err(_) => Ok(default),
    }
}

fn parse_tiers(raw: &str) -> Result<Vec<Decimal>> {
    let mut tiers = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let tier: Decimal = part
            .parse()
            .with_context(|| format!("invalid stop-loss tier '{}'", part))?;
        if tier <= Decimal::ZERO {
            bail!("stop-loss tiers must be positive, got {}", tier);
        }
        tiers.push(tier);
    }
    Ok(tiers)
}

fn parse_symbols(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}
