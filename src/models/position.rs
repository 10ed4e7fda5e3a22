//! Position model and the (symbol, side) key used to identify one leg.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of a position or order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// The side of the market order that closes a position held in this direction.
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "Buy",
            Side::Sell => "Sell",
        }
    }

    pub fn parse(s: &str) -> Option<Side> {
        match s {
            "Buy" => Some(Side::Buy),
            "Sell" => Some(Side::Sell),
            _ => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one position leg. Hedge-mode accounts can hold both a Buy and
/// a Sell leg on the same symbol, so the symbol alone is not enough.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PositionKey {
    pub symbol: String,
    pub side: Side,
}

impl PositionKey {
    pub fn new(symbol: impl Into<String>, side: Side) -> Self {
        Self {
            symbol: symbol.into(),
            side,
        }
    }

    /// String form used in the persisted state document ("BTCUSDT-Buy").
    pub fn label(&self) -> String {
        format!("{}-{}", self.symbol, self.side)
    }

    /// Parse the persisted form back into a typed key.
    pub fn parse(label: &str) -> Option<PositionKey> {
        let (symbol, side) = label.rsplit_once('-')?;
        if symbol.is_empty() {
            return None;
        }
        Some(PositionKey::new(symbol, Side::parse(side)?))
    }
}

impl fmt::Display for PositionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.symbol, self.side)
    }
}

/// An open position as reported by the venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: Side,

    /// Contract quantity, venue precision.
    pub size: Decimal,

    /// Average entry price.
    pub entry_price: Decimal,

    /// Leverage as reported by the venue; mirrored verbatim on opens.
    #[serde(default)]
    pub leverage: String,

    /// Venue slot for hedge-mode accounts (0 one-way, 1 Buy leg, 2 Sell leg).
    #[serde(default)]
    pub position_idx: u8,

    /// Currently applied protective stop, if any.
    #[serde(default)]
    pub stop_loss: Option<Decimal>,
}

impl Position {
    pub fn key(&self) -> PositionKey {
        PositionKey::new(self.symbol.clone(), self.side)
    }
}
