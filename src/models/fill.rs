//! Execution events (fills) and the replication intents derived from them.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Side;

/// A single execution event reported by the source account, immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub symbol: String,

    /// Side of the executed order, not of the position it affected.
    pub side: Side,

    /// Unique, monotonically increasing execution id.
    pub exec_id: String,

    /// Quantity executed by this fill.
    pub exec_qty: Decimal,

    /// Non-zero when this fill reduced or closed an existing position.
    pub closed_size: Decimal,

    /// Venue execution type; only "Trade" fills are replicated.
    pub exec_type: String,
}

impl Fill {
    pub fn is_trade(&self) -> bool {
        self.exec_type == "Trade"
    }

    /// Side of the position this fill reduced. Only meaningful when
    /// `closed_size > 0`: a Buy fill closes a Sell leg and vice versa.
    pub fn closed_position_side(&self) -> Side {
        self.side.opposite()
    }
}

/// Whether a replicated action opens/increases exposure or reduces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FillAction {
    Open,
    Close,
}

impl FillAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FillAction::Open => "OPEN",
            FillAction::Close => "CLOSE",
        }
    }
}

/// A classified, scaled fill ready for aggregation.
#[derive(Debug, Clone)]
pub struct FillIntent {
    pub symbol: String,

    /// Order side to send on the destination.
    pub side: Side,

    /// Destination quantity, already scaled and quantized.
    pub qty: Decimal,

    pub action: FillAction,

    /// True when the key was already mapped, so the open only adds size.
    pub is_increase: bool,

    /// For CLOSE intents: the side of the position leg being closed.
    pub close_side_hint: Option<Side>,
}
