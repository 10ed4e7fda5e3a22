//! Drift between expected (scaled source) and actual destination state.

use rust_decimal::Decimal;
use serde::Serialize;

use super::PositionKey;

/// How a (symbol, side) pair diverges between the two accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DiscrepancyKind {
    /// Source holds the position, destination does not.
    MissingOnDestination,
    /// Destination holds a position with no source counterpart.
    ExtraOnDestination,
    /// Both hold it, but the destination size is off by more than the
    /// quantity epsilon.
    SizeMismatch,
}

/// One detected divergence, produced and consumed within a single
/// reconciliation pass.
#[derive(Debug, Clone, Serialize)]
pub struct Discrepancy {
    pub kind: DiscrepancyKind,
    #[serde(serialize_with = "serialize_key")]
    pub key: PositionKey,

    /// Scaled source quantity; zero for ExtraOnDestination.
    pub expected_qty: Decimal,

    /// Destination quantity; zero for MissingOnDestination.
    pub actual_qty: Decimal,
}

impl Discrepancy {
    /// Signed correction the destination needs: positive opens, negative
    /// reduces.
    pub fn delta(&self) -> Decimal {
        self.expected_qty - self.actual_qty
    }
}

fn serialize_key<S: serde::Serializer>(key: &PositionKey, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&key.label())
}
