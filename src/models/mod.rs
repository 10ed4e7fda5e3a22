//! Data models for positions, fills, discrepancies, and domain events.

mod discrepancy;
mod event;
mod fill;
mod position;

pub use discrepancy::{Discrepancy, DiscrepancyKind};
pub use event::{CopyEvent, EventKind};
pub use fill::{Fill, FillAction, FillIntent};
pub use position::{Position, PositionKey, Side};
