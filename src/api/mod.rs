//! Venue connectivity: the abstract trading capability and its Bybit V5
//! implementation.

mod bybit_client;
mod error;
mod types;
mod venue;

pub use bybit_client::BybitClient;
pub use error::VenueError;
pub use types::{ClosedPnl, OpenOrder, OrderRequest};
pub use venue::Venue;
