//! The replication pipeline: poll, classify, aggregate, execute, reconcile.

pub mod aggregator;
pub mod executor;
pub mod poller;
pub mod quantize;
pub mod reconciler;
pub mod stoploss;

#[cfg(test)]
pub mod testkit;

pub use aggregator::OrderAggregator;
pub use executor::ActionExecutor;
pub use poller::new_fills;
pub use quantize::Quantizer;
pub use reconciler::Reconciler;
