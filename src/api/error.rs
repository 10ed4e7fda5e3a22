//! Venue error taxonomy.
//!
//! Bybit tags every response with a `retCode`; the engine only needs to
//! distinguish the handful of classes that change control flow. Everything
//! else lands in `Rejected` and is retried by the next reconciliation pass.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum VenueError {
    /// Invalid or expired credentials. Fatal at startup, never retried.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Venue rate limit hit; retried with exponential backoff.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Stop price rejected as too close to the current market price; the
    /// caller retries with the next narrower tier.
    #[error("price too close to market: {0}")]
    PriceTooClose(String),

    /// The venue already holds the requested value; treated as success.
    #[error("not modified")]
    NotModified,

    /// Order not found or already filled; treated as success-no-op.
    #[error("not found: {0}")]
    NotFound(String),

    /// Any other venue rejection (insufficient margin, reduce-only
    /// violation, invalid quantity, ...). Terminal for the attempt.
    #[error("order rejected ({code}): {message}")]
    Rejected { code: i64, message: String },

    /// Network failure, timeout, or 5xx; retried with backoff.
    #[error("network error: {0}")]
    Network(String),

    /// The venue answered with something we could not decode.
    #[error("malformed response: {0}")]
    Parse(String),
}

impl VenueError {
    /// Map a Bybit V5 `retCode`/`retMsg` pair onto the taxonomy.
    pub fn from_ret(code: i64, msg: &str) -> VenueError {
        let lower = msg.to_lowercase();
        match code {
            10003 | 10004 | 33004 => VenueError::Auth(msg.to_string()),
            10006 => VenueError::RateLimited(msg.to_string()),
            34040 => VenueError::NotModified,
            110001 => VenueError::NotFound(msg.to_string()),
            110043 | 10001 if lower.contains("too close") || lower.contains("10_pcnt") => {
                VenueError::PriceTooClose(msg.to_string())
            }
            _ if lower.contains("not modified") => VenueError::NotModified,
            _ if lower.contains("too close") || lower.contains("10_pcnt") => {
                VenueError::PriceTooClose(msg.to_string())
            }
            _ => VenueError::Rejected {
                code,
                message: msg.to_string(),
            },
        }
    }

    /// Errors worth retrying in place with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, VenueError::RateLimited(_) | VenueError::Network(_))
    }

    /// Errors that mean the requested state already holds.
    pub fn is_noop(&self) -> bool {
        matches!(self, VenueError::NotModified | VenueError::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ret_code_mapping() {
        assert!(matches!(
            VenueError::from_ret(10003, "invalid api key"),
            VenueError::Auth(_)
        ));
        assert!(matches!(
            VenueError::from_ret(10006, "too many visits"),
            VenueError::RateLimited(_)
        ));
        assert!(matches!(
            VenueError::from_ret(34040, "not modified"),
            VenueError::NotModified
        ));
        assert!(matches!(
            VenueError::from_ret(110043, "StopLoss price too close to market"),
            VenueError::PriceTooClose(_)
        ));
        assert!(matches!(
            VenueError::from_ret(10001, "expect Falling, but trigger_price[x] <= 10_pcnt"),
            VenueError::PriceTooClose(_)
        ));
        assert!(matches!(
            VenueError::from_ret(110007, "insufficient available balance"),
            VenueError::Rejected { code: 110007, .. }
        ));
    }

    #[test]
    fn transient_classification() {
        assert!(VenueError::RateLimited("x".into()).is_transient());
        assert!(VenueError::Network("timeout".into()).is_transient());
        assert!(!VenueError::Auth("x".into()).is_transient());
        assert!(!VenueError::PriceTooClose("x".into()).is_transient());
    }
}
