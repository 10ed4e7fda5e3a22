//! Tiered protective stop-loss placement.
//!
//! Each tier is a target loss in USD, widest protection first. The price
//! distance for a tier is `tier / quantity`; the candidate stop is rounded
//! toward the conservative side (down for longs, up for shorts). Tiers that
//! land at or below zero are skipped. When the venue rejects a stop as too
//! close to the market, the next narrower tier is tried instead of failing
//! the position outright.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, warn};

use crate::api::{Venue, VenueError};
use crate::models::{Position, Side};

use super::quantize::Quantizer;

/// Compute the protective price for the first tier that yields a positive
/// stop. `None` means no tier can protect this position; the caller must
/// surface that, never swallow it.
pub fn protective_price(
    entry_price: Decimal,
    quantity: Decimal,
    side: Side,
    tiers: &[Decimal],
    quantizer: &Quantizer,
) -> Option<Decimal> {
    if entry_price <= Decimal::ZERO || quantity <= Decimal::ZERO {
        return None;
    }

    tiers
        .iter()
        .filter_map(|tier| candidate_for_tier(entry_price, quantity, side, *tier, quantizer))
        .next()
}

fn candidate_for_tier(
    entry_price: Decimal,
    quantity: Decimal,
    side: Side,
    tier_loss_usd: Decimal,
    quantizer: &Quantizer,
) -> Option<Decimal> {
    let price_delta = tier_loss_usd.abs() / quantity;
    let candidate = match side {
        Side::Buy => quantizer.price_floor(entry_price - price_delta),
        Side::Sell => quantizer.price_ceil(entry_price + price_delta),
    };

    (candidate > Decimal::ZERO).then_some(candidate)
}

/// Whether the currently applied stop already covers the widest tier.
///
/// Positions are re-checked every cycle; a stop already within 1.1x of the
/// widest tier's distance is left alone.
fn stop_already_adequate(position: &Position, widest_tier: Decimal) -> bool {
    let Some(current) = position.stop_loss else {
        return false;
    };
    if current <= Decimal::ZERO || position.size <= Decimal::ZERO {
        return false;
    }

    let current_distance = (position.entry_price - current).abs();
    let widest_distance = widest_tier.abs() / position.size;
    current_distance <= widest_distance * dec!(1.1)
}

/// Ensure the position carries a protective stop, walking the tier list.
///
/// Returns the applied price, or `None` when the existing stop was already
/// adequate or the venue reported the value unchanged. Exhausting every tier
/// yields `VenueError::PriceTooClose` from the last attempt so the caller can
/// emit an unprotected warning.
pub async fn ensure_protective_stop(
    venue: &dyn Venue,
    position: &Position,
    tiers: &[Decimal],
    quantizer: &Quantizer,
) -> Result<Option<Decimal>, VenueError> {
    if tiers.is_empty() || position.size <= Decimal::ZERO {
        return Ok(None);
    }

    if stop_already_adequate(position, tiers[0]) {
        return Ok(None);
    }

    let mut last_rejection: Option<VenueError> = None;

    for tier in tiers {
        let Some(stop_price) = candidate_for_tier(
            position.entry_price,
            position.size,
            position.side,
            *tier,
            quantizer,
        ) else {
            // Tier too wide for this price/size; try the next narrower one.
            continue;
        };

        if position.stop_loss == Some(stop_price) {
            return Ok(None);
        }

        match venue
            .set_trading_stop(&position.symbol, position.position_idx, stop_price)
            .await
        {
            Ok(()) => {
                info!(
                    symbol = %position.symbol,
                    side = %position.side,
                    stop = %stop_price,
                    tier = %tier,
                    "Protective stop applied"
                );
                return Ok(Some(stop_price));
            }
            Err(VenueError::NotModified) => return Ok(None),
            Err(e @ VenueError::PriceTooClose(_)) => {
                warn!(
                    symbol = %position.symbol,
                    tier = %tier,
                    "Stop rejected as too close to market, trying narrower tier"
                );
                last_rejection = Some(e);
                continue;
            }
            Err(e) => return Err(e),
        }
    }

    match last_rejection {
        Some(e) => Err(e),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quantizer() -> Quantizer {
        Quantizer::new(4, 2)
    }

    #[test]
    fn long_stop_sits_below_entry() {
        // 1.0 BTC at 50000 with a $50 tier and 0.1 multiplier applied
        // upstream: qty 0.1 -> delta 500 -> stop 49500.
        let stop =
            protective_price(dec!(50000), dec!(0.1), Side::Buy, &[dec!(50)], &quantizer());
        assert_eq!(stop, Some(dec!(49500)));
    }

    #[test]
    fn short_stop_sits_above_entry() {
        let stop =
            protective_price(dec!(50000), dec!(0.1), Side::Sell, &[dec!(50)], &quantizer());
        assert_eq!(stop, Some(dec!(50500)));
    }

    #[test]
    fn wider_tier_is_farther_from_entry() {
        let q = quantizer();
        let near = protective_price(dec!(3000), dec!(2), Side::Buy, &[dec!(10)], &q).unwrap();
        let far = protective_price(dec!(3000), dec!(2), Side::Buy, &[dec!(50)], &q).unwrap();
        assert!(far < near);

        let near = protective_price(dec!(3000), dec!(2), Side::Sell, &[dec!(10)], &q).unwrap();
        let far = protective_price(dec!(3000), dec!(2), Side::Sell, &[dec!(50)], &q).unwrap();
        assert!(far > near);
    }

    #[test]
    fn non_positive_candidate_skips_to_narrower_tier() {
        // qty 0.01 -> $50 tier needs a 5000 move, below zero at entry 3000;
        // the $10 tier (1000 move) is the first valid one.
        let stop = protective_price(
            dec!(3000),
            dec!(0.01),
            Side::Buy,
            &[dec!(50), dec!(10)],
            &quantizer(),
        );
        assert_eq!(stop, Some(dec!(2000)));
    }

    #[test]
    fn no_tier_fits_returns_none() {
        let stop = protective_price(
            dec!(100),
            dec!(0.01),
            Side::Buy,
            &[dec!(50), dec!(10), dec!(5)],
            &quantizer(),
        );
        assert_eq!(stop, None);
    }

    #[test]
    fn conservative_rounding_per_side() {
        // delta = 7 / 3 = 2.333...; long rounds down, short rounds up.
        let q = quantizer();
        let long = protective_price(dec!(100), dec!(3), Side::Buy, &[dec!(7)], &q).unwrap();
        assert_eq!(long, dec!(97.66));
        let short = protective_price(dec!(100), dec!(3), Side::Sell, &[dec!(7)], &q).unwrap();
        assert_eq!(short, dec!(102.34));
    }

    #[test]
    fn adequate_existing_stop_is_left_alone() {
        let position = Position {
            symbol: "BTCUSDT".to_string(),
            side: Side::Buy,
            size: dec!(0.1),
            entry_price: dec!(50000),
            leverage: "10".to_string(),
            position_idx: 1,
            stop_loss: Some(dec!(49550)), // distance 450 <= 500 * 1.1
        };
        assert!(stop_already_adequate(&position, dec!(50)));

        let position = Position {
            stop_loss: Some(dec!(49000)), // distance 1000 > 550
            ..position
        };
        assert!(!stop_already_adequate(&position, dec!(50)));
    }
}
