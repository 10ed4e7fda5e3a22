//! Fixed-precision quantization against the venue's precision rules.
//!
//! Quantity and price precision are independent; both come from
//! configuration rather than per-symbol instrument lookups.

use rust_decimal::{Decimal, RoundingStrategy};

#[derive(Debug, Clone, Copy)]
pub struct Quantizer {
    qty_dp: u32,
    price_dp: u32,
}

impl Quantizer {
    pub fn new(qty_dp: u32, price_dp: u32) -> Self {
        Self { qty_dp, price_dp }
    }

    /// Truncate a quantity toward zero to venue precision. Never rounds up:
    /// a scaled copy must not exceed what the multiplier allows.
    pub fn qty(&self, value: Decimal) -> Decimal {
        value.round_dp_with_strategy(self.qty_dp, RoundingStrategy::ToZero)
    }

    /// Scale a source quantity by the copy multiplier and quantize.
    pub fn scale_qty(&self, source_qty: Decimal, multiplier: Decimal) -> Decimal {
        self.qty(source_qty * multiplier)
    }

    /// Smallest representable quantity step; size comparisons treat anything
    /// below this as equal.
    pub fn qty_epsilon(&self) -> Decimal {
        Decimal::new(1, self.qty_dp)
    }

    /// Round a price down to the venue increment.
    pub fn price_floor(&self, value: Decimal) -> Decimal {
        value.round_dp_with_strategy(self.price_dp, RoundingStrategy::ToNegativeInfinity)
    }

    /// Round a price up to the venue increment.
    pub fn price_ceil(&self, value: Decimal) -> Decimal {
        value.round_dp_with_strategy(self.price_dp, RoundingStrategy::ToPositiveInfinity)
    }
}
