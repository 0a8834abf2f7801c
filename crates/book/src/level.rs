//! Price level representation.

use rust_decimal::Decimal;

/// A single price level: a price and the quantity resting at it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceLevel {
    pub price: Decimal,
    /// Always strictly positive; zero-quantity levels are removed, never stored.
    pub quantity: Decimal,
}

impl PriceLevel {
    pub fn new(price: Decimal, quantity: Decimal) -> Self {
        Self { price, quantity }
    }
}
