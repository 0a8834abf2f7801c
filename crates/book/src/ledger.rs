//! One side of the book: an ordered, bounded price-to-quantity ledger.

use std::collections::BTreeMap;

use rust_decimal::Decimal;

use crate::error::BookError;
use crate::level::PriceLevel;

/// Which side of the book a ledger represents.
///
/// The side determines the ranking direction: the best ask is the minimum
/// stored price, the best bid the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Bid,
    Ask,
}

/// A sorted, mutable price-to-quantity mapping for one side of the book.
///
/// Keys are unique prices; stored quantities are always strictly positive.
/// A delta carrying quantity zero removes the level instead of storing it.
#[derive(Debug, Clone)]
pub struct PriceLevelLedger {
    side: Side,
    levels: BTreeMap<Decimal, Decimal>,
}

impl PriceLevelLedger {
    /// Create an empty ledger for the given side.
    pub fn new(side: Side) -> Self {
        Self {
            side,
            levels: BTreeMap::new(),
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    /// Apply a single level change.
    ///
    /// Quantity zero removes the price (a no-op if absent); a positive
    /// quantity inserts or overwrites. Rejects non-positive prices and
    /// negative quantities; this is the malformed-delta boundary.
    pub fn apply(&mut self, price: Decimal, quantity: Decimal) -> Result<(), BookError> {
        if price <= Decimal::ZERO {
            return Err(BookError::InvalidPrice(price));
        }
        if quantity < Decimal::ZERO {
            return Err(BookError::NegativeQuantity { price, quantity });
        }

        if quantity.is_zero() {
            self.levels.remove(&price);
        } else {
            self.levels.insert(price, quantity);
        }
        Ok(())
    }

    /// Retain only the `depth` best-ranked levels, discarding the rest.
    ///
    /// A pure truncation: the surviving levels are untouched.
    pub fn trim_to_depth(&mut self, depth: usize) {
        if self.levels.len() <= depth {
            return;
        }
        if depth == 0 {
            self.levels.clear();
            return;
        }

        match self.side {
            // Asks rank ascending: keep the `depth` lowest prices.
            Side::Ask => {
                if let Some(split) = self.levels.keys().nth(depth).copied() {
                    self.levels.split_off(&split);
                }
            }
            // Bids rank descending: keep the `depth` highest prices.
            Side::Bid => {
                let cut = self.levels.len() - depth;
                if let Some(split) = self.levels.keys().nth(cut).copied() {
                    self.levels = self.levels.split_off(&split);
                }
            }
        }
    }

    /// The top-ranked level, or `None` if the ledger is empty.
    pub fn best(&self) -> Option<PriceLevel> {
        let entry = match self.side {
            Side::Ask => self.levels.first_key_value(),
            Side::Bid => self.levels.last_key_value(),
        };
        entry.map(|(price, qty)| PriceLevel::new(*price, *qty))
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Read-only view of all levels, best-first.
    pub fn levels(&self) -> Vec<PriceLevel> {
        self.iter_best_first().collect()
    }

    /// The `n` best-ranked levels, best-first.
    pub fn top(&self, n: usize) -> Vec<PriceLevel> {
        self.iter_best_first().take(n).collect()
    }

    /// Drop every level, leaving an empty ledger.
    pub fn clear(&mut self) {
        self.levels.clear();
    }

    fn iter_best_first(&self) -> impl Iterator<Item = PriceLevel> + '_ {
        let iter: Box<dyn Iterator<Item = (&Decimal, &Decimal)>> = match self.side {
            Side::Ask => Box::new(self.levels.iter()),
            Side::Bid => Box::new(self.levels.iter().rev()),
        };
        iter.map(|(price, qty)| PriceLevel::new(*price, *qty))
    }
}
