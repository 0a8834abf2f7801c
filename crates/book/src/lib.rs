//! Locally mirrored order-book state for one symbol.
//!
//! [`PriceLevelLedger`] holds one side of the book as a sorted
//! price-to-quantity map; [`OrderBookState`] owns both sides plus the
//! sequence metadata that arbitrates which incremental updates are
//! admissible. Built from an authoritative snapshot, mutated in place by
//! delta batches, replaced wholesale on resync.
//!
//! # Example
//!
//! ```rust
//! use book::OrderBookState;
//! use model::DepthSnapshot;
//! use rust_decimal_macros::dec;
//!
//! let snapshot = DepthSnapshot {
//!     symbol: "ETHBTC".to_string(),
//!     sequence: 10,
//!     bids: vec![(dec!(99), dec!(1))],
//!     asks: vec![(dec!(100), dec!(1)), (dec!(101), dec!(2))],
//! };
//! let book = OrderBookState::from_snapshot(&snapshot, 5).unwrap();
//! assert_eq!(book.best_ask().unwrap().price, dec!(100));
//! ```

mod error;
mod ledger;
mod level;
mod state;

pub use error::BookError;
pub use ledger::{PriceLevelLedger, Side};
pub use level::PriceLevel;
pub use state::{ApplyOutcome, OrderBookState};
