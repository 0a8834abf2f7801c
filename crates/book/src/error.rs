//! Book error types.

use rust_decimal::Decimal;
use thiserror::Error;

/// Local validation failures raised at the book boundary.
///
/// These indicate a malformed input, not a transport condition; the
/// synchronizer reacts by discarding the state and resyncing rather than
/// propagating a crash.
#[derive(Debug, Error)]
pub enum BookError {
    /// Price must be strictly positive.
    #[error("invalid price {0}")]
    InvalidPrice(Decimal),

    /// Quantity must be non-negative (zero is the removal signal).
    #[error("negative quantity {quantity} at price {price}")]
    NegativeQuantity { price: Decimal, quantity: Decimal },

    /// A resync snapshot older than the current state is never applied,
    /// preserving sequence monotonicity.
    #[error("stale snapshot: sequence {snapshot} behind current {current}")]
    StaleSnapshot { snapshot: u64, current: u64 },

    /// Snapshot was for a different symbol than the book tracks.
    #[error("symbol mismatch: book tracks {expected}, got {actual}")]
    SymbolMismatch { expected: String, actual: String },
}
