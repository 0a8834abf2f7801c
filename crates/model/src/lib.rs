//! Shared data types for the depth synchronization pipeline.
//!
//! Prices and quantities are `rust_decimal::Decimal` throughout to avoid
//! the precision loss of `f64` keys.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A `(price, quantity)` pair as delivered by a transport.
///
/// A quantity of zero is a removal signal: the price level is no longer
/// present on that side of the book. Zero quantities are never stored.
pub type LevelChange = (Decimal, Decimal);

/// One batch of incremental depth changes for a single symbol.
///
/// Covers the sequence range `[first_sequence, final_sequence]`. Consumed
/// once by the synchronizer and discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltaBatch {
    pub symbol: String,
    /// First sequence number covered by this batch.
    pub first_sequence: u64,
    /// Last sequence number covered by this batch.
    pub final_sequence: u64,
    /// Exchange event time, milliseconds since epoch.
    pub event_time_ms: i64,
    /// Bid-side changes in delivery order.
    pub bid_changes: Vec<LevelChange>,
    /// Ask-side changes in delivery order.
    pub ask_changes: Vec<LevelChange>,
}

/// A full authoritative depth snapshot for a single symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepthSnapshot {
    pub symbol: String,
    /// Sequence number the snapshot is current as of.
    pub sequence: u64,
    pub bids: Vec<LevelChange>,
    pub asks: Vec<LevelChange>,
}

/// The state handed to a persistence sink after a successful apply or
/// snapshot replace.
///
/// Levels are ordered best-first (bids descending, asks ascending) and
/// already trimmed to the configured depth limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookUpdate {
    pub symbol: String,
    pub sequence: u64,
    pub event_time_ms: i64,
    pub bids: Vec<LevelChange>,
    pub asks: Vec<LevelChange>,
}
