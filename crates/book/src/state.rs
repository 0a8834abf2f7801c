//! Order-book state for one symbol: two ledgers plus sequence metadata.

use rust_decimal::Decimal;
use tracing::warn;

use model::{BookUpdate, DeltaBatch, DepthSnapshot};

use crate::error::BookError;
use crate::ledger::{PriceLevelLedger, Side};
use crate::level::PriceLevel;

/// How a delta batch was disposed of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Batch merged, sequence advanced, ledgers trimmed.
    Applied,
    /// Replay or out-of-order duplicate; state untouched.
    Stale,
    /// The batch starts past the next expected sequence; state untouched.
    /// The caller must resync from a fresh snapshot.
    GapDetected { expected: u64, actual: u64 },
}

/// The locally mirrored book for one symbol.
///
/// Constructed only from an authoritative snapshot, so it is never in a
/// half-initialized state. `last_sequence` is monotonically non-decreasing
/// for the life of the value and is the sole arbiter of delta
/// admissibility.
#[derive(Debug)]
pub struct OrderBookState {
    symbol: String,
    bids: PriceLevelLedger,
    asks: PriceLevelLedger,
    last_sequence: u64,
    last_event_time_ms: i64,
}

impl OrderBookState {
    /// Build a book from an authoritative snapshot, trimmed to `depth_limit`.
    pub fn from_snapshot(snapshot: &DepthSnapshot, depth_limit: usize) -> Result<Self, BookError> {
        let (bids, asks) = build_ledgers(snapshot, depth_limit)?;
        Ok(Self {
            symbol: snapshot.symbol.clone(),
            bids,
            asks,
            last_sequence: snapshot.sequence,
            last_event_time_ms: 0,
        })
    }

    /// Wholesale replacement from a fresh snapshot (resync).
    ///
    /// Rejects snapshots for another symbol, and snapshots older than the
    /// current state: applying one would move `last_sequence` backwards.
    /// On error the existing state is untouched.
    pub fn replace_from_snapshot(
        &mut self,
        snapshot: &DepthSnapshot,
        depth_limit: usize,
    ) -> Result<(), BookError> {
        if snapshot.symbol != self.symbol {
            return Err(BookError::SymbolMismatch {
                expected: self.symbol.clone(),
                actual: snapshot.symbol.clone(),
            });
        }
        if snapshot.sequence < self.last_sequence {
            return Err(BookError::StaleSnapshot {
                snapshot: snapshot.sequence,
                current: self.last_sequence,
            });
        }

        let (bids, asks) = build_ledgers(snapshot, depth_limit)?;
        self.bids = bids;
        self.asks = asks;
        self.last_sequence = snapshot.sequence;
        Ok(())
    }

    /// Merge a delta batch into the book.
    ///
    /// Stale and gapped batches leave the state untouched. On `Applied`,
    /// both ledgers are trimmed to `depth_limit` so the book never grows
    /// past the configured depth.
    ///
    /// A malformed level (negative quantity, non-positive price) surfaces
    /// as `BookError`; levels preceding it in the batch may already have
    /// been merged, so the caller is expected to discard the state via
    /// resync.
    pub fn apply_delta(
        &mut self,
        batch: &DeltaBatch,
        depth_limit: usize,
    ) -> Result<ApplyOutcome, BookError> {
        if batch.final_sequence <= self.last_sequence {
            return Ok(ApplyOutcome::Stale);
        }

        let expected = self.last_sequence + 1;
        if batch.first_sequence > expected {
            warn!(
                symbol = %self.symbol,
                expected,
                actual = batch.first_sequence,
                "sequence gap detected"
            );
            return Ok(ApplyOutcome::GapDetected {
                expected,
                actual: batch.first_sequence,
            });
        }

        for (price, quantity) in &batch.bid_changes {
            self.bids.apply(*price, *quantity)?;
        }
        for (price, quantity) in &batch.ask_changes {
            self.asks.apply(*price, *quantity)?;
        }

        self.last_sequence = batch.final_sequence;
        self.last_event_time_ms = batch.event_time_ms;
        self.bids.trim_to_depth(depth_limit);
        self.asks.trim_to_depth(depth_limit);

        Ok(ApplyOutcome::Applied)
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    pub fn last_event_time_ms(&self) -> i64 {
        self.last_event_time_ms
    }

    pub fn bids(&self) -> &PriceLevelLedger {
        &self.bids
    }

    pub fn asks(&self) -> &PriceLevelLedger {
        &self.asks
    }

    /// Highest bid, if any.
    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.best()
    }

    /// Lowest ask, if any.
    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.best()
    }

    /// Midpoint of the best bid and ask.
    pub fn mid_price(&self) -> Option<Decimal> {
        let bid = self.best_bid()?;
        let ask = self.best_ask()?;
        Some((bid.price + ask.price) / Decimal::TWO)
    }

    /// Best ask minus best bid.
    pub fn spread(&self) -> Option<Decimal> {
        let bid = self.best_bid()?;
        let ask = self.best_ask()?;
        Some(ask.price - bid.price)
    }

    /// Top `n` bids, highest first.
    pub fn top_bids(&self, n: usize) -> Vec<PriceLevel> {
        self.bids.top(n)
    }

    /// Top `n` asks, lowest first.
    pub fn top_asks(&self, n: usize) -> Vec<PriceLevel> {
        self.asks.top(n)
    }

    /// Snapshot the state into a persistence payload, levels best-first.
    pub fn to_update(&self) -> BookUpdate {
        BookUpdate {
            symbol: self.symbol.clone(),
            sequence: self.last_sequence,
            event_time_ms: self.last_event_time_ms,
            bids: self
                .bids
                .levels()
                .into_iter()
                .map(|l| (l.price, l.quantity))
                .collect(),
            asks: self
                .asks
                .levels()
                .into_iter()
                .map(|l| (l.price, l.quantity))
                .collect(),
        }
    }
}

/// Validate and load both sides from a snapshot into fresh ledgers, so a
/// malformed snapshot cannot leave a half-replaced book behind.
fn build_ledgers(
    snapshot: &DepthSnapshot,
    depth_limit: usize,
) -> Result<(PriceLevelLedger, PriceLevelLedger), BookError> {
    let mut bids = PriceLevelLedger::new(Side::Bid);
    let mut asks = PriceLevelLedger::new(Side::Ask);

    for (price, quantity) in &snapshot.bids {
        bids.apply(*price, *quantity)?;
    }
    for (price, quantity) in &snapshot.asks {
        asks.apply(*price, *quantity)?;
    }

    bids.trim_to_depth(depth_limit);
    asks.trim_to_depth(depth_limit);
    Ok((bids, asks))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn snapshot(sequence: u64, bids: Vec<(Decimal, Decimal)>, asks: Vec<(Decimal, Decimal)>) -> DepthSnapshot {
        DepthSnapshot {
            symbol: "ETHBTC".to_string(),
            sequence,
            bids,
            asks,
        }
    }

    fn batch(first: u64, last: u64, bids: Vec<(Decimal, Decimal)>, asks: Vec<(Decimal, Decimal)>) -> DeltaBatch {
        DeltaBatch {
            symbol: "ETHBTC".to_string(),
            first_sequence: first,
            final_sequence: last,
            event_time_ms: 1_700_000_000_000,
            bid_changes: bids,
            ask_changes: asks,
        }
    }

    #[test]
    fn snapshot_then_delta_end_to_end() {
        let snap = snapshot(
            10,
            vec![(dec!(99), dec!(1))],
            vec![(dec!(100), dec!(1)), (dec!(101), dec!(2))],
        );
        let mut book = OrderBookState::from_snapshot(&snap, 5).unwrap();
        assert_eq!(book.last_sequence(), 10);

        let outcome = book
            .apply_delta(
                &batch(11, 11, vec![(dec!(99), dec!(2))], vec![(dec!(100), dec!(0))]),
                5,
            )
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied);

        assert_eq!(book.last_sequence(), 11);
        let asks: Vec<_> = book.asks().levels();
        assert_eq!(asks.len(), 1);
        assert_eq!(asks[0].price, dec!(101));
        assert_eq!(asks[0].quantity, dec!(2));
        let bids: Vec<_> = book.bids().levels();
        assert_eq!(bids.len(), 1);
        assert_eq!(bids[0].price, dec!(99));
        assert_eq!(bids[0].quantity, dec!(2));
    }

    #[test]
    fn stale_batch_never_mutates() {
        let snap = snapshot(100, vec![(dec!(99), dec!(1))], vec![(dec!(100), dec!(1))]);
        let mut book = OrderBookState::from_snapshot(&snap, 5).unwrap();

        let delta = batch(101, 101, vec![(dec!(99), dec!(7))], vec![]);
        assert_eq!(book.apply_delta(&delta, 5).unwrap(), ApplyOutcome::Applied);
        assert_eq!(book.best_bid().unwrap().quantity, dec!(7));

        // Second application of the same batch is a no-op.
        let again = batch(101, 101, vec![(dec!(99), dec!(500))], vec![]);
        assert_eq!(book.apply_delta(&again, 5).unwrap(), ApplyOutcome::Stale);
        assert_eq!(book.best_bid().unwrap().quantity, dec!(7));
        assert_eq!(book.last_sequence(), 101);
    }

    #[test]
    fn gap_detected_with_zero_mutation() {
        let snap = snapshot(100, vec![(dec!(99), dec!(1))], vec![(dec!(100), dec!(1))]);
        let mut book = OrderBookState::from_snapshot(&snap, 5).unwrap();

        let gapped = batch(105, 110, vec![(dec!(99), dec!(9))], vec![]);
        assert_eq!(
            book.apply_delta(&gapped, 5).unwrap(),
            ApplyOutcome::GapDetected {
                expected: 101,
                actual: 105
            }
        );
        assert_eq!(book.last_sequence(), 100);
        assert_eq!(book.best_bid().unwrap().quantity, dec!(1));
    }

    #[test]
    fn batch_overlapping_the_snapshot_is_applied() {
        // Diff-depth transports hand out batches spanning the snapshot
        // sequence; first <= last+1 <= final must be admissible.
        let snap = snapshot(100, vec![], vec![(dec!(100), dec!(1))]);
        let mut book = OrderBookState::from_snapshot(&snap, 5).unwrap();

        let overlap = batch(95, 105, vec![], vec![(dec!(100), dec!(3))]);
        assert_eq!(book.apply_delta(&overlap, 5).unwrap(), ApplyOutcome::Applied);
        assert_eq!(book.last_sequence(), 105);
        assert_eq!(book.best_ask().unwrap().quantity, dec!(3));
    }

    #[test]
    fn ledgers_trimmed_on_every_apply() {
        let snap = snapshot(1, vec![], vec![]);
        let mut book = OrderBookState::from_snapshot(&snap, 3).unwrap();

        let mut seq = 1;
        for i in 1..=10 {
            seq += 1;
            let price = Decimal::from(100 + i);
            let bid_price = Decimal::from(100 - i);
            let delta = batch(seq, seq, vec![(bid_price, dec!(1))], vec![(price, dec!(1))]);
            assert_eq!(book.apply_delta(&delta, 3).unwrap(), ApplyOutcome::Applied);
            assert!(book.asks().len() <= 3);
            assert!(book.bids().len() <= 3);
        }

        // Asks keep the lowest three, bids the highest three.
        assert_eq!(book.best_ask().unwrap().price, dec!(101));
        assert_eq!(book.best_bid().unwrap().price, dec!(99));
    }

    #[test]
    fn sequential_deltas_equal_equivalent_snapshot() {
        let snap = snapshot(10, vec![(dec!(99), dec!(1))], vec![(dec!(101), dec!(1))]);
        let mut incremental = OrderBookState::from_snapshot(&snap, 10).unwrap();

        let deltas = vec![
            batch(11, 11, vec![(dec!(98), dec!(2))], vec![(dec!(102), dec!(4))]),
            batch(12, 12, vec![(dec!(99), dec!(0))], vec![(dec!(101), dec!(6))]),
            batch(13, 13, vec![(dec!(97), dec!(3))], vec![(dec!(102), dec!(0))]),
        ];
        for delta in &deltas {
            assert_eq!(
                incremental.apply_delta(delta, 10).unwrap(),
                ApplyOutcome::Applied
            );
        }

        // Net result expressed as a single snapshot.
        let net = snapshot(
            13,
            vec![(dec!(98), dec!(2)), (dec!(97), dec!(3))],
            vec![(dec!(101), dec!(6))],
        );
        let direct = OrderBookState::from_snapshot(&net, 10).unwrap();

        assert_eq!(incremental.bids().levels(), direct.bids().levels());
        assert_eq!(incremental.asks().levels(), direct.asks().levels());
        assert_eq!(incremental.last_sequence(), direct.last_sequence());
    }

    #[test]
    fn resync_replaces_wholesale() {
        let snap = snapshot(10, vec![(dec!(99), dec!(1))], vec![(dec!(101), dec!(1))]);
        let mut book = OrderBookState::from_snapshot(&snap, 5).unwrap();

        let fresh = snapshot(50, vec![(dec!(90), dec!(4))], vec![(dec!(110), dec!(4))]);
        book.replace_from_snapshot(&fresh, 5).unwrap();

        assert_eq!(book.last_sequence(), 50);
        assert_eq!(book.best_bid().unwrap().price, dec!(90));
        assert_eq!(book.best_ask().unwrap().price, dec!(110));
        assert_eq!(book.bids().len(), 1);
    }

    #[test]
    fn stale_resync_snapshot_is_rejected() {
        let snap = snapshot(100, vec![(dec!(99), dec!(1))], vec![]);
        let mut book = OrderBookState::from_snapshot(&snap, 5).unwrap();

        let old = snapshot(40, vec![(dec!(10), dec!(1))], vec![]);
        let err = book.replace_from_snapshot(&old, 5).unwrap_err();
        assert!(matches!(err, BookError::StaleSnapshot { .. }));

        // State untouched, sequence never went backwards.
        assert_eq!(book.last_sequence(), 100);
        assert_eq!(book.best_bid().unwrap().price, dec!(99));
    }

    #[test]
    fn snapshot_for_wrong_symbol_is_rejected() {
        let snap = snapshot(10, vec![], vec![(dec!(101), dec!(1))]);
        let mut book = OrderBookState::from_snapshot(&snap, 5).unwrap();

        let mut other = snapshot(20, vec![], vec![]);
        other.symbol = "BTCUSDT".to_string();
        assert!(matches!(
            book.replace_from_snapshot(&other, 5),
            Err(BookError::SymbolMismatch { .. })
        ));
    }

    #[test]
    fn malformed_delta_surfaces_an_error() {
        let snap = snapshot(10, vec![(dec!(99), dec!(1))], vec![]);
        let mut book = OrderBookState::from_snapshot(&snap, 5).unwrap();

        let bad = batch(11, 11, vec![(dec!(99), dec!(-3))], vec![]);
        assert!(book.apply_delta(&bad, 5).is_err());
    }

    #[test]
    fn mid_price_and_spread() {
        let snap = snapshot(10, vec![(dec!(100), dec!(1))], vec![(dec!(101), dec!(1))]);
        let book = OrderBookState::from_snapshot(&snap, 5).unwrap();

        assert_eq!(book.mid_price(), Some(dec!(100.5)));
        assert_eq!(book.spread(), Some(dec!(1)));
        assert_eq!(book.top_bids(1)[0].price, dec!(100));
        assert_eq!(book.top_asks(1)[0].price, dec!(101));
    }

    #[test]
    fn update_payload_is_best_first_and_carries_metadata() {
        let snap = snapshot(
            10,
            vec![(dec!(98), dec!(1)), (dec!(99), dec!(2))],
            vec![(dec!(101), dec!(1)), (dec!(100), dec!(2))],
        );
        let mut book = OrderBookState::from_snapshot(&snap, 5).unwrap();
        book.apply_delta(&batch(11, 11, vec![], vec![]), 5).unwrap();

        let update = book.to_update();
        assert_eq!(update.symbol, "ETHBTC");
        assert_eq!(update.sequence, 11);
        assert_eq!(update.event_time_ms, 1_700_000_000_000);
        assert_eq!(update.bids[0].0, dec!(99));
        assert_eq!(update.asks[0].0, dec!(100));
    }
}
