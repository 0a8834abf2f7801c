//! Collaborator contracts the synchronizer depends on.
//!
//! Implementations (REST clients, websocket feeds, database writers) live
//! outside this crate; the synchronizer only sees these seams.

use async_trait::async_trait;
use tokio::sync::mpsc;

use model::{BookUpdate, DeltaBatch, DepthSnapshot};

use crate::error::TransportError;

/// Sending half of a delta subscription, held by the stream implementation.
pub type DeltaSender = mpsc::Sender<DeltaBatch>;
/// Receiving half of a delta subscription, consumed by the synchronizer.
pub type DeltaReceiver = mpsc::Receiver<DeltaBatch>;

/// Serves authoritative one-shot depth snapshots.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Fetch a snapshot of at least `depth_limit` levels per side.
    ///
    /// The returned sequence number is the arbiter for which deltas apply
    /// on top of the snapshot.
    async fn fetch_snapshot(
        &self,
        symbol: &str,
        depth_limit: usize,
    ) -> Result<DepthSnapshot, TransportError>;
}

/// Push-driven stream of incremental depth changes.
///
/// # Delivery contract
///
/// Within one subscription, batches for a symbol arrive in non-decreasing
/// sequence order, but batches may be *lost* (the implementation is free
/// to reconnect internally and drop whatever it missed). The synchronizer
/// therefore never trusts the stream to be gap-free and always runs the
/// explicit first-sequence gap check before merging a batch.
///
/// Dropping the receiver is the unsubscribe; the implementation observes
/// the closed channel and releases the subscription.
#[async_trait]
pub trait DeltaStream: Send + Sync {
    async fn subscribe(&self, symbol: &str) -> Result<DeltaReceiver, TransportError>;
}

/// Consumer of "state changed" notifications.
///
/// Called at most once per successfully applied delta or snapshot
/// replace. Implementations log their own failures; nothing they do can
/// block or roll back the book.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn on_state_changed(&self, update: BookUpdate);
}
