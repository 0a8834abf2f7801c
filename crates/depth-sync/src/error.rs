//! Synchronizer error taxonomy.
//!
//! Stale and gapped deltas are not errors: they are expected outcomes
//! carried by [`book::ApplyOutcome`] and handled internally. Only
//! [`SyncError`] is ever surfaced to the owner of a synchronizer.

use book::BookError;
use thiserror::Error;

/// A collaborator (snapshot source or delta stream) failure.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The call did not complete within the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// Network-level failure.
    #[error("connection error: {0}")]
    Connection(String),

    /// The collaborator is shut down and will not serve further calls.
    #[error("collaborator closed")]
    Closed,
}

impl TransportError {
    /// Whether retrying the call can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Connection(_))
    }
}

/// Fatal synchronizer failures, surfaced from `start()` or `stop()`.
///
/// Everything else (stale deltas, gaps, malformed batches, individual
/// transport failures) is absorbed by retry and resync.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The snapshot source kept failing past the retry budget.
    #[error("snapshot fetch failed after {attempts} attempts: {last_error}")]
    SnapshotRetriesExhausted {
        attempts: u32,
        #[source]
        last_error: TransportError,
    },

    /// The snapshot source kept returning unusable snapshots.
    #[error("snapshot rejected after {attempts} attempts: {last_error}")]
    SnapshotRejected {
        attempts: u32,
        #[source]
        last_error: BookError,
    },

    /// Could not (re)subscribe to the delta stream within the retry budget.
    #[error("subscribe failed for {symbol}: {source}")]
    SubscribeFailed {
        symbol: String,
        #[source]
        source: TransportError,
    },

    /// The per-symbol task panicked; the book handle is no longer updated.
    #[error("synchronizer task panicked")]
    TaskPanicked,
}
