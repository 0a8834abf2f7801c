//! Keeps a local order-book mirror in lockstep with a remote feed.
//!
//! The feed is two-sided: a one-shot authoritative snapshot (pull) and an
//! unbounded stream of incremental deltas keyed by a monotonic sequence
//! number (push). [`DepthSynchronizer`] reconciles the two per symbol —
//! applying admissible deltas, detecting when the stream has skipped past
//! the local state, and recovering by resyncing from a fresh snapshot —
//! and notifies a [`PersistenceSink`] after every successful mutation.
//!
//! Transports and storage are collaborator traits ([`SnapshotSource`],
//! [`DeltaStream`], [`PersistenceSink`]); this crate contains no wire
//! handling of its own.

mod buffer;
mod error;
mod synchronizer;
mod traits;

pub use buffer::ResyncBuffer;
pub use error::{SyncError, TransportError};
pub use synchronizer::{DepthSynchronizer, SharedBook, SymbolSync, SyncConfig, SyncState};
pub use traits::{DeltaReceiver, DeltaSender, DeltaStream, PersistenceSink, SnapshotSource};
