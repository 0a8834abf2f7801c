//! Per-symbol depth synchronization.
//!
//! Lifecycle: subscribe to the delta stream, fetch the initial snapshot
//! (bounded retries), then hand the book to a dedicated task that merges
//! inbound batches, resyncs on gaps, and notifies the persistence sink
//! after every successful mutation. All mutations for a symbol are
//! funneled through that single task; concurrent readers go through the
//! shared lock and never observe the book mid-mutation.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, trace, warn};

use book::{ApplyOutcome, BookError, OrderBookState};
use common::ExponentialBackoff;
use model::{DeltaBatch, DepthSnapshot};

use crate::buffer::ResyncBuffer;
use crate::error::{SyncError, TransportError};
use crate::traits::{DeltaReceiver, DeltaStream, PersistenceSink, SnapshotSource};

/// Shared read handle to a symbol's book. The synchronizer task is the
/// only writer; the lock is never held across an await point.
pub type SharedBook = Arc<RwLock<OrderBookState>>;

/// Synchronizer tuning knobs.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum number of price levels retained per side.
    pub depth_limit: usize,
    /// Per-attempt timeout for snapshot fetches.
    pub snapshot_timeout: Duration,
    /// Consecutive snapshot failures tolerated before the sync is fatal.
    pub max_snapshot_attempts: u32,
    /// Consecutive subscribe failures tolerated before the sync is fatal.
    pub max_subscribe_attempts: u32,
    /// Capacity of the drop-oldest buffer for deltas arriving mid-resync.
    pub resync_buffer_capacity: usize,
    /// Initial retry backoff delay.
    pub backoff_base: Duration,
    /// Retry backoff cap.
    pub backoff_max: Duration,
    /// Jitter fraction applied to backoff delays.
    pub backoff_jitter: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            depth_limit: 20,
            snapshot_timeout: Duration::from_secs(10),
            max_snapshot_attempts: 5,
            max_subscribe_attempts: 5,
            resync_buffer_capacity: 1024,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(30),
            backoff_jitter: 0.1,
        }
    }
}

/// Observable lifecycle of a symbol's synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Book is current; deltas are being applied as they arrive.
    Synced,
    /// A gap or malformed input was hit; a fresh snapshot is in flight and
    /// inbound deltas are being buffered.
    Resyncing,
    /// `stop()` was called or the task hit a fatal error; the book will
    /// not change again.
    Closed,
}

/// Builds per-symbol synchronization tasks from the three collaborator
/// seams. Symbols are fully independent: each `start` call produces its
/// own book, task, and subscription.
pub struct DepthSynchronizer {
    config: SyncConfig,
    snapshots: Arc<dyn SnapshotSource>,
    deltas: Arc<dyn DeltaStream>,
    sink: Arc<dyn PersistenceSink>,
}

/// Handle to a running per-symbol synchronization.
#[derive(Debug)]
pub struct SymbolSync {
    symbol: String,
    book: SharedBook,
    shutdown: watch::Sender<bool>,
    state: watch::Receiver<SyncState>,
    handle: JoinHandle<Result<(), SyncError>>,
}

impl DepthSynchronizer {
    pub fn new(
        config: SyncConfig,
        snapshots: Arc<dyn SnapshotSource>,
        deltas: Arc<dyn DeltaStream>,
        sink: Arc<dyn PersistenceSink>,
    ) -> Self {
        Self {
            config,
            snapshots,
            deltas,
            sink,
        }
    }

    /// Begin synchronizing `symbol`.
    ///
    /// Subscribes first so no deltas are missed between the snapshot and
    /// the stream, then fetches the initial snapshot with bounded retries
    /// and notifies the sink with the initial state. Returns once the
    /// per-symbol task is running.
    pub async fn start(&self, symbol: &str) -> Result<SymbolSync, SyncError> {
        let receiver =
            self.deltas
                .subscribe(symbol)
                .await
                .map_err(|source| SyncError::SubscribeFailed {
                    symbol: symbol.to_string(),
                    source,
                })?;

        let initial = self.initial_book(symbol).await?;
        let book: SharedBook = Arc::new(RwLock::new(initial));

        let update = { book.read().to_update() };
        self.sink.on_state_changed(update).await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(SyncState::Synced);

        let task = SyncTask {
            symbol: symbol.to_string(),
            config: self.config.clone(),
            snapshots: Arc::clone(&self.snapshots),
            deltas: Arc::clone(&self.deltas),
            sink: Arc::clone(&self.sink),
            book: Arc::clone(&book),
            receiver,
            shutdown: shutdown_rx,
            state: state_tx,
        };
        let handle = tokio::spawn(task.run());

        info!(symbol = %symbol, "depth synchronization started");

        Ok(SymbolSync {
            symbol: symbol.to_string(),
            book,
            shutdown: shutdown_tx,
            state: state_rx,
            handle,
        })
    }

    /// Fetch the initial snapshot and build the book, retrying transport
    /// failures and unusable snapshots within the attempt budget.
    async fn initial_book(&self, symbol: &str) -> Result<OrderBookState, SyncError> {
        let mut backoff = backoff_from(&self.config);
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let fetched = tokio::time::timeout(
                self.config.snapshot_timeout,
                self.snapshots.fetch_snapshot(symbol, self.config.depth_limit),
            )
            .await;

            let failure = match fetched {
                Ok(Ok(snapshot)) => {
                    match OrderBookState::from_snapshot(&snapshot, self.config.depth_limit) {
                        Ok(state) => {
                            info!(
                                symbol = %symbol,
                                sequence = state.last_sequence(),
                                "initial snapshot loaded"
                            );
                            return Ok(state);
                        }
                        Err(e) => FetchFailure::Rejected(e),
                    }
                }
                Ok(Err(e)) => FetchFailure::Transport(e),
                Err(_) => FetchFailure::Transport(TransportError::Timeout),
            };

            if attempts >= self.config.max_snapshot_attempts || !failure.is_retryable() {
                return Err(failure.into_sync_error(attempts));
            }

            let delay = backoff.next_delay();
            warn!(
                symbol = %symbol,
                attempt = attempts,
                error = %failure,
                delay_ms = delay.as_millis() as u64,
                "initial snapshot failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

impl SymbolSync {
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Shared read handle to the live book.
    pub fn book(&self) -> &SharedBook {
        &self.book
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    /// Watch handle for observing state transitions.
    pub fn state_watch(&self) -> watch::Receiver<SyncState> {
        self.state.clone()
    }

    /// Stop synchronizing and wait for the task to exit.
    ///
    /// Safe to call while an apply or resync is in flight: the task
    /// observes the shutdown at its next scheduling point, abandons any
    /// pending snapshot fetch, and exits as a no-op. Returns the task's
    /// terminal result; a task that already died of a fatal error yields
    /// that error here.
    pub async fn stop(self) -> Result<(), SyncError> {
        let _ = self.shutdown.send(true);
        match self.handle.await {
            Ok(result) => result,
            Err(_) => Err(SyncError::TaskPanicked),
        }
    }
}

/// The single-writer task bound to one symbol.
struct SyncTask {
    symbol: String,
    config: SyncConfig,
    snapshots: Arc<dyn SnapshotSource>,
    deltas: Arc<dyn DeltaStream>,
    sink: Arc<dyn PersistenceSink>,
    book: SharedBook,
    receiver: DeltaReceiver,
    shutdown: watch::Receiver<bool>,
    state: watch::Sender<SyncState>,
}

/// Outcome of replaying the resync buffer onto a fresh snapshot.
enum Replay {
    Done,
    Gapped,
}

impl SyncTask {
    async fn run(mut self) -> Result<(), SyncError> {
        let result = self.run_inner().await;
        let _ = self.state.send(SyncState::Closed);
        match &result {
            Ok(()) => info!(symbol = %self.symbol, "synchronizer stopped"),
            Err(e) => warn!(symbol = %self.symbol, error = %e, "synchronizer terminated"),
        }
        result
    }

    async fn run_inner(&mut self) -> Result<(), SyncError> {
        loop {
            if self.is_shutdown() {
                return Ok(());
            }

            tokio::select! {
                biased;

                res = self.shutdown.changed() => {
                    if res.is_err() || *self.shutdown.borrow() {
                        return Ok(());
                    }
                }

                batch = self.receiver.recv() => match batch {
                    Some(batch) => self.handle_batch(batch).await?,
                    None => {
                        warn!(symbol = %self.symbol, "delta stream ended, resubscribing");
                        self.resubscribe().await?;
                        // Whatever was missed while disconnected would
                        // surface as a gap anyway; go straight to a fresh
                        // snapshot.
                        self.resync(None).await?;
                    }
                }
            }
        }
    }

    async fn handle_batch(&mut self, batch: DeltaBatch) -> Result<(), SyncError> {
        let outcome = {
            let mut book = self.book.write();
            book.apply_delta(&batch, self.config.depth_limit)
        };

        match outcome {
            Ok(ApplyOutcome::Applied) => {
                let update = { self.book.read().to_update() };
                self.sink.on_state_changed(update).await;
            }
            Ok(ApplyOutcome::Stale) => {
                trace!(
                    symbol = %self.symbol,
                    sequence = batch.final_sequence,
                    "stale delta dropped"
                );
            }
            Ok(ApplyOutcome::GapDetected { expected, actual }) => {
                warn!(symbol = %self.symbol, expected, actual, "gap detected, resyncing");
                // The gapped batch may extend past the fresh snapshot;
                // keep it for replay.
                self.resync(Some(batch)).await?;
            }
            Err(e) => {
                warn!(symbol = %self.symbol, error = %e, "malformed delta, resyncing");
                self.resync(None).await?;
            }
        }

        Ok(())
    }

    /// Replace the book from a fresh snapshot, buffering deltas that
    /// arrive meanwhile and replaying the ones newer than the snapshot.
    ///
    /// Transport failures are retried with backoff up to the configured
    /// attempt budget and are the only way this returns an error. A gap
    /// among the replayed batches restarts the fetch with a fresh budget,
    /// since the transport itself is demonstrably healthy at that point.
    async fn resync(&mut self, seed: Option<DeltaBatch>) -> Result<(), SyncError> {
        let _ = self.state.send(SyncState::Resyncing);
        info!(symbol = %self.symbol, "resyncing from fresh snapshot");

        let mut buffer = ResyncBuffer::new(self.config.resync_buffer_capacity);
        if let Some(batch) = seed {
            buffer.push(batch);
        }
        let mut backoff = backoff_from(&self.config);
        let mut attempts = 0u32;
        let mut stream_ended = false;

        'fetch: loop {
            if self.is_shutdown() {
                return Ok(());
            }
            attempts += 1;

            let snapshots = Arc::clone(&self.snapshots);
            let symbol = self.symbol.clone();
            let depth_limit = self.config.depth_limit;
            let fetch = tokio::time::timeout(self.config.snapshot_timeout, async move {
                snapshots.fetch_snapshot(&symbol, depth_limit).await
            });
            tokio::pin!(fetch);

            // Buffer inbound deltas while the fetch is in flight.
            let fetched = loop {
                tokio::select! {
                    biased;

                    res = self.shutdown.changed() => {
                        if res.is_err() || *self.shutdown.borrow() {
                            return Ok(());
                        }
                    }

                    res = &mut fetch => break res,

                    batch = self.receiver.recv(), if !stream_ended => match batch {
                        Some(batch) => buffer.push(batch),
                        None => stream_ended = true,
                    }
                }
            };

            let failure = match fetched {
                Ok(Ok(snapshot)) => match self.install_snapshot(&snapshot) {
                    Ok(()) => {
                        let update = { self.book.read().to_update() };
                        self.sink.on_state_changed(update).await;

                        match self.replay(&mut buffer).await {
                            Replay::Done => {
                                let _ = self.state.send(SyncState::Synced);
                                info!(
                                    symbol = %self.symbol,
                                    sequence = { self.book.read().last_sequence() },
                                    buffered_dropped = buffer.dropped(),
                                    "resync complete"
                                );
                                return Ok(());
                            }
                            Replay::Gapped => {
                                attempts = 0;
                                backoff.reset();
                                continue 'fetch;
                            }
                        }
                    }
                    Err(e) => FetchFailure::Rejected(e),
                },
                Ok(Err(e)) => FetchFailure::Transport(e),
                Err(_) => FetchFailure::Transport(TransportError::Timeout),
            };

            if attempts >= self.config.max_snapshot_attempts || !failure.is_retryable() {
                return Err(failure.into_sync_error(attempts));
            }

            let delay = backoff.next_delay();
            warn!(
                symbol = %self.symbol,
                attempt = attempts,
                error = %failure,
                delay_ms = delay.as_millis() as u64,
                "resync snapshot failed, retrying"
            );

            // Keep buffering while waiting out the backoff.
            let sleep = tokio::time::sleep(delay);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    biased;

                    res = self.shutdown.changed() => {
                        if res.is_err() || *self.shutdown.borrow() {
                            return Ok(());
                        }
                    }

                    _ = &mut sleep => break,

                    batch = self.receiver.recv(), if !stream_ended => match batch {
                        Some(batch) => buffer.push(batch),
                        None => stream_ended = true,
                    }
                }
            }
        }
    }

    fn install_snapshot(&self, snapshot: &DepthSnapshot) -> Result<(), BookError> {
        let mut book = self.book.write();
        book.replace_from_snapshot(snapshot, self.config.depth_limit)
    }

    /// Replay buffered deltas on top of a freshly installed snapshot.
    async fn replay(&mut self, buffer: &mut ResyncBuffer) -> Replay {
        while let Some(batch) = buffer.pop() {
            let outcome = {
                let mut book = self.book.write();
                book.apply_delta(&batch, self.config.depth_limit)
            };

            match outcome {
                Ok(ApplyOutcome::Applied) => {
                    let update = { self.book.read().to_update() };
                    self.sink.on_state_changed(update).await;
                }
                Ok(ApplyOutcome::Stale) => {
                    trace!(
                        symbol = %self.symbol,
                        sequence = batch.final_sequence,
                        "stale buffered delta dropped"
                    );
                }
                Ok(ApplyOutcome::GapDetected { expected, actual }) => {
                    warn!(
                        symbol = %self.symbol,
                        expected,
                        actual,
                        "gap inside buffered replay, refetching snapshot"
                    );
                    buffer.requeue(batch);
                    return Replay::Gapped;
                }
                Err(e) => {
                    warn!(
                        symbol = %self.symbol,
                        error = %e,
                        "malformed buffered delta, refetching snapshot"
                    );
                    return Replay::Gapped;
                }
            }
        }
        Replay::Done
    }

    async fn resubscribe(&mut self) -> Result<(), SyncError> {
        let mut backoff = backoff_from(&self.config);
        let mut attempts = 0u32;

        loop {
            if self.is_shutdown() {
                return Ok(());
            }
            attempts += 1;

            match self.deltas.subscribe(&self.symbol).await {
                Ok(receiver) => {
                    info!(symbol = %self.symbol, attempt = attempts, "resubscribed to delta stream");
                    self.receiver = receiver;
                    return Ok(());
                }
                Err(source) => {
                    if attempts >= self.config.max_subscribe_attempts {
                        return Err(SyncError::SubscribeFailed {
                            symbol: self.symbol.clone(),
                            source,
                        });
                    }

                    let delay = backoff.next_delay();
                    warn!(
                        symbol = %self.symbol,
                        attempt = attempts,
                        error = %source,
                        delay_ms = delay.as_millis() as u64,
                        "subscribe failed, retrying"
                    );
                    tokio::select! {
                        biased;

                        res = self.shutdown.changed() => {
                            if res.is_err() || *self.shutdown.borrow() {
                                return Ok(());
                            }
                        }

                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }
}

fn backoff_from(config: &SyncConfig) -> ExponentialBackoff {
    ExponentialBackoff::new(config.backoff_base, config.backoff_max, config.backoff_jitter)
}

/// A snapshot attempt that did not produce a usable book.
#[derive(Debug, Error)]
enum FetchFailure {
    #[error(transparent)]
    Transport(TransportError),
    #[error(transparent)]
    Rejected(BookError),
}

impl FetchFailure {
    /// Rejected snapshots are always worth another fetch (the next one may
    /// be usable); transport failures defer to the error's own judgement.
    fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_retryable(),
            Self::Rejected(_) => true,
        }
    }

    fn into_sync_error(self, attempts: u32) -> SyncError {
        match self {
            Self::Transport(last_error) => SyncError::SnapshotRetriesExhausted {
                attempts,
                last_error,
            },
            Self::Rejected(last_error) => SyncError::SnapshotRejected {
                attempts,
                last_error,
            },
        }
    }
}
