//! The node's view of the sequences proposed by the trusted sequencer.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use alloy::primitives::Address;
use async_trait::async_trait;
use futures::StreamExt;
use tokio::{
    sync::{mpsc, RwLock},
    time::Instant,
};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    chain::ChainEventSource,
    common::{SequenceBatch, TrackerError},
    sync::Backoff,
};

mod spec;
pub use spec::TrackerSpec;

/// An update pushed by the synchronizer to the [`SequenceTracker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerUpdate {
    /// A sequence decoded from a committed block range.
    Batch(SequenceBatch),
    /// The synchronizer committed every block up to `block`.
    Synced {
        /// The new checkpoint.
        block: u64,
    },
    /// The chain reorganized and the synchronizer rolled back to `ancestor`.
    Reorg {
        /// The safe ancestor block.
        ancestor: u64,
    },
}

/// Configuration of the [`SequenceTracker`].
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Maximum age of the last update before the view is considered stale.
    pub max_staleness: Duration,
    /// Maximum number of sequences kept in memory.
    pub capacity: usize,
    /// How often the trusted sequencer address is re-read from the chain.
    pub refresh_interval: Duration,
    /// Initial delay between failed reads of the trusted sequencer address.
    pub retry_backoff: Duration,
    /// Maximum delay between failed reads of the trusted sequencer address.
    pub max_backoff: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_staleness: Duration::from_secs(10 * 60),
            capacity: 1024,
            refresh_interval: Duration::from_secs(5 * 60),
            retry_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    batches: BTreeMap<u64, SequenceBatch>,
    last_update: Option<Instant>,
    synced_block: u64,
}

/// Keeps the latest batch sequences announced by the trusted sequencer.
///
/// The tracker has a single writer, the [`SequenceTracker::run`] loop consuming
/// [`TrackerUpdate`]s, and any number of readers.
#[derive(Debug, Clone)]
pub struct SequenceTracker {
    state: Arc<RwLock<TrackerState>>,
    config: TrackerConfig,
}

impl SequenceTracker {
    /// Creates an empty tracker. Its view is stale until the first update arrives.
    pub fn new(config: TrackerConfig) -> Self {
        Self { state: Default::default(), config }
    }

    /// Creates the channel the synchronizer pushes updates into.
    pub fn channel(buffer: usize) -> (mpsc::Sender<TrackerUpdate>, ReceiverStream<TrackerUpdate>) {
        let (tx, rx) = mpsc::channel(buffer);
        (tx, ReceiverStream::new(rx))
    }

    /// Returns the latest validated sequence.
    pub async fn latest(&self) -> Option<SequenceBatch> {
        self.state.read().await.batches.last_key_value().map(|(_, batch)| batch.clone())
    }

    /// Returns the last block the synchronizer reported as committed.
    pub async fn synced_block(&self) -> u64 {
        self.state.read().await.synced_block
    }

    /// Consumes updates until the stream ends or `cancel` fires.
    ///
    /// Sequences are only accepted from the trusted sequencer, whose address is read
    /// from the chain and refreshed every `refresh_interval`.
    pub async fn run<C: ChainEventSource>(
        self,
        chain: Arc<C>,
        mut updates: ReceiverStream<TrackerUpdate>,
        cancel: CancellationToken,
    ) {
        let mut trusted: Option<(Address, Instant)> = None;

        loop {
            let update = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                update = updates.next() => match update {
                    Some(update) => update,
                    None => break,
                },
            };

            if matches!(update, TrackerUpdate::Batch(_)) {
                let stale = trusted.map_or(true, |(_, at)| at.elapsed() >= self.config.refresh_interval);
                if stale {
                    let previous = trusted.map(|(address, _)| address);
                    match self.resolve_trusted_sequencer(chain.as_ref(), previous, &cancel).await {
                        Some(address) => trusted = Some((address, Instant::now())),
                        None => break,
                    }
                }
            }

            self.apply(update, trusted.map(|(address, _)| address)).await;
        }

        info!("Sequence tracker stopped");
    }

    /// Reads the trusted sequencer address, retrying with backoff. Falls back to the
    /// `previous` address if the read fails. Returns `None` only if cancelled.
    async fn resolve_trusted_sequencer<C: ChainEventSource>(
        &self,
        chain: &C,
        previous: Option<Address>,
        cancel: &CancellationToken,
    ) -> Option<Address> {
        let mut backoff = Backoff::new(self.config.retry_backoff, self.config.max_backoff);

        loop {
            match chain.trusted_sequencer_address().await {
                Ok(address) => {
                    if previous.is_some_and(|prev| prev != address) {
                        info!(%address, "Trusted sequencer changed");
                    }
                    return Some(address);
                }
                Err(err) if previous.is_some() => {
                    warn!(?err, "Failed to refresh trusted sequencer, keeping previous address");
                    return previous;
                }
                Err(err) => {
                    let delay = backoff.next_delay();
                    warn!(?err, ?delay, "Failed to read trusted sequencer address");
                    tokio::select! {
                        _ = cancel.cancelled() => return None,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    pub(crate) async fn apply(&self, update: TrackerUpdate, trusted: Option<Address>) {
        let mut state = self.state.write().await;
        state.last_update = Some(Instant::now());

        match update {
            TrackerUpdate::Batch(batch) => {
                if trusted != Some(batch.sequencer) {
                    warn!(
                        batch_number = batch.batch_number,
                        sequencer = %batch.sequencer,
                        "Ignoring sequence from untrusted sequencer"
                    );
                    return;
                }

                debug!(batch_number = batch.batch_number, l1_block = batch.l1_block, "Tracked sequence");
                state.batches.insert(batch.batch_number, batch);
                while state.batches.len() > self.config.capacity {
                    state.batches.pop_first();
                }
            }
            TrackerUpdate::Synced { block } => {
                state.synced_block = block;
            }
            TrackerUpdate::Reorg { ancestor } => {
                let before = state.batches.len();
                state.batches.retain(|_, batch| batch.l1_block <= ancestor);
                state.synced_block = ancestor;
                warn!(ancestor, dropped = before - state.batches.len(), "Dropped reorged sequences");
            }
        }
    }
}

#[async_trait]
impl TrackerSpec for SequenceTracker {
    async fn get_sequence_batch(&self, batch_number: u64) -> Result<SequenceBatch, TrackerError> {
        let state = self.state.read().await;

        let age = state.last_update.map(|at| at.elapsed());
        if age.map_or(true, |age| age > self.config.max_staleness) {
            return Err(TrackerError::StaleView { age, max: self.config.max_staleness });
        }

        state.batches.get(&batch_number).cloned().ok_or(TrackerError::NotFound(batch_number))
    }
}
