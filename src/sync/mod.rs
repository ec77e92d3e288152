//! L1 synchronizer: follows `SequenceBatches` events and keeps the store populated with
//! the off-chain data of every sequenced batch.

use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
    time::Duration,
};

use alloy::primitives::B256;
use futures::stream::{FuturesUnordered, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    chain::{ChainError, ChainEventSource},
    client::PeerClient,
    common::{ClientError, OffChainData, SequenceBatch},
    store::{DataStore, StoreError, StoreTransaction},
    tracker::TrackerUpdate,
};

mod backoff;
pub use backoff::Backoff;

mod decode;
pub use decode::{decode_sequence_batch, DecodeError};

mod progress;
pub use progress::{SyncProgress, SyncState};

/// Checkpoint task name of the L1 synchronizer.
pub const L1_SYNC_TASK: &str = "L1";

/// Consecutive failures after which sync errors are logged at error level.
pub const FAILURE_ALERT_THRESHOLD: u32 = 5;

/// An error during a synchronizer iteration. The checkpoint is never advanced when an
/// iteration fails.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum SyncError {
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Sequencing transaction {0} is still pending")]
    PendingTransaction(B256),
    #[error("Off-chain data {0} is not available from any peer")]
    DataUnavailable(B256),
}

impl SyncError {
    /// Whether retrying the same range may succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Store(StoreError::InvalidKey { .. }))
    }
}

/// Configuration of a [`Synchronizer`].
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Checkpoint task name.
    pub task: String,
    /// First L1 block to process, usually the deployment block of the contracts.
    pub start_block: u64,
    /// Maximum number of blocks requested per iteration.
    pub max_block_range: u64,
    /// Blocks behind the chain head that are not processed yet.
    pub confirmations: u64,
    /// Delay between iterations once up to date.
    pub poll_interval: Duration,
    /// Initial delay after a failed iteration.
    pub retry_backoff: Duration,
    /// Maximum delay after failed iterations.
    pub max_backoff: Duration,
    /// How many blocks back the checkpoint is rolled on a reorg when no remembered
    /// block is still canonical. Also bounds the remembered block hashes.
    pub reorg_depth: u64,
    /// This member's own URL, never asked for data.
    pub self_url: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            task: L1_SYNC_TASK.to_owned(),
            start_block: 0,
            max_block_range: 1000,
            confirmations: 0,
            poll_interval: Duration::from_secs(5),
            retry_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            reorg_depth: 64,
            self_url: None,
        }
    }
}

/// Outcome of a successful [`Synchronizer::sync_once`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Iteration {
    /// Blocks `from..=to` were committed.
    Advanced {
        /// First processed block.
        from: u64,
        /// New checkpoint.
        to: u64,
        /// Number of sequences decoded in the range.
        sequences: usize,
        /// Number of data entries fetched and stored.
        stored: usize,
    },
    /// Nothing to process.
    UpToDate {
        /// Current checkpoint.
        checkpoint: u64,
    },
    /// A reorg was detected and the checkpoint rolled back.
    RolledBack {
        /// Checkpoint before the rollback.
        from: u64,
        /// The safe ancestor the checkpoint was rolled back to.
        to: u64,
    },
}

/// Drives the data store forward from L1 `SequenceBatches` events.
#[derive(Debug)]
pub struct Synchronizer<DS, C, P> {
    store: DS,
    chain: Arc<C>,
    peers: Arc<P>,
    config: SyncConfig,
    tracker: Option<mpsc::Sender<TrackerUpdate>>,
    progress: Arc<SyncProgress>,
    /// Hashes of committed range ends, used to detect reorgs.
    block_hashes: BTreeMap<u64, B256>,
}

impl<DS, C, P> Synchronizer<DS, C, P>
where
    DS: DataStore,
    C: ChainEventSource,
    P: PeerClient,
{
    /// Creates a new synchronizer.
    pub fn new(store: DS, chain: Arc<C>, peers: Arc<P>, config: SyncConfig) -> Self {
        Self {
            store,
            chain,
            peers,
            config,
            tracker: None,
            progress: Default::default(),
            block_hashes: BTreeMap::new(),
        }
    }

    /// Pushes committed sequences, checkpoints and rollbacks to a sequence tracker.
    pub fn with_tracker(mut self, tracker: mpsc::Sender<TrackerUpdate>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Shared progress of this synchronizer.
    pub fn progress(&self) -> Arc<SyncProgress> {
        Arc::clone(&self.progress)
    }

    /// Runs iterations until cancelled, backing off on failures.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(task = %self.config.task, start_block = self.config.start_block, "Starting synchronizer");
        let mut backoff = Backoff::new(self.config.retry_backoff, self.config.max_backoff);

        loop {
            if cancel.is_cancelled() {
                break;
            }

            // dropping an in-flight iteration rolls back its transaction
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.sync_once() => result,
            };

            let delay = match result {
                Ok(Iteration::UpToDate { .. }) => {
                    backoff.reset();
                    self.config.poll_interval
                }
                Ok(_) => {
                    backoff.reset();
                    continue;
                }
                Err(err) => {
                    let delay = backoff.next_delay();
                    let failures = self.progress.consecutive_failures();

                    if failures >= FAILURE_ALERT_THRESHOLD || !err.is_transient() {
                        error!(?err, failures, ?delay, task = %self.config.task, "Synchronizer is failing");
                    } else {
                        warn!(?err, failures, ?delay, task = %self.config.task, "Sync iteration failed");
                    }
                    delay
                }
            };

            self.progress.set_state(SyncState::Idle);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.progress.set_state(SyncState::Idle);
        info!(task = %self.config.task, "Synchronizer stopped");
    }

    /// Processes the next block range, or rolls back the checkpoint if the chain
    /// reorganized under it. A failed iteration marks the progress as behind.
    #[instrument(skip(self), fields(task = %self.config.task))]
    pub async fn sync_once(&mut self) -> Result<Iteration, SyncError> {
        let result = self.advance().await;
        match &result {
            Ok(_) => self.progress.reset_failures(),
            Err(_) => self.progress.record_failure(),
        }
        result
    }

    async fn advance(&mut self) -> Result<Iteration, SyncError> {
        self.progress.set_state(SyncState::Fetching);
        let checkpoint = self.store.get_last_processed_block(&self.config.task).await?;

        let head = self.chain.header_by_number(None).await?.number;
        self.progress.set_chain_head(head);

        if let Some(ancestor) = self.detect_reorg(checkpoint, head).await? {
            return self.roll_back(checkpoint, ancestor).await;
        }

        let safe_head = head.saturating_sub(self.config.confirmations);
        let from = checkpoint.saturating_add(1).max(self.config.start_block);
        if from > safe_head {
            self.progress.set_processed(checkpoint, true);
            self.notify(TrackerUpdate::Synced { block: checkpoint }).await;
            self.progress.set_state(SyncState::Idle);
            return Ok(Iteration::UpToDate { checkpoint });
        }
        let to = safe_head.min(from.saturating_add(self.config.max_block_range.max(1) - 1));

        // Fetched before the logs: a reorg touching the range after this point changes
        // the hash of `to` and is caught by the next iteration.
        let end = self.chain.block_by_number(to).await?;
        let logs = self.chain.filter_sequence_batch_events(from..=to).await?;
        debug!(from, to, logs = logs.len(), "Fetched sequence events");

        self.progress.set_state(SyncState::Decoding);
        let mut sequences = Vec::with_capacity(logs.len());
        for log in &logs {
            let (tx, is_pending) = self.chain.get_transaction(log.tx_hash).await?;
            if is_pending {
                return Err(SyncError::PendingTransaction(log.tx_hash));
            }

            match decode_sequence_batch(log, &tx) {
                Ok(sequence) => sequences.push(sequence),
                Err(err) => {
                    warn!(?err, tx_hash = %log.tx_hash, "Skipping undecodable sequencing transaction")
                }
            }
        }
        let data = self.fetch_missing_data(&sequences).await?;

        self.progress.set_state(SyncState::Persisting);
        let mut tx = self.store.begin_state_transaction().await?;
        self.store.store_offchain_data(&data, &mut tx).await?;
        self.store.store_last_processed_block(&self.config.task, to, &mut tx).await?;
        tx.commit().await?;

        self.progress.set_state(SyncState::Advanced);
        self.remember(to, end.header.hash);
        self.progress.set_processed(to, to >= safe_head);

        let count = sequences.len();
        for sequence in sequences {
            self.notify(TrackerUpdate::Batch(sequence)).await;
        }
        self.notify(TrackerUpdate::Synced { block: to }).await;

        info!(from, to, sequences = count, stored = data.len(), head, "Advanced checkpoint");
        Ok(Iteration::Advanced { from, to, sequences: count, stored: data.len() })
    }

    /// Returns the safe ancestor to roll back to if the checkpoint block is no longer
    /// canonical.
    async fn detect_reorg(&mut self, checkpoint: u64, head: u64) -> Result<Option<u64>, SyncError> {
        if checkpoint == 0 {
            return Ok(None);
        }

        if checkpoint > head {
            warn!(checkpoint, head, "Checkpoint is above the chain head");
            self.progress.mark_behind();
            return self.find_safe_ancestor(checkpoint, head).await.map(Some);
        }

        let canonical = self.chain.header_by_number(Some(checkpoint)).await?;
        match self.block_hashes.get(&checkpoint) {
            // first iteration after a restart: trust the chain
            None => {
                self.remember(checkpoint, canonical.hash);
                Ok(None)
            }
            Some(hash) if *hash == canonical.hash => Ok(None),
            Some(hash) => {
                warn!(
                    checkpoint,
                    expected = %hash,
                    canonical = %canonical.hash,
                    "Checkpoint block is no longer canonical"
                );
                self.progress.mark_behind();
                self.find_safe_ancestor(checkpoint, head).await.map(Some)
            }
        }
    }

    /// Walks the remembered block hashes from newest to oldest and returns the first one
    /// still on the canonical chain, falling back to `reorg_depth` blocks back. The result
    /// never exceeds `head` unless it is below the start block.
    async fn find_safe_ancestor(&self, checkpoint: u64, head: u64) -> Result<u64, SyncError> {
        let bound = checkpoint.min(head.saturating_add(1));
        let candidates: Vec<(u64, B256)> =
            self.block_hashes.range(..bound).rev().map(|(n, h)| (*n, *h)).collect();

        for (number, hash) in candidates {
            if self.chain.header_by_number(Some(number)).await?.hash == hash {
                return Ok(number);
            }
        }

        let floor = self.config.start_block.saturating_sub(1);
        Ok(checkpoint.saturating_sub(self.config.reorg_depth).min(head).max(floor))
    }

    async fn roll_back(&mut self, checkpoint: u64, ancestor: u64) -> Result<Iteration, SyncError> {
        warn!(checkpoint, ancestor, "Rolling back checkpoint after chain reorganization");
        self.progress.set_state(SyncState::Persisting);

        let mut tx = self.store.begin_state_transaction().await?;
        self.store.store_last_processed_block(&self.config.task, ancestor, &mut tx).await?;
        tx.commit().await?;

        self.block_hashes.retain(|number, _| *number <= ancestor);
        self.progress.set_processed(ancestor, false);
        self.notify(TrackerUpdate::Reorg { ancestor }).await;

        Ok(Iteration::RolledBack { from: checkpoint, to: ancestor })
    }

    /// Fetches from peers every referenced data entry that is not in the store yet.
    async fn fetch_missing_data(
        &self,
        sequences: &[SequenceBatch],
    ) -> Result<Vec<OffChainData>, SyncError> {
        let mut seen = HashSet::new();
        let mut missing = Vec::new();
        for key in sequences.iter().flat_map(|sequence| sequence.data_hashes.iter().copied()) {
            if seen.insert(key) && !self.store.exists(key).await? {
                missing.push(key);
            }
        }

        if missing.is_empty() {
            return Ok(Vec::new());
        }

        let peers = self.resolve_peers().await?;
        let mut data = Vec::with_capacity(missing.len());
        for key in missing {
            let entry = fetch_from_peers(self.peers.as_ref(), &peers, key)
                .await
                .ok_or(SyncError::DataUnavailable(key))?;
            data.push(entry);
        }

        Ok(data)
    }

    /// The trusted sequencer followed by every other committee member.
    async fn resolve_peers(&self) -> Result<Vec<String>, SyncError> {
        let mut urls = vec![self.chain.trusted_sequencer_url().await?];
        let committee = self.chain.get_current_committee().await?;

        for member in committee.members {
            if self.config.self_url.as_ref() != Some(&member.url) && !urls.contains(&member.url) {
                urls.push(member.url);
            }
        }

        Ok(urls)
    }

    fn remember(&mut self, block: u64, hash: B256) {
        self.block_hashes.insert(block, hash);

        let oldest = block.saturating_sub(self.config.reorg_depth);
        self.block_hashes = self.block_hashes.split_off(&oldest);
    }

    async fn notify(&self, update: TrackerUpdate) {
        if let Some(tracker) = &self.tracker {
            if tracker.send(update).await.is_err() {
                warn!("Sequence tracker is gone, dropping update");
            }
        }
    }
}

/// Requests `key` from every peer concurrently and returns the first answer that
/// hashes to `key`.
pub async fn fetch_from_peers<P: PeerClient + ?Sized>(
    client: &P,
    peers: &[String],
    key: B256,
) -> Option<OffChainData> {
    let mut requests: FuturesUnordered<_> = peers
        .iter()
        .map(|url| async move { (url, client.get_offchain_data(url, key).await) })
        .collect();

    while let Some((url, response)) = requests.next().await {
        match response {
            Ok(value) => {
                let entry = OffChainData { key, value };
                if entry.is_valid() {
                    debug!(%url, %key, "Fetched off-chain data from peer");
                    return Some(entry);
                }
                warn!(%url, %key, "Peer returned data that does not match its key");
            }
            Err(ClientError::NotFound) => debug!(%url, %key, "Peer does not have the data"),
            Err(err) => warn!(%url, %key, ?err, "Failed to fetch data from peer"),
        }
    }

    None
}
