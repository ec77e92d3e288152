//! In-process fakes of the chain, peers, tracker and a failing store.

use std::{
    collections::HashMap,
    ops::RangeInclusive,
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use alloy::{
    primitives::{address, keccak256, Address, Bytes, B256},
    sol_types::SolCall,
};
use async_trait::async_trait;
use blst::min_pk::Signature as BlsSignature;

use crate::{
    chain::{
        contract::{ElderberryValidium, EtrogValidium},
        Block, ChainError, ChainEventSource, ChainTransaction, Header, SequenceBatchesLog,
    },
    client::PeerClient,
    common::{ClientError, Committee, OffChainData, Sequence, SequenceBatch, TrackerError},
    store::{DataStore, InMemoryStore, InMemoryTransaction, StoreError},
    tracker::TrackerSpec,
};

pub(crate) const SEQUENCER: Address = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");

pub(crate) const SEQUENCER_URL: &str = "http://sequencer.test";

pub(crate) fn sequence_batch(batch_number: u64, l1_block: u64, hashes: &[B256]) -> SequenceBatch {
    SequenceBatch {
        batch_number,
        data_hashes: hashes.to_vec(),
        sequencer: SEQUENCER,
        l1_block,
        tx_hash: sequencing_tx_hash(l1_block, batch_number),
    }
}

/// Sequence batch whose keys are the hashes of the given sequence's payloads.
pub(crate) fn batch_for(sequence: &Sequence, l1_block: u64) -> SequenceBatch {
    sequence_batch(sequence.batch_number, l1_block, &sequence.keys().collect::<Vec<_>>())
}

pub(crate) fn sequence(batch_number: u64, payloads: &[&'static [u8]]) -> Sequence {
    Sequence {
        batch_number,
        batches: payloads.iter().map(|p| OffChainData::new(Bytes::from_static(p))).collect(),
    }
}

fn sequencing_tx_hash(block: u64, batch_number: u64) -> B256 {
    keccak256([block.to_be_bytes(), batch_number.to_be_bytes()].concat())
}

fn etrog_batches(hashes: &[B256]) -> Vec<EtrogValidium::ValidiumBatchData> {
    hashes
        .iter()
        .map(|hash| EtrogValidium::ValidiumBatchData {
            transactionsHash: *hash,
            forcedGlobalExitRoot: B256::ZERO,
            forcedTimestamp: 0,
            forcedBlockHashL1: B256::ZERO,
        })
        .collect()
}

pub(crate) fn etrog_calldata(hashes: &[B256]) -> Bytes {
    EtrogValidium::sequenceBatchesValidiumCall {
        batches: etrog_batches(hashes),
        l2Coinbase: SEQUENCER,
        dataAvailabilityMessage: Bytes::new(),
    }
    .abi_encode()
    .into()
}

pub(crate) fn elderberry_calldata(hashes: &[B256]) -> Bytes {
    let batches = hashes
        .iter()
        .map(|hash| ElderberryValidium::ValidiumBatchData {
            transactionsHash: *hash,
            forcedGlobalExitRoot: B256::ZERO,
            forcedTimestamp: 0,
            forcedBlockHashL1: B256::ZERO,
        })
        .collect();

    ElderberryValidium::sequenceBatchesValidiumCall {
        batches,
        maxSequenceTimestamp: 1_700_000_000,
        initSequencedBatch: 1,
        l2Coinbase: SEQUENCER,
        dataAvailabilityMessage: Bytes::new(),
    }
    .abi_encode()
    .into()
}

#[derive(Debug, Default)]
struct ChainState {
    head: u64,
    /// First replaced block of every reorg so far.
    forks: Vec<u64>,
    logs: Vec<SequenceBatchesLog>,
    txs: HashMap<B256, (ChainTransaction, bool)>,
    fail_next: u32,
}

impl ChainState {
    fn hash(&self, number: u64) -> B256 {
        let epoch = self.forks.iter().filter(|at| **at <= number).count() as u64;
        keccak256([number.to_be_bytes(), epoch.to_be_bytes()].concat())
    }

    fn header(&self, number: u64) -> Result<Header, ChainError> {
        if number > self.head {
            return Err(ChainError::NotFound(format!("block {number}")));
        }

        Ok(Header {
            number,
            hash: self.hash(number),
            parent_hash: number.checked_sub(1).map(|p| self.hash(p)).unwrap_or_default(),
        })
    }
}

/// A scripted L1 chain with deterministic block hashes.
#[derive(Debug, Default)]
pub(crate) struct MockChain {
    state: Mutex<ChainState>,
}

impl MockChain {
    pub(crate) fn new(head: u64) -> Self {
        let chain = Self::default();
        chain.set_head(head);
        chain
    }

    pub(crate) fn set_head(&self, head: u64) {
        self.state.lock().unwrap().head = head;
    }

    /// Replaces every block from `at` onwards, dropping the logs they carried.
    pub(crate) fn reorg(&self, at: u64) {
        let mut state = self.state.lock().unwrap();
        state.forks.push(at);
        state.logs.retain(|log| log.block_number < at);
    }

    /// Makes the next `n` chain calls fail.
    pub(crate) fn fail_next(&self, n: u32) {
        self.state.lock().unwrap().fail_next = n;
    }

    /// Includes a sequencing transaction for the given keys at `block`.
    pub(crate) fn add_sequence(&self, block: u64, batch_number: u64, hashes: &[B256]) -> SequenceBatch {
        self.add_raw_sequence(block, batch_number, etrog_calldata(hashes));
        sequence_batch(batch_number, block, hashes)
    }

    pub(crate) fn add_raw_sequence(&self, block: u64, batch_number: u64, input: Bytes) {
        self.add_transaction(block, batch_number, input, false);
    }

    pub(crate) fn add_pending_sequence(&self, block: u64, batch_number: u64, hashes: &[B256]) {
        self.add_transaction(block, batch_number, etrog_calldata(hashes), true);
    }

    fn add_transaction(&self, block: u64, batch_number: u64, input: Bytes, pending: bool) {
        let mut state = self.state.lock().unwrap();
        let hash = sequencing_tx_hash(block, batch_number);
        let block_hash = state.hash(block);

        state.logs.push(SequenceBatchesLog { batch_number, block_number: block, block_hash, tx_hash: hash });
        let tx = ChainTransaction {
            hash,
            from: SEQUENCER,
            input,
            block_number: (!pending).then_some(block),
        };
        state.txs.insert(hash, (tx, pending));
    }

    fn state(&self) -> Result<std::sync::MutexGuard<'_, ChainState>, ChainError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(ChainError::Transport("connection reset".to_owned()));
        }
        Ok(state)
    }
}

#[async_trait]
impl ChainEventSource for MockChain {
    async fn block_by_number(&self, number: u64) -> Result<Block, ChainError> {
        let state = self.state()?;
        let transaction_count = state.logs.iter().filter(|log| log.block_number == number).count();
        Ok(Block { header: state.header(number)?, transaction_count })
    }

    async fn header_by_number(&self, number: Option<u64>) -> Result<Header, ChainError> {
        let state = self.state()?;
        state.header(number.unwrap_or(state.head))
    }

    async fn get_transaction(&self, hash: B256) -> Result<(ChainTransaction, bool), ChainError> {
        self.state()?
            .txs
            .get(&hash)
            .cloned()
            .ok_or_else(|| ChainError::NotFound(format!("transaction {hash}")))
    }

    async fn filter_sequence_batch_events(
        &self,
        blocks: RangeInclusive<u64>,
    ) -> Result<Vec<SequenceBatchesLog>, ChainError> {
        let state = self.state()?;
        let mut logs: Vec<_> = state
            .logs
            .iter()
            .filter(|log| blocks.contains(&log.block_number))
            .map(|log| SequenceBatchesLog { block_hash: state.hash(log.block_number), ..*log })
            .collect();
        logs.sort_by_key(|log| log.block_number);
        Ok(logs)
    }

    async fn get_current_committee(&self) -> Result<Committee, ChainError> {
        drop(self.state()?);
        Ok(Committee::default())
    }

    async fn trusted_sequencer_address(&self) -> Result<Address, ChainError> {
        drop(self.state()?);
        Ok(SEQUENCER)
    }

    async fn trusted_sequencer_url(&self) -> Result<String, ChainError> {
        drop(self.state()?);
        Ok(SEQUENCER_URL.to_owned())
    }
}

/// Peers that all serve the same in-memory data.
#[derive(Debug, Default)]
pub(crate) struct MockPeers {
    data: Mutex<HashMap<B256, Bytes>>,
    requests: AtomicUsize,
}

impl MockPeers {
    pub(crate) fn with_data(values: impl IntoIterator<Item = Bytes>) -> Self {
        let peers = Self::default();
        values.into_iter().for_each(|value| peers.insert(value));
        peers
    }

    pub(crate) fn insert(&self, value: Bytes) {
        self.insert_raw(keccak256(&value), value);
    }

    pub(crate) fn insert_raw(&self, key: B256, value: Bytes) {
        self.data.lock().unwrap().insert(key, value);
    }

    pub(crate) fn requests(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PeerClient for MockPeers {
    async fn get_offchain_data(&self, _url: &str, hash: B256) -> Result<Bytes, ClientError> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.data.lock().unwrap().get(&hash).cloned().ok_or(ClientError::NotFound)
    }

    async fn sign_sequence(&self, _url: &str, _sequence: &Sequence) -> Result<BlsSignature, ClientError> {
        Err(ClientError::Remote { status: 501, message: "not a committee member".to_owned() })
    }
}

/// A tracker view that can be flipped to stale.
#[derive(Debug, Default)]
pub(crate) struct MockTracker {
    batches: Mutex<HashMap<u64, SequenceBatch>>,
    stale: AtomicBool,
}

impl MockTracker {
    pub(crate) fn insert(&self, batch: SequenceBatch) {
        self.batches.lock().unwrap().insert(batch.batch_number, batch);
    }

    pub(crate) fn set_stale(&self, stale: bool) {
        self.stale.store(stale, Ordering::Relaxed);
    }
}

#[async_trait]
impl TrackerSpec for MockTracker {
    async fn get_sequence_batch(&self, batch_number: u64) -> Result<SequenceBatch, TrackerError> {
        if self.stale.load(Ordering::Relaxed) {
            return Err(TrackerError::StaleView { age: None, max: Duration::from_secs(600) });
        }

        self.batches.lock().unwrap().get(&batch_number).cloned().ok_or(TrackerError::NotFound(batch_number))
    }
}

/// An in-memory store whose checkpoint writes fail a set number of times.
#[derive(Debug, Clone)]
pub(crate) struct FlakyStore {
    inner: InMemoryStore,
    checkpoint_failures: Arc<AtomicU32>,
}

impl FlakyStore {
    pub(crate) fn failing_checkpoints(n: u32) -> Self {
        Self { inner: InMemoryStore::new(), checkpoint_failures: Arc::new(AtomicU32::new(n)) }
    }

    pub(crate) fn inner(&self) -> InMemoryStore {
        self.inner.clone()
    }
}

#[async_trait]
impl DataStore for FlakyStore {
    type Tx = InMemoryTransaction;

    async fn begin_state_transaction(&self) -> Result<Self::Tx, StoreError> {
        self.inner.begin_state_transaction().await
    }

    async fn exists(&self, key: B256) -> Result<bool, StoreError> {
        self.inner.exists(key).await
    }

    async fn get_offchain_data(&self, key: B256, tx: Option<&Self::Tx>) -> Result<Bytes, StoreError> {
        self.inner.get_offchain_data(key, tx).await
    }

    async fn store_offchain_data(&self, data: &[OffChainData], tx: &mut Self::Tx) -> Result<(), StoreError> {
        self.inner.store_offchain_data(data, tx).await
    }

    async fn get_last_processed_block(&self, task: &str) -> Result<u64, StoreError> {
        self.inner.get_last_processed_block(task).await
    }

    async fn store_last_processed_block(
        &self,
        task: &str,
        block: u64,
        tx: &mut Self::Tx,
    ) -> Result<(), StoreError> {
        let remaining = self.checkpoint_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.checkpoint_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Backend("disk full".to_owned()));
        }

        self.inner.store_last_processed_block(task, block, tx).await
    }

    async fn count_offchain_data(&self) -> Result<u64, StoreError> {
        self.inner.count_offchain_data().await
    }
}
