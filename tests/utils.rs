use std::{ops::RangeInclusive, sync::Arc, time::Duration};

use alloy::primitives::{address, Address, Bytes, B256};
use async_trait::async_trait;
use blst::min_pk::PublicKey as BlsPublicKey;
use tokio_util::sync::CancellationToken;

use dac_node::{
    bls::random_bls_secret,
    chain::{Block, ChainTransaction, Header, SequenceBatchesLog},
    member, ChainError, ChainEventSource, Committee, InMemoryStore, Member, OffChainData,
    Sequence, SequenceBatch, SequenceTracker, ServerConfig, StatusEndpoints, SyncProgress,
    TrackerConfig, TrackerSpec, TrackerUpdate, L1_SYNC_TASK,
};

pub const SEQUENCER: Address = address!("70997970C51812dc3A010C7d01b50e0d17dc79C8");

/// A chain that only knows the trusted sequencer.
pub struct StaticChain;

#[async_trait]
impl ChainEventSource for StaticChain {
    async fn block_by_number(&self, number: u64) -> Result<Block, ChainError> {
        Err(ChainError::NotFound(format!("block {number}")))
    }

    async fn header_by_number(&self, number: Option<u64>) -> Result<Header, ChainError> {
        Err(ChainError::NotFound(format!("header {number:?}")))
    }

    async fn get_transaction(&self, hash: B256) -> Result<(ChainTransaction, bool), ChainError> {
        Err(ChainError::NotFound(format!("transaction {hash}")))
    }

    async fn filter_sequence_batch_events(
        &self,
        _blocks: RangeInclusive<u64>,
    ) -> Result<Vec<SequenceBatchesLog>, ChainError> {
        Ok(vec![])
    }

    async fn get_current_committee(&self) -> Result<Committee, ChainError> {
        Ok(Committee::default())
    }

    async fn trusted_sequencer_address(&self) -> Result<Address, ChainError> {
        Ok(SEQUENCER)
    }

    async fn trusted_sequencer_url(&self) -> Result<String, ChainError> {
        Ok("http://127.0.0.1:1".to_owned())
    }
}

pub struct TestMember {
    pub url: String,
    pub pubkey: BlsPublicKey,
    pub store: InMemoryStore,
    pub tracker: SequenceTracker,
    pub updates: tokio::sync::mpsc::Sender<TrackerUpdate>,
    pub cancel: CancellationToken,
}

impl TestMember {
    /// Announces `sequence` as sequenced by the trusted sequencer and waits until the
    /// tracker serves it.
    pub async fn announce(&self, sequence: &Sequence) -> eyre::Result<()> {
        let batch = SequenceBatch {
            batch_number: sequence.batch_number,
            data_hashes: sequence.keys().collect(),
            sequencer: SEQUENCER,
            l1_block: 100 + sequence.batch_number,
            tx_hash: B256::repeat_byte(0xab),
        };
        self.updates.send(TrackerUpdate::Batch(batch)).await?;

        tokio::time::timeout(Duration::from_secs(5), async {
            while self.tracker.get_sequence_batch(sequence.batch_number).await.is_err() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await?;

        Ok(())
    }
}

impl Drop for TestMember {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub async fn spin_up_member(request_timeout: Duration) -> eyre::Result<TestMember> {
    spin_up_member_with(ServerConfig { port: 0, request_timeout, ..Default::default() }).await
}

pub async fn spin_up_member_with(config: ServerConfig) -> eyre::Result<TestMember> {
    let secret_key = random_bls_secret();
    let pubkey = secret_key.sk_to_pk();
    let store = InMemoryStore::new();
    let cancel = CancellationToken::new();

    let tracker = SequenceTracker::new(TrackerConfig::default());
    let (updates, stream) = SequenceTracker::channel(16);
    tokio::spawn(tracker.clone().run(Arc::new(StaticChain), stream, cancel.clone()));

    let status =
        StatusEndpoints::new(store.clone(), Arc::new(SyncProgress::default()), "test", L1_SYNC_TASK);
    let member = Member::new(store.clone(), Arc::new(tracker.clone()), secret_key);
    let (addr, _) = member::serve(Arc::new(member), status, config, cancel.clone()).await?;

    Ok(TestMember {
        url: format!("http://127.0.0.1:{}", addr.port()),
        pubkey,
        store,
        tracker,
        updates,
        cancel,
    })
}

pub fn sequence(batch_number: u64, payloads: &[&'static [u8]]) -> Sequence {
    Sequence {
        batch_number,
        batches: payloads.iter().map(|p| OffChainData::new(Bytes::from_static(p))).collect(),
    }
}
