//! Read access to L1: blocks, sequencing events and the committee contracts.

use std::ops::RangeInclusive;

use alloy::primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use thiserror::Error;

use crate::common::Committee;

pub mod contract;

/// An error returned by a [`ChainEventSource`]. All variants are considered transient
/// by the synchronizer.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum ChainError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Contract call error: {0}")]
    Contract(String),
    #[error("Not found: {0}")]
    NotFound(String),
}

/// The subset of an L1 block header the node cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Block number.
    pub number: u64,
    /// Block hash.
    pub hash: B256,
    /// Parent block hash.
    pub parent_hash: B256,
}

/// An L1 block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// The block header.
    pub header: Header,
    /// Number of transactions included in the block.
    pub transaction_count: usize,
}

/// An L1 transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTransaction {
    /// Transaction hash.
    pub hash: B256,
    /// Sender.
    pub from: Address,
    /// Calldata.
    pub input: Bytes,
    /// Inclusion block, `None` while pending.
    pub block_number: Option<u64>,
}

/// A raw `SequenceBatches` log emitted by the sequencing contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceBatchesLog {
    /// The last batch number of the sequence.
    pub batch_number: u64,
    /// Block the log was emitted in.
    pub block_number: u64,
    /// Hash of that block.
    pub block_hash: B256,
    /// Transaction that emitted the log.
    pub tx_hash: B256,
}

/// Read access to the L1 chain and the committee contracts.
#[async_trait]
pub trait ChainEventSource: Send + Sync + 'static {
    /// Returns the block with the given number.
    async fn block_by_number(&self, number: u64) -> Result<Block, ChainError>;

    /// Returns the header with the given number, or the latest header if `None`.
    async fn header_by_number(&self, number: Option<u64>) -> Result<Header, ChainError>;

    /// Returns a transaction and whether it is still pending.
    async fn get_transaction(&self, hash: B256) -> Result<(ChainTransaction, bool), ChainError>;

    /// Returns every `SequenceBatches` log emitted in the given block range, in order.
    async fn filter_sequence_batch_events(
        &self,
        blocks: RangeInclusive<u64>,
    ) -> Result<Vec<SequenceBatchesLog>, ChainError>;

    /// Returns the current data committee.
    async fn get_current_committee(&self) -> Result<Committee, ChainError>;

    /// Returns the address of the trusted sequencer.
    async fn trusted_sequencer_address(&self) -> Result<Address, ChainError>;

    /// Returns the URL of the trusted sequencer.
    async fn trusted_sequencer_url(&self) -> Result<String, ChainError>;
}
