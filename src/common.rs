use std::time::Duration;

use alloy::primitives::{keccak256, Address, Bytes, Keccak256, B256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::StoreError;

/// Maximum number of batches accepted in a single signing request.
pub const MAX_SEQUENCE_BATCHES: usize = 4096;

/// A piece of off-chain batch data, addressed by the keccak256 hash of its value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OffChainData {
    /// Content hash of `value`.
    pub key: B256,
    /// The raw batch payload.
    pub value: Bytes,
}

impl OffChainData {
    /// Creates a new entry by hashing the given value.
    pub fn new(value: impl Into<Bytes>) -> Self {
        let value = value.into();
        Self { key: keccak256(&value), value }
    }

    /// Returns `true` if the key is the hash of the value.
    pub fn is_valid(&self) -> bool {
        keccak256(&self.value) == self.key
    }
}

/// A sequence of batches submitted by the sequencer for the committee to attest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sequence {
    /// Number of the last batch in the sequence, as assigned by the sequencing contract.
    pub batch_number: u64,
    /// The batches of the sequence in order, with their payloads.
    pub batches: Vec<OffChainData>,
}

impl Sequence {
    /// Returns the data keys of the sequence in order.
    pub fn keys(&self) -> impl Iterator<Item = B256> + '_ {
        self.batches.iter().map(|batch| batch.key)
    }

    /// Returns the digest the committee signs over.
    ///
    /// The batch keys are folded into an accumulator `acc = keccak256(acc || key)`
    /// starting from zero, which is then hashed together with the batch number.
    pub fn hash_to_sign(&self) -> B256 {
        let acc = self.keys().fold(B256::ZERO, |acc, key| {
            let mut hasher = Keccak256::new();
            hasher.update(acc);
            hasher.update(key);
            hasher.finalize()
        });

        let mut hasher = Keccak256::new();
        hasher.update(self.batch_number.to_be_bytes());
        hasher.update(acc);
        hasher.finalize()
    }
}

/// A batch sequence observed on L1, as announced by the trusted sequencer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceBatch {
    /// Number of the last batch in the sequence.
    pub batch_number: u64,
    /// Data keys of every batch of the sequence, in calldata order.
    pub data_hashes: Vec<B256>,
    /// Sender of the sequencing transaction.
    pub sequencer: Address,
    /// L1 block the sequence was included in.
    pub l1_block: u64,
    /// Hash of the sequencing transaction.
    pub tx_hash: B256,
}

/// A single data committee member as registered on-chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitteeMember {
    /// The URL at which the member serves off-chain data.
    pub url: String,
    /// The member's address.
    pub address: Address,
}

/// A point-in-time snapshot of the data committee.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Committee {
    /// Current members.
    pub members: Vec<CommitteeMember>,
    /// Number of signatures required for a quorum.
    pub required_signatures: u64,
}

/// An error returned by the sequencer tracker.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum TrackerError {
    #[error("Batch {0} has not been observed")]
    NotFound(u64),
    #[error("Sequencer view is stale: last update {age:?} ago, max {max:?}")]
    StaleView { age: Option<Duration>, max: Duration },
}

/// An error returned by the committee member when serving a request.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum MemberError {
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Invalid data: hash of value does not match key {0}")]
    InvalidData(B256),
    #[error("Sequence mismatch: {0}")]
    SequenceMismatch(String),
    #[error("Stale view: {0}")]
    StaleView(TrackerError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// An error that can occur when talking to a committee member.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum ClientError {
    #[error("Invalid peer URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Connection error: {0}")]
    Connection(#[from] reqwest::Error),
    #[error("Not found")]
    NotFound,
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Invalid data: {0}")]
    InvalidData(String),
    #[error("Sequence mismatch: {0}")]
    SequenceMismatch(String),
    #[error("Stale view: {0}")]
    StaleView(String),
    #[error("Remote error ({status}): {message}")]
    Remote { status: u16, message: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ClientError {
    /// Whether the same request may succeed against this or another peer later.
    ///
    /// Rejections of the request itself (bad request, invalid data, mismatching
    /// sequence) are final.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::InvalidUrl(_) | Self::BadRequest(_) | Self::InvalidData(_) | Self::SequenceMismatch(_)
        )
    }
}
