//! Content-addressed off-chain data storage with per-task block checkpoints.
//!
//! Every write goes through a [`StoreTransaction`] obtained from
//! [`DataStore::begin_state_transaction`]. Nothing staged in a transaction is
//! visible to other readers until [`StoreTransaction::commit`] returns, and a
//! transaction that is dropped without being committed is rolled back.

use alloy::primitives::{keccak256, Bytes, B256};
use async_trait::async_trait;
use thiserror::Error;

use crate::common::OffChainData;

mod memory;
pub use memory::{InMemoryStore, InMemoryTransaction};

#[cfg(feature = "rocksdb")]
mod rocks;
#[cfg(feature = "rocksdb")]
pub use rocks::{RocksStore, RocksTransaction};

/// An error returned by a [`DataStore`].
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum StoreError {
    #[error("Off-chain data not found for key {0}")]
    NotFound(B256),
    #[error("Invalid key {key}: value hashes to {actual}")]
    InvalidKey { key: B256, actual: B256 },
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Returns `true` if this is a missing key rather than a storage failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// A unit of work over a [`DataStore`].
#[async_trait]
pub trait StoreTransaction: Send + Sync {
    /// Atomically applies every staged write.
    async fn commit(self) -> Result<(), StoreError>;

    /// Discards every staged write. Dropping the transaction has the same effect.
    async fn rollback(self);
}

/// Durable storage for off-chain data and synchronization checkpoints.
#[async_trait]
pub trait DataStore: Clone + Send + Sync + 'static {
    /// The transaction type of this backend.
    type Tx: StoreTransaction + 'static;

    /// Opens a new transaction.
    async fn begin_state_transaction(&self) -> Result<Self::Tx, StoreError>;

    /// Returns whether committed data exists for the given key.
    async fn exists(&self, key: B256) -> Result<bool, StoreError>;

    /// Reads the value stored under `key`, including writes staged in `tx` if given.
    async fn get_offchain_data(&self, key: B256, tx: Option<&Self::Tx>)
        -> Result<Bytes, StoreError>;

    /// Stages all entries for insertion. Entries that already exist are left as is.
    ///
    /// Fails with [`StoreError::InvalidKey`] without staging anything if any entry's
    /// key is not the hash of its value.
    async fn store_offchain_data(
        &self,
        data: &[OffChainData],
        tx: &mut Self::Tx,
    ) -> Result<(), StoreError>;

    /// Returns the last processed block for `task`, or `0` if the task never ran.
    async fn get_last_processed_block(&self, task: &str) -> Result<u64, StoreError>;

    /// Stages the last processed block for `task`.
    async fn store_last_processed_block(
        &self,
        task: &str,
        block: u64,
        tx: &mut Self::Tx,
    ) -> Result<(), StoreError>;

    /// Returns the number of stored data keys.
    async fn count_offchain_data(&self) -> Result<u64, StoreError>;
}

/// Checks that every entry is content-addressed correctly.
pub(crate) fn validate_entries(data: &[OffChainData]) -> Result<(), StoreError> {
    for entry in data {
        let actual = keccak256(&entry.value);
        if actual != entry.key {
            return Err(StoreError::InvalidKey { key: entry.key, actual });
        }
    }

    Ok(())
}
