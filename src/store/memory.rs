use std::sync::Arc;

use alloy::primitives::{Bytes, B256};
use async_trait::async_trait;
use hashbrown::HashMap;
use tokio::sync::RwLock;
use tracing::trace;

use super::{validate_entries, DataStore, StoreError, StoreTransaction};
use crate::common::OffChainData;

#[derive(Debug, Default)]
struct Tables {
    /// Content hash to payload.
    offchain_data: HashMap<B256, Bytes>,
    /// Task name to last processed block.
    checkpoints: HashMap<String, u64>,
}

/// An in-memory backend for the data store.
///
/// Cloning the store yields another handle to the same tables.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory store with room for `cap` data entries.
    pub fn with_capacity(cap: usize) -> Self {
        let tables = Tables { offchain_data: HashMap::with_capacity(cap), ..Default::default() };
        Self { tables: Arc::new(RwLock::new(tables)) }
    }
}

/// A transaction over an [`InMemoryStore`]. Writes are staged locally and applied
/// under a single write lock on commit.
#[derive(Debug)]
pub struct InMemoryTransaction {
    tables: Arc<RwLock<Tables>>,
    offchain_data: HashMap<B256, Bytes>,
    checkpoints: HashMap<String, u64>,
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn commit(self) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;

        let staged = self.offchain_data.len();
        for (key, value) in self.offchain_data {
            tables.offchain_data.entry(key).or_insert(value);
        }
        tables.checkpoints.extend(self.checkpoints);

        trace!(staged, "Committed in-memory transaction");
        Ok(())
    }

    async fn rollback(self) {}
}

#[async_trait]
impl DataStore for InMemoryStore {
    type Tx = InMemoryTransaction;

    async fn begin_state_transaction(&self) -> Result<Self::Tx, StoreError> {
        Ok(InMemoryTransaction {
            tables: Arc::clone(&self.tables),
            offchain_data: HashMap::new(),
            checkpoints: HashMap::new(),
        })
    }

    async fn exists(&self, key: B256) -> Result<bool, StoreError> {
        Ok(self.tables.read().await.offchain_data.contains_key(&key))
    }

    async fn get_offchain_data(
        &self,
        key: B256,
        tx: Option<&Self::Tx>,
    ) -> Result<Bytes, StoreError> {
        if let Some(value) = tx.and_then(|tx| tx.offchain_data.get(&key)) {
            return Ok(value.clone());
        }

        self.tables.read().await.offchain_data.get(&key).cloned().ok_or(StoreError::NotFound(key))
    }

    async fn store_offchain_data(
        &self,
        data: &[OffChainData],
        tx: &mut Self::Tx,
    ) -> Result<(), StoreError> {
        validate_entries(data)?;

        for entry in data {
            tx.offchain_data.entry(entry.key).or_insert_with(|| entry.value.clone());
        }

        Ok(())
    }

    async fn get_last_processed_block(&self, task: &str) -> Result<u64, StoreError> {
        Ok(self.tables.read().await.checkpoints.get(task).copied().unwrap_or_default())
    }

    async fn store_last_processed_block(
        &self,
        task: &str,
        block: u64,
        tx: &mut Self::Tx,
    ) -> Result<(), StoreError> {
        tx.checkpoints.insert(task.to_owned(), block);
        Ok(())
    }

    async fn count_offchain_data(&self) -> Result<u64, StoreError> {
        Ok(self.tables.read().await.offchain_data.len() as u64)
    }
}
