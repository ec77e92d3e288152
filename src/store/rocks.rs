use std::{
    path::Path,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use alloy::primitives::{Bytes, B256};
use async_trait::async_trait;
use hashbrown::HashMap;
use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, WriteOptions, DB};
use tracing::{debug, trace};

use super::{validate_entries, DataStore, StoreError, StoreTransaction};
use crate::common::OffChainData;

/// Column family holding `key -> value` off-chain data.
const OFFCHAIN_DATA_CF: &str = "offchain_data";
/// Column family holding `task -> u64 big endian` checkpoints.
const LAST_PROCESSED_BLOCK_CF: &str = "last_processed_block";

impl From<rocksdb::Error> for StoreError {
    fn from(err: rocksdb::Error) -> Self {
        StoreError::Backend(err.into_string())
    }
}

fn cf<'a>(db: &'a DB, name: &'static str) -> Result<&'a rocksdb::ColumnFamily, StoreError> {
    db.cf_handle(name).ok_or_else(|| StoreError::Backend(format!("missing column family {name}")))
}

#[derive(Debug)]
struct Shared {
    db: DB,
    /// Number of keys in the data column family, counted once on open.
    key_count: AtomicU64,
    /// Serializes commits so the key count matches what was written.
    commit_lock: Mutex<()>,
}

/// A RocksDB backend for the data store.
#[derive(Debug, Clone)]
pub struct RocksStore {
    shared: Arc<Shared>,
}

impl RocksStore {
    /// Opens (or creates) the database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = [OFFCHAIN_DATA_CF, LAST_PROCESSED_BLOCK_CF]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()));

        let db = DB::open_cf_descriptors(&opts, path.as_ref(), cfs)?;

        let mut key_count = 0;
        for item in db.iterator_cf(cf(&db, OFFCHAIN_DATA_CF)?, IteratorMode::Start) {
            item?;
            key_count += 1;
        }
        debug!(path = %path.as_ref().display(), key_count, "Opened RocksDB store");

        Ok(Self {
            shared: Arc::new(Shared {
                db,
                key_count: AtomicU64::new(key_count),
                commit_lock: Mutex::new(()),
            }),
        })
    }

    fn db(&self) -> &DB {
        &self.shared.db
    }
}

/// A transaction over a [`RocksStore`]. Writes are staged in memory and written as a
/// single synced [`WriteBatch`] on commit.
#[derive(Debug)]
pub struct RocksTransaction {
    store: RocksStore,
    offchain_data: HashMap<B256, Bytes>,
    checkpoints: HashMap<String, u64>,
}

impl RocksTransaction {
    /// Writes the staged batch and returns the number of new keys.
    fn write(&self) -> Result<u64, StoreError> {
        let shared = &self.store.shared;
        let _guard = shared
            .commit_lock
            .lock()
            .map_err(|_| StoreError::Backend("commit lock poisoned".to_owned()))?;

        let data_cf = cf(&shared.db, OFFCHAIN_DATA_CF)?;
        let checkpoint_cf = cf(&shared.db, LAST_PROCESSED_BLOCK_CF)?;

        let mut batch = WriteBatch::default();
        let mut added = 0;
        for (key, value) in &self.offchain_data {
            if shared.db.get_pinned_cf(data_cf, key)?.is_none() {
                batch.put_cf(data_cf, key, value);
                added += 1;
            }
        }
        for (task, block) in &self.checkpoints {
            batch.put_cf(checkpoint_cf, task.as_bytes(), block.to_be_bytes());
        }

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(true);
        shared.db.write_opt(batch, &write_opts)?;

        shared.key_count.fetch_add(added, Ordering::AcqRel);
        Ok(added)
    }
}

#[async_trait]
impl StoreTransaction for RocksTransaction {
    async fn commit(self) -> Result<(), StoreError> {
        // synced writes block until the WAL is flushed
        let added = tokio::task::spawn_blocking(move || self.write())
            .await
            .map_err(|e| StoreError::Backend(format!("commit task failed: {e}")))??;

        trace!(added, "Committed RocksDB transaction");
        Ok(())
    }

    async fn rollback(self) {}
}

#[async_trait]
impl DataStore for RocksStore {
    type Tx = RocksTransaction;

    async fn begin_state_transaction(&self) -> Result<Self::Tx, StoreError> {
        Ok(RocksTransaction {
            store: self.clone(),
            offchain_data: HashMap::new(),
            checkpoints: HashMap::new(),
        })
    }

    async fn exists(&self, key: B256) -> Result<bool, StoreError> {
        Ok(self.db().get_pinned_cf(cf(self.db(), OFFCHAIN_DATA_CF)?, key)?.is_some())
    }

    async fn get_offchain_data(
        &self,
        key: B256,
        tx: Option<&Self::Tx>,
    ) -> Result<Bytes, StoreError> {
        if let Some(value) = tx.and_then(|tx| tx.offchain_data.get(&key)) {
            return Ok(value.clone());
        }

        self.db()
            .get_cf(cf(self.db(), OFFCHAIN_DATA_CF)?, key)?
            .map(Bytes::from)
            .ok_or(StoreError::NotFound(key))
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
        let Some(raw) = self.db().get_pinned_cf(cf(self.db(), LAST_PROCESSED_BLOCK_CF)?, task)? else {
            return Ok(0);
        };

        let bytes: [u8; 8] = raw.as_ref().try_into().map_err(|_| {
            StoreError::Backend(format!("corrupted checkpoint for task {task}"))
        })?;
        Ok(u64::from_be_bytes(bytes))
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
        Ok(self.shared.key_count.load(Ordering::Acquire))
    }
}
