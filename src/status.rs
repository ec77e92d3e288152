use std::{sync::Arc, time::Instant};

use serde::{Deserialize, Serialize};

use crate::{
    store::{DataStore, StoreError},
    sync::SyncProgress,
};

/// A snapshot of the node's health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    /// Seconds since the node started.
    pub uptime_secs: u64,
    /// Version string the node was started with.
    pub version: String,
    /// Number of stored off-chain data entries.
    pub key_count: u64,
    /// Last committed L1 block of the synchronizer.
    pub backfill_progress: u64,
    /// Latest L1 block seen by the synchronizer.
    pub chain_head: u64,
    /// Blocks between the chain head and the committed checkpoint.
    pub backfill_lag: u64,
    /// Whether the last iteration reached the confirmed head.
    pub up_to_date: bool,
    /// Failed synchronizer iterations since the last successful one.
    pub consecutive_failures: u32,
}

/// Read-only view over the store and the synchronizer progress.
#[derive(Debug, Clone)]
pub struct StatusEndpoints<DS> {
    store: DS,
    progress: Arc<SyncProgress>,
    version: String,
    task: String,
    started: Instant,
}

impl<DS: DataStore> StatusEndpoints<DS> {
    /// Creates the status surface. `version` is reported as is.
    pub fn new(
        store: DS,
        progress: Arc<SyncProgress>,
        version: impl Into<String>,
        task: impl Into<String>,
    ) -> Self {
        Self { store, progress, version: version.into(), task: task.into(), started: Instant::now() }
    }

    /// Returns the current status.
    pub async fn get_status(&self) -> Result<Status, StoreError> {
        let key_count = self.store.count_offchain_data().await?;
        let backfill_progress = self.store.get_last_processed_block(&self.task).await?;
        let chain_head = self.progress.chain_head();

        Ok(Status {
            uptime_secs: self.started.elapsed().as_secs(),
            version: self.version.clone(),
            key_count,
            backfill_progress,
            chain_head,
            backfill_lag: chain_head.saturating_sub(backfill_progress),
            up_to_date: self.progress.is_up_to_date(),
            consecutive_failures: self.progress.consecutive_failures(),
        })
    }
}
