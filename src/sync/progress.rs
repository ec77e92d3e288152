use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};

/// Phase of a synchronizer iteration.
#[repr(u8)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncState {
    /// Waiting for the next iteration.
    #[default]
    Idle,
    /// Reading the checkpoint and fetching logs from the chain.
    Fetching,
    /// Decoding sequencing transactions and fetching their data.
    Decoding,
    /// Writing data and checkpoint in one transaction.
    Persisting,
    /// The checkpoint was advanced.
    Advanced,
}

impl From<u8> for SyncState {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Fetching,
            2 => Self::Decoding,
            3 => Self::Persisting,
            4 => Self::Advanced,
            _ => Self::Idle,
        }
    }
}

/// Progress of a synchronizer task, shared with the status surface.
#[derive(Debug, Default)]
pub struct SyncProgress {
    state: AtomicU8,
    last_processed_block: AtomicU64,
    chain_head: AtomicU64,
    up_to_date: AtomicBool,
    consecutive_failures: AtomicU32,
}

impl SyncProgress {
    /// Current phase.
    pub fn state(&self) -> SyncState {
        self.state.load(Ordering::Acquire).into()
    }

    /// Last block committed by this process.
    pub fn last_processed_block(&self) -> u64 {
        self.last_processed_block.load(Ordering::Acquire)
    }

    /// Latest L1 block seen.
    pub fn chain_head(&self) -> u64 {
        self.chain_head.load(Ordering::Acquire)
    }

    /// Whether the task has caught up with the (confirmed) chain head. Always `false`
    /// while a reorg rollback is pending.
    pub fn is_up_to_date(&self) -> bool {
        self.up_to_date.load(Ordering::Acquire)
    }

    /// Number of consecutive failed iterations.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    pub(crate) fn set_state(&self, state: SyncState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn set_chain_head(&self, head: u64) {
        self.chain_head.store(head, Ordering::Release);
    }

    pub(crate) fn set_processed(&self, block: u64, up_to_date: bool) {
        self.last_processed_block.store(block, Ordering::Release);
        self.up_to_date.store(up_to_date, Ordering::Release);
    }

    /// A failed iteration leaves the task behind.
    pub(crate) fn record_failure(&self) {
        self.up_to_date.store(false, Ordering::Release);
        self.consecutive_failures.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn reset_failures(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
    }

    pub(crate) fn mark_behind(&self) {
        self.up_to_date.store(false, Ordering::Release);
    }
}
