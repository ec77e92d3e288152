use async_trait::async_trait;

use crate::common::{SequenceBatch, TrackerError};

/// Read access to the batch sequences proposed by the trusted sequencer.
#[async_trait]
pub trait TrackerSpec: Send + Sync + 'static {
    /// Returns the sequence whose last batch is `batch_number`.
    ///
    /// Fails with [`TrackerError::StaleView`] if the view has not been refreshed recently
    /// enough to be trusted, and with [`TrackerError::NotFound`] if the sequence has not
    /// been observed.
    async fn get_sequence_batch(&self, batch_number: u64) -> Result<SequenceBatch, TrackerError>;
}
