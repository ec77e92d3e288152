//! The committee member service and its HTTP API.

use std::{fmt, sync::Arc};

use alloy::primitives::{Bytes, B256};
use async_trait::async_trait;
use blst::min_pk::{PublicKey as BlsPublicKey, SecretKey as BlsSecretKey, Signature};
use tracing::{debug, instrument, warn};

mod api;
pub use api::{router, serve, ServerConfig, DEFAULT_MAX_BODY_SIZE};

mod spec;
pub use spec::MemberSpec;

use crate::{
    common::{MemberError, Sequence, TrackerError, MAX_SEQUENCE_BATCHES},
    primitives::bls::sign_with_prefix,
    store::{DataStore, StoreTransaction},
    tracker::TrackerSpec,
};

/// A data committee member.
///
/// Members store the batch data of every sequence they are asked to sign, and only sign
/// sequences that match what the trusted sequencer published on L1.
pub struct Member<DS, T> {
    /// Off-chain data and checkpoints.
    store: DS,
    /// View of the sequences proposed by the trusted sequencer.
    tracker: Arc<T>,
    /// BLS secret key used to sign sequence digests.
    secret_key: BlsSecretKey,
}

impl<DS, T> fmt::Debug for Member<DS, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Member").field("public_key", &self.public_key()).finish_non_exhaustive()
    }
}

impl<DS, T> Member<DS, T> {
    /// Creates a new member.
    pub fn new(store: DS, tracker: Arc<T>, secret_key: BlsSecretKey) -> Self {
        Self { store, tracker, secret_key }
    }

    /// The public key peers verify this member's signatures with.
    pub fn public_key(&self) -> BlsPublicKey {
        self.secret_key.sk_to_pk()
    }
}

impl<DS: DataStore, T: TrackerSpec> Member<DS, T> {
    /// Checks the sequence against the one the trusted sequencer published.
    async fn check_against_tracker(&self, sequence: &Sequence) -> Result<(), MemberError> {
        let expected = match self.tracker.get_sequence_batch(sequence.batch_number).await {
            Ok(expected) => expected,
            Err(TrackerError::NotFound(n)) => {
                return Err(MemberError::SequenceMismatch(format!(
                    "batch {n} has not been sequenced on L1"
                )));
            }
            Err(err @ TrackerError::StaleView { .. }) => return Err(MemberError::StaleView(err)),
        };

        if !sequence.keys().eq(expected.data_hashes.iter().copied()) {
            return Err(MemberError::SequenceMismatch(format!(
                "batch {} was sequenced with {} other data hashes in tx {}",
                sequence.batch_number,
                expected.data_hashes.len(),
                expected.tx_hash
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl<DS: DataStore, T: TrackerSpec> MemberSpec for Member<DS, T> {
    #[instrument(skip(self))]
    async fn get_offchain_data(&self, hash: B256) -> Result<Bytes, MemberError> {
        Ok(self.store.get_offchain_data(hash, None).await?)
    }

    #[instrument(skip_all, fields(batch_number = sequence.batch_number, batches = sequence.batches.len()))]
    async fn sign_sequence(&self, sequence: Sequence) -> Result<Signature, MemberError> {
        if sequence.batches.is_empty() {
            return Err(MemberError::BadRequest("sequence has no batches".to_owned()));
        }
        if sequence.batches.len() > MAX_SEQUENCE_BATCHES {
            return Err(MemberError::BadRequest(format!(
                "sequence has {} batches, at most {MAX_SEQUENCE_BATCHES} are accepted",
                sequence.batches.len()
            )));
        }
        let digest = sequence.hash_to_sign();

        if let Some(invalid) = sequence.batches.iter().find(|batch| !batch.is_valid()) {
            warn!(key = %invalid.key, "Refusing sequence with invalid data");
            return Err(MemberError::InvalidData(invalid.key));
        }

        let mut tx = self.store.begin_state_transaction().await?;

        let mut missing = Vec::new();
        for batch in &sequence.batches {
            if !self.store.exists(batch.key).await? {
                missing.push(batch.clone());
            }
        }
        self.store.store_offchain_data(&missing, &mut tx).await?;

        // a refused sequence drops `tx` here
        self.check_against_tracker(&sequence).await?;
        tx.commit().await?;

        let signature = sign_with_prefix(&self.secret_key, digest);
        debug!(stored = missing.len(), %digest, "Signed sequence");

        Ok(signature)
    }
}
