use alloy::primitives::{Bytes, B256};
use async_trait::async_trait;
use blst::min_pk::Signature as BlsSignature;

use crate::common::{MemberError, Sequence};

/// The requests a committee member serves to its peers and to the sequencer.
#[async_trait]
pub trait MemberSpec: Send + Sync + 'static {
    /// Read the off-chain data stored under `hash`.
    async fn get_offchain_data(&self, hash: B256) -> Result<Bytes, MemberError>;

    /// Persist every batch of the sequence, then sign its digest. Nothing is persisted
    /// unless a signature is returned.
    async fn sign_sequence(&self, sequence: Sequence) -> Result<BlsSignature, MemberError>;
}
