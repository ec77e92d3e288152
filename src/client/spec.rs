use alloy::primitives::{Bytes, B256};
use async_trait::async_trait;
use blst::min_pk::Signature as BlsSignature;

use crate::common::{ClientError, Sequence};

/// Requests other committee members (and the trusted sequencer) can serve.
#[async_trait]
pub trait PeerClient: Send + Sync + 'static {
    /// Fetch the off-chain data stored under `hash` by the peer at `url`. The returned
    /// value is guaranteed to hash to `hash`.
    async fn get_offchain_data(&self, url: &str, hash: B256) -> Result<Bytes, ClientError>;

    /// Ask the member at `url` to store and sign the given sequence.
    async fn sign_sequence(
        &self,
        url: &str,
        sequence: &Sequence,
    ) -> Result<BlsSignature, ClientError>;
}
