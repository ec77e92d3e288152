use alloy::{primitives::B256, sol_types::SolCall};
use thiserror::Error;

use crate::{
    chain::{
        contract::{ElderberryValidium, EtrogValidium},
        ChainTransaction, SequenceBatchesLog,
    },
    common::SequenceBatch,
};

/// An error decoding a sequencing transaction.
#[derive(Debug, Error, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum DecodeError {
    #[error("Unknown sequencing calldata selector {0:?}")]
    UnknownSelector(Option<[u8; 4]>),
    #[error("Malformed sequencing calldata: {0}")]
    Malformed(String),
    #[error("Sequence for batch {0} contains no batches")]
    Empty(u64),
}

/// Decodes the batch sequence announced by a `SequenceBatches` log from the calldata of
/// the transaction that emitted it.
pub fn decode_sequence_batch(
    log: &SequenceBatchesLog,
    tx: &ChainTransaction,
) -> Result<SequenceBatch, DecodeError> {
    let data_hashes = decode_data_hashes(&tx.input)?;
    if data_hashes.is_empty() {
        return Err(DecodeError::Empty(log.batch_number));
    }

    Ok(SequenceBatch {
        batch_number: log.batch_number,
        data_hashes,
        sequencer: tx.from,
        l1_block: log.block_number,
        tx_hash: tx.hash,
    })
}

fn decode_data_hashes(input: &[u8]) -> Result<Vec<B256>, DecodeError> {
    let selector: Option<[u8; 4]> = input.get(..4).and_then(|s| s.try_into().ok());

    match selector {
        Some(s) if s == EtrogValidium::sequenceBatchesValidiumCall::SELECTOR => {
            let call = EtrogValidium::sequenceBatchesValidiumCall::abi_decode(input, true)
                .map_err(|e| DecodeError::Malformed(e.to_string()))?;
            Ok(call.batches.into_iter().map(|batch| batch.transactionsHash).collect())
        }
        Some(s) if s == ElderberryValidium::sequenceBatchesValidiumCall::SELECTOR => {
            let call = ElderberryValidium::sequenceBatchesValidiumCall::abi_decode(input, true)
                .map_err(|e| DecodeError::Malformed(e.to_string()))?;
            Ok(call.batches.into_iter().map(|batch| batch.transactionsHash).collect())
        }
        other => Err(DecodeError::UnknownSelector(other)),
    }
}
