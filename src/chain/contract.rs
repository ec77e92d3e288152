//! [`ChainEventSource`](super::ChainEventSource) over an alloy provider and the validium contracts.

use std::ops::RangeInclusive;

use alloy::{
    eips::BlockNumberOrTag,
    primitives::{Address, B256, U256},
    providers::{Provider, ProviderBuilder, RootProvider},
    rpc::types::{Filter, Log},
    sol,
    sol_types::SolEvent,
    transports::http::Http,
};
use async_trait::async_trait;
use reqwest::Client;
use tracing::trace;
use url::Url;

use super::{Block, ChainError, ChainEventSource, ChainTransaction, Header, SequenceBatchesLog};
use crate::common::{Committee, CommitteeMember};

use DataCommittee::DataCommitteeInstance;
use PolygonValidium::PolygonValidiumInstance;

/// A [`ChainEventSource`] backed by an L1 JSON-RPC endpoint and the validium and data
/// committee contracts.
#[derive(Debug, Clone)]
pub struct ContractChainSource {
    provider: RootProvider<Http<Client>>,
    validium: PolygonValidiumInstance<Http<Client>, RootProvider<Http<Client>>>,
    committee: DataCommitteeInstance<Http<Client>, RootProvider<Http<Client>>>,
}

impl ContractChainSource {
    /// Creates a new `ContractChainSource` with the given execution client URL and the
    /// addresses of the validium (sequencing) and data committee contracts.
    pub fn new<U: Into<Url>>(
        execution_client_url: U,
        validium_address: Address,
        committee_address: Address,
    ) -> Self {
        let provider = ProviderBuilder::new().on_http(execution_client_url.into());
        let validium = PolygonValidium::new(validium_address, provider.clone());
        let committee = DataCommittee::new(committee_address, provider.clone());

        Self { provider, validium, committee }
    }

    async fn committee_member(&self, index: u64) -> Result<CommitteeMember, ChainError> {
        let member = self.committee.members(U256::from(index)).call().await.map_err(contract)?;
        Ok(CommitteeMember { url: member.url, address: member.addr })
    }
}

#[async_trait]
impl ChainEventSource for ContractChainSource {
    async fn block_by_number(&self, number: u64) -> Result<Block, ChainError> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(number), false)
            .await
            .map_err(transport)?
            .ok_or_else(|| ChainError::NotFound(format!("block {number}")))?;

        Ok(Block {
            header: Header {
                number: required(block.header.number, "block number")?,
                hash: required(block.header.hash, "block hash")?,
                parent_hash: block.header.parent_hash,
            },
            transaction_count: block.transactions.len(),
        })
    }

    async fn header_by_number(&self, number: Option<u64>) -> Result<Header, ChainError> {
        let tag = number.map_or(BlockNumberOrTag::Latest, BlockNumberOrTag::Number);
        let block = self
            .provider
            .get_block_by_number(tag, false)
            .await
            .map_err(transport)?
            .ok_or_else(|| ChainError::NotFound(format!("header {tag}")))?;

        Ok(Header {
            number: required(block.header.number, "block number")?,
            hash: required(block.header.hash, "block hash")?,
            parent_hash: block.header.parent_hash,
        })
    }

    async fn get_transaction(&self, hash: B256) -> Result<(ChainTransaction, bool), ChainError> {
        let tx = self
            .provider
            .get_transaction_by_hash(hash)
            .await
            .map_err(transport)?
            .ok_or_else(|| ChainError::NotFound(format!("transaction {hash}")))?;

        let is_pending = tx.block_number.is_none();
        let tx = ChainTransaction {
            hash: tx.hash,
            from: tx.from,
            input: tx.input,
            block_number: tx.block_number,
        };

        Ok((tx, is_pending))
    }

    async fn filter_sequence_batch_events(
        &self,
        blocks: RangeInclusive<u64>,
    ) -> Result<Vec<SequenceBatchesLog>, ChainError> {
        let filter = Filter::new()
            .address(*self.validium.address())
            .event_signature(vec![
                PolygonValidium::SequenceBatches::SIGNATURE_HASH,
                CdkValidium::SequenceBatches::SIGNATURE_HASH,
            ])
            .from_block(*blocks.start())
            .to_block(*blocks.end());

        let logs = self.provider.get_logs(&filter).await.map_err(transport)?;
        trace!(from = blocks.start(), to = blocks.end(), count = logs.len(), "Fetched logs");

        logs.into_iter()
            .map(|log| {
                Ok(SequenceBatchesLog {
                    batch_number: decode_batch_number(&log)?,
                    block_number: required(log.block_number, "log block number")?,
                    block_hash: required(log.block_hash, "log block hash")?,
                    tx_hash: required(log.transaction_hash, "log transaction hash")?,
                })
            })
            .collect()
    }

    async fn get_current_committee(&self) -> Result<Committee, ChainError> {
        let count = self.committee.getAmountOfMembers().call().await.map_err(contract)?._0;
        let required_signatures =
            self.committee.requiredAmountOfSignatures().call().await.map_err(contract)?._0;

        let mut members = Vec::new();
        for index in 0..to_u64(count)? {
            members.push(self.committee_member(index).await?);
        }

        Ok(Committee { members, required_signatures: to_u64(required_signatures)? })
    }

    async fn trusted_sequencer_address(&self) -> Result<Address, ChainError> {
        Ok(self.validium.trustedSequencer().call().await.map_err(contract)?._0)
    }

    async fn trusted_sequencer_url(&self) -> Result<String, ChainError> {
        Ok(self.validium.trustedSequencerURL().call().await.map_err(contract)?._0)
    }
}

/// Reads `numBatch` from either version of the `SequenceBatches` event.
fn decode_batch_number(log: &Log) -> Result<u64, ChainError> {
    let decoded = if log.topics().first() == Some(&CdkValidium::SequenceBatches::SIGNATURE_HASH) {
        log.log_decode::<CdkValidium::SequenceBatches>().map(|log| log.inner.data.numBatch)
    } else {
        log.log_decode::<PolygonValidium::SequenceBatches>().map(|log| log.inner.data.numBatch)
    };

    decoded.map_err(|e| ChainError::Contract(format!("undecodable log: {e}")))
}

fn transport(err: alloy::transports::TransportError) -> ChainError {
    ChainError::Transport(err.to_string())
}

fn contract(err: alloy::contract::Error) -> ChainError {
    ChainError::Contract(err.to_string())
}

/// Unwraps a field the node returns optionally for pending objects.
fn required<T>(value: impl Into<Option<T>>, field: &str) -> Result<T, ChainError> {
    value.into().ok_or_else(|| ChainError::NotFound(format!("missing {field}")))
}

fn to_u64(value: U256) -> Result<u64, ChainError> {
    u64::try_from(value).map_err(|_| ChainError::Contract(format!("value {value} overflows u64")))
}

sol! {
    #[sol(rpc)]
    interface PolygonValidium {
        event SequenceBatches(uint64 indexed numBatch, bytes32 l1InfoRoot);

        function trustedSequencer() external view returns (address);
        function trustedSequencerURL() external view returns (string);
    }

    #[sol(rpc)]
    interface DataCommittee {
        function getAmountOfMembers() external view returns (uint256);
        function members(uint256 index) external view returns (string url, address addr);
        function requiredAmountOfSignatures() external view returns (uint256);
    }
}

sol! {
    /// Pre-etrog validium, whose event carries no L1 info root.
    interface CdkValidium {
        event SequenceBatches(uint64 indexed numBatch);
    }
}

// one invocation per interface, a shared one makes the two functions overloads
sol! {
    /// Sequencing calldata of the etrog validium contracts.
    interface EtrogValidium {
        struct ValidiumBatchData {
            bytes32 transactionsHash;
            bytes32 forcedGlobalExitRoot;
            uint64 forcedTimestamp;
            bytes32 forcedBlockHashL1;
        }

        function sequenceBatchesValidium(
            ValidiumBatchData[] calldata batches,
            address l2Coinbase,
            bytes calldata dataAvailabilityMessage
        ) external;
    }
}

sol! {
    /// Sequencing calldata of the elderberry validium contracts.
    interface ElderberryValidium {
        struct ValidiumBatchData {
            bytes32 transactionsHash;
            bytes32 forcedGlobalExitRoot;
            uint64 forcedTimestamp;
            bytes32 forcedBlockHashL1;
        }

        function sequenceBatchesValidium(
            ValidiumBatchData[] calldata batches,
            uint64 maxSequenceTimestamp,
            uint64 initSequencedBatch,
            address l2Coinbase,
            bytes calldata dataAvailabilityMessage
        ) external;
    }
}
