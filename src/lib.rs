#![doc = include_str!("../README.md")]
#![warn(missing_debug_implementations, missing_docs, rustdoc::all)]
#![deny(unused_must_use, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod common;
pub use common::{
    ClientError, Committee, CommitteeMember, MemberError, OffChainData, Sequence, SequenceBatch,
    TrackerError, MAX_SEQUENCE_BATCHES,
};

mod primitives;
pub use primitives::{bls, ErrorCode, ErrorResponse};

pub mod chain;
pub use chain::{contract::ContractChainSource, ChainError, ChainEventSource};

pub mod store;
pub use store::{DataStore, InMemoryStore, StoreError, StoreTransaction};

pub mod sync;
pub use sync::{SyncConfig, SyncError, SyncProgress, Synchronizer, L1_SYNC_TASK};

pub mod tracker;
pub use tracker::{SequenceTracker, TrackerConfig, TrackerSpec, TrackerUpdate};

mod client;
pub use client::{MemberClient, PeerClient};

pub mod member;
pub use member::{Member, MemberSpec, ServerConfig};

mod status;
pub use status::{Status, StatusEndpoints};

#[cfg(test)]
pub(crate) mod testing;
