use std::{path::PathBuf, sync::Arc, time::Duration};

use alloy::{hex::encode_prefixed, primitives::Address};
use clap::{Parser, ValueEnum};
use eyre::bail;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

use dac_node::{
    bls::secret_key_from_hex, member, ContractChainSource, DataStore, InMemoryStore, Member,
    MemberClient, SequenceTracker, ServerConfig, StatusEndpoints, SyncConfig, Synchronizer,
    TrackerConfig, L1_SYNC_TASK,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StoreKind {
    Memory,
    Rocksdb,
}

#[derive(Debug, Parser)]
struct CliOpts {
    /// L1 execution client JSON-RPC URL.
    #[clap(long, env = "DAC_RPC_URL")]
    pub rpc_url: Url,
    /// Address of the validium (sequencing) contract.
    #[clap(long, env = "DAC_VALIDIUM_ADDRESS")]
    pub validium_address: Address,
    /// Address of the data committee contract.
    #[clap(long, env = "DAC_COMMITTEE_ADDRESS")]
    pub committee_address: Address,
    /// Hex encoded BLS secret key of this member.
    #[clap(long, env = "DAC_SECRET_KEY", hide_env_values = true)]
    pub secret_key: String,
    /// URL this member is registered with in the committee contract.
    #[clap(long, env = "DAC_SELF_URL")]
    pub self_url: Option<String>,
    #[clap(long, env = "DAC_PORT", default_value = "8444")]
    pub port: u16,
    #[clap(long, env = "DAC_STORE", value_enum, default_value = "memory")]
    pub store: StoreKind,
    #[clap(long, env = "DAC_DB_PATH", default_value = "dac-db")]
    pub db_path: PathBuf,
    /// First L1 block to synchronize, usually the contract deployment block.
    #[clap(long, env = "DAC_START_BLOCK", default_value = "0")]
    pub start_block: u64,
    #[clap(long, env = "DAC_MAX_BLOCK_RANGE", default_value = "1000")]
    pub max_block_range: u64,
    #[clap(long, env = "DAC_CONFIRMATIONS", default_value = "0")]
    pub confirmations: u64,
    #[clap(long, env = "DAC_REORG_DEPTH", default_value = "64")]
    pub reorg_depth: u64,
    #[clap(long, env = "DAC_POLL_INTERVAL_SECS", default_value = "5")]
    pub poll_interval_secs: u64,
    #[clap(long, env = "DAC_MAX_BACKOFF_SECS", default_value = "60")]
    pub max_backoff_secs: u64,
    /// Age after which the sequencer view is too old to sign against.
    #[clap(long, env = "DAC_MAX_STALENESS_SECS", default_value = "600")]
    pub max_staleness_secs: u64,
    #[clap(long, env = "DAC_REQUEST_TIMEOUT_SECS", default_value = "30")]
    pub request_timeout_secs: u64,
    #[clap(long, env = "DAC_PEER_TIMEOUT_SECS", default_value = "10")]
    pub peer_timeout_secs: u64,
    /// Largest accepted request body in bytes.
    #[clap(long, env = "DAC_MAX_BODY_SIZE", default_value_t = member::DEFAULT_MAX_BODY_SIZE)]
    pub max_body_size: usize,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let opts = CliOpts::parse();

    match opts.store {
        StoreKind::Memory => run(InMemoryStore::with_capacity(4096), opts).await,
        #[cfg(feature = "rocksdb")]
        StoreKind::Rocksdb => {
            let store = dac_node::store::RocksStore::open(&opts.db_path)?;
            run(store, opts).await
        }
        #[cfg(not(feature = "rocksdb"))]
        StoreKind::Rocksdb => bail!("This binary was built without the `rocksdb` feature"),
    }
}

async fn run<DS: DataStore>(store: DS, opts: CliOpts) -> eyre::Result<()> {
    let secret_key = secret_key_from_hex(&opts.secret_key)?;
    if opts.max_block_range == 0 {
        bail!("--max-block-range must be at least 1");
    }

    let chain = Arc::new(ContractChainSource::new(
        opts.rpc_url.clone(),
        opts.validium_address,
        opts.committee_address,
    ));
    let peers = Arc::new(MemberClient::with_timeout(Duration::from_secs(opts.peer_timeout_secs))?);
    let cancel = CancellationToken::new();

    let tracker = SequenceTracker::new(TrackerConfig {
        max_staleness: Duration::from_secs(opts.max_staleness_secs),
        ..Default::default()
    });
    let (updates_tx, updates) = SequenceTracker::channel(1024);

    let sync_config = SyncConfig {
        start_block: opts.start_block,
        max_block_range: opts.max_block_range,
        confirmations: opts.confirmations,
        poll_interval: Duration::from_secs(opts.poll_interval_secs),
        max_backoff: Duration::from_secs(opts.max_backoff_secs),
        reorg_depth: opts.reorg_depth,
        self_url: opts.self_url.clone(),
        ..Default::default()
    };
    let synchronizer = Synchronizer::new(store.clone(), Arc::clone(&chain), peers, sync_config)
        .with_tracker(updates_tx);

    let status =
        StatusEndpoints::new(store.clone(), synchronizer.progress(), env!("CARGO_PKG_VERSION"), L1_SYNC_TASK);
    let member = Member::new(store, Arc::new(tracker.clone()), secret_key);
    info!(public_key = %encode_prefixed(member.public_key().to_bytes()), "Starting committee member");

    let server_config = ServerConfig {
        port: opts.port,
        request_timeout: Duration::from_secs(opts.request_timeout_secs),
        max_body_size: opts.max_body_size,
    };
    let (addr, server) =
        member::serve(Arc::new(member), status, server_config, cancel.clone()).await?;
    info!(%addr, rpc_url = %opts.rpc_url, "Committee member listening");

    let tracker_task = tokio::spawn(tracker.run(chain, updates, cancel.clone()));
    let sync_task = tokio::spawn(synchronizer.run(cancel.clone()));

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");
    cancel.cancel();

    let (server, tracker_task, sync_task) = tokio::join!(server, tracker_task, sync_task);
    server?;
    tracker_task?;
    sync_task?;

    Ok(())
}
