//! Operator entry point: loads configuration, opens storage, and starts the
//! mining loop. The HTTP/SignalR/WebRTC transport that would bind
//! [`smartxchain::rpc::ChainRpcServer`] to the network is out of scope
//! (§1) — this binary is the minimal local operator CLI named in SPEC_FULL.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use smartxchain::config::NodeConfig;
use smartxchain::consensus::PeerRpcClient;
use smartxchain::contract::{AllowAllPolicy, EchoEvaluator};
use smartxchain::node::NodeContext;
use smartxchain::storage::SqliteStorage;

#[derive(Debug, Parser)]
#[command(name = "smartxchain", about = "SmartXChain permissioned blockchain node")]
struct Cli {
    /// Path to a recognized TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run a single mining cycle and exit, instead of looping forever.
    #[arg(long)]
    once: bool,
}

struct NoPeersClient;

#[async_trait::async_trait]
impl PeerRpcClient for NoPeersClient {
    async fn vote(
        &self,
        _peer: &str,
        _block: &smartxchain::block::Block,
    ) -> Result<String, smartxchain::consensus::ConsensusError> {
        Ok(String::new())
    }

    async fn verify_code(
        &self,
        _peer: &str,
        _code: &str,
    ) -> Result<String, smartxchain::consensus::ConsensusError> {
        Ok(String::new())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => NodeConfig::from_file(path)?,
        None => NodeConfig::default(),
    };
    log::info!("starting smartxchain node, chain_id={}", config.chain_id);

    std::fs::create_dir_all(&config.blockchain_path)?;
    let storage = Arc::new(SqliteStorage::open(&config.database_path())?);

    let node = Arc::new(NodeContext::new(
        config,
        storage,
        Arc::new(EchoEvaluator),
        Arc::new(AllowAllPolicy),
    ));

    // A real deployment wires a transport-backed PeerRpcClient here; absent
    // one, the mining loop simply never reaches quorum with zero peers.
    let client = NoPeersClient;

    if cli.once {
        node.mine_once(&client).await?;
        return Ok(());
    }

    let shutdown = node.shutdown.clone();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                log::info!("shutdown requested, stopping mining loop");
                break;
            }
            result = node.mine_once(&client) => {
                if let Err(e) = result {
                    log::error!("mining cycle failed: {e}");
                }
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            }
        }
    }

    Ok(())
}
