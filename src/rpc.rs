//! The RPC surface (§6): a typed `jsonrpsee` trait whose method bodies speak
//! the documented short-string wire format internally (§9: "ad-hoc string
//! protocols" formalized as a tagged union of request/response messages,
//! while the wire format itself is unchanged). Binding an actual transport
//! to this trait is out of scope (§1); tests and the orchestrator call
//! [`ChainRpcServer`] methods directly, as the teacher's `rpc_test.rs` does
//! for `OckhamRpcImpl`.

use std::sync::Arc;

use jsonrpsee::core::RpcResult;
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::types::ErrorObjectOwned;
use serde::{Deserialize, Serialize};

use crate::block::Block;
use crate::chain::Chain;
use crate::consensus::{self, PeerRpcClient};
use crate::crypto;
use crate::node::NodeContext;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainInfo {
    #[serde(rename = "PublicKey")]
    pub public_key: String,
    #[serde(rename = "DllFingerprint")]
    pub dll_fingerprint: String,
    #[serde(rename = "ChainID")]
    pub chain_id: String,
    #[serde(rename = "BlockCount")]
    pub block_count: usize,
    #[serde(rename = "Message")]
    pub message: String,
    #[serde(rename = "FirstHash")]
    pub first_hash: String,
    #[serde(rename = "LastHash")]
    pub last_hash: String,
    #[serde(rename = "LastDate")]
    pub last_date: String,
    #[serde(rename = "NodeAddress")]
    pub node_address: String,
}

fn chain_info_of(chain: &Chain, node_address: &str, public_key: &str, message: &str) -> ChainInfo {
    ChainInfo {
        public_key: public_key.to_string(),
        dll_fingerprint: crypto::build_fingerprint(),
        chain_id: chain.chain_id.clone(),
        block_count: chain.len(),
        message: message.to_string(),
        first_hash: chain.block_at(0).map(|b| b.hash.clone()).unwrap_or_default(),
        last_hash: chain.tail().hash.clone(),
        last_date: chain.tail().timestamp.to_rfc3339(),
        node_address: node_address.to_string(),
    }
}

fn rpc_error(message: impl Into<String>) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(-32000, message.into(), None::<()>)
}

impl From<crate::error::NodeError> for ErrorObjectOwned {
    fn from(err: crate::error::NodeError) -> Self {
        rpc_error(err.to_string())
    }
}

#[rpc(server)]
pub trait ChainRpc {
    #[method(name = "get_public_key")]
    async fn get_public_key(&self) -> RpcResult<String>;

    #[method(name = "register")]
    async fn register(&self, payload: String) -> RpcResult<String>;

    #[method(name = "nodes")]
    async fn nodes(&self, payload: String) -> RpcResult<String>;

    #[method(name = "chain_info")]
    async fn chain_info(&self, payload: Option<String>) -> RpcResult<String>;

    #[method(name = "vote")]
    async fn vote(&self, payload: String) -> RpcResult<String>;

    #[method(name = "new_blocks")]
    async fn new_blocks(&self, payload: String) -> RpcResult<String>;

    #[method(name = "verify_code")]
    async fn verify_code(&self, payload: String) -> RpcResult<String>;

    #[method(name = "validate_chain")]
    async fn validate_chain(&self, payload: String) -> RpcResult<String>;

    #[method(name = "reboot_chain")]
    async fn reboot_chain(&self, payload: String) -> RpcResult<String>;

    #[method(name = "get_block")]
    async fn get_block(&self, index: u64) -> RpcResult<String>;
}

pub struct ChainRpcImpl {
    pub node: Arc<NodeContext>,
}

/// The reserved well-known chain id for which `RebootChain` is always a
/// no-op (§6), preventing an accidental production-chain wipe over RPC.
const RESERVED_CHAIN_ID: &str = "smartxchain-mainnet";

#[jsonrpsee::core::async_trait]
impl ChainRpcServer for ChainRpcImpl {
    async fn get_public_key(&self) -> RpcResult<String> {
        let info = ChainInfo {
            public_key: self.node.secure_channel.public_key_base64(),
            dll_fingerprint: crypto::build_fingerprint(),
            chain_id: self.node.config.chain_id.clone(),
            block_count: 0,
            message: String::new(),
            first_hash: String::new(),
            last_hash: String::new(),
            last_date: String::new(),
            node_address: self.node.config.node_address.clone(),
        };
        serde_json::to_string(&info).map_err(|e| rpc_error(e.to_string()))
    }

    async fn register(&self, payload: String) -> RpcResult<String> {
        let Some((addr, hmac)) = payload.split_once('|') else {
            log::warn!("malformed Register payload: {payload}");
            return Ok(String::new());
        };
        let expected = crypto::hmac_chain_id(&self.node.config.chain_id, addr);
        if expected != hmac {
            log::warn!("Register HMAC mismatch for {addr}");
            return Ok(String::new());
        }
        match self.node.peers.add(addr.to_string()) {
            Ok(()) => Ok("ok".to_string()),
            Err(e) => {
                log::warn!("failed to register peer {addr}: {e}");
                Ok(String::new())
            }
        }
    }

    async fn nodes(&self, _payload: String) -> RpcResult<String> {
        self.node.peers.sweep_expired();
        Ok(self.node.peers.addresses().join(","))
    }

    async fn chain_info(&self, _payload: Option<String>) -> RpcResult<String> {
        let chain = self.node.chain.read().expect("chain lock poisoned");
        let info = chain_info_of(
            &chain,
            &self.node.config.node_address,
            &self.node.secure_channel.public_key_base64(),
            "ok",
        );
        serde_json::to_string(&info).map_err(|e| rpc_error(e.to_string()))
    }

    async fn vote(&self, payload: String) -> RpcResult<String> {
        let Some(encoded) = payload.strip_prefix("Vote:") else {
            log::warn!("malformed Vote payload");
            return Ok(String::new());
        };
        let bytes = match base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded) {
            Ok(b) => b,
            Err(e) => {
                log::warn!("malformed Vote payload: {e}");
                return Ok(String::new());
            }
        };
        let block: Block = match serde_json::from_slice(&bytes) {
            Ok(b) => b,
            Err(e) => {
                log::warn!("malformed Vote block payload: {e}");
                return Ok(String::new());
            }
        };

        if block.is_hash_valid() {
            Ok(format!("ok#{}", self.node.config.miner_address))
        } else {
            Ok(String::new())
        }
    }

    async fn new_blocks(&self, payload: String) -> RpcResult<String> {
        let info: ChainInfo = match serde_json::from_str(&payload) {
            Ok(i) => i,
            Err(e) => {
                log::warn!("malformed NewBlocks payload: {e}");
                return serde_json::to_string(&reply_chain_info(&self.node, "Error:malformed payload"))
                    .map_err(|e| rpc_error(e.to_string()));
            }
        };

        let bytes = match base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &info.message) {
            Ok(b) => b,
            Err(e) => {
                return serde_json::to_string(&reply_chain_info(&self.node, &format!("Error:{e}")))
                    .map_err(|e| rpc_error(e.to_string()))
            }
        };
        let blocks: Vec<Block> = match serde_json::from_slice(&bytes) {
            Ok(b) => b,
            Err(e) => {
                return serde_json::to_string(&reply_chain_info(&self.node, &format!("Error:{e}")))
                    .map_err(|e| rpc_error(e.to_string()))
            }
        };

        {
            let mut chain = self.node.chain.write().expect("chain lock poisoned");
            if blocks.first().map(|b| b.is_reset_sentinel()).unwrap_or(false) {
                chain.reset();
            }
            for block in blocks {
                if block.is_reset_sentinel() {
                    continue;
                }
                if let Err(e) = chain.add_block(block, false) {
                    log::warn!("rejected incoming block: {e}");
                }
            }
        }
        self.node.rebuild_ledger().await;

        serde_json::to_string(&reply_chain_info(&self.node, "ok")).map_err(|e| rpc_error(e.to_string()))
    }

    async fn verify_code(&self, payload: String) -> RpcResult<String> {
        let Some(code) = payload.strip_prefix("VerifyCode:") else {
            log::warn!("malformed VerifyCode payload");
            return Ok(String::new());
        };
        match self.node.code_policy.is_safe(code).await {
            Ok(()) => Ok("ok".to_string()),
            Err(e) => Ok(format!("failed:{e}")),
        }
    }

    async fn validate_chain(&self, _payload: String) -> RpcResult<String> {
        let chain = self.node.chain.read().expect("chain lock poisoned");
        Ok(if chain.is_valid() { "ok".to_string() } else { "error".to_string() })
    }

    async fn reboot_chain(&self, _payload: String) -> RpcResult<String> {
        if self.node.config.chain_id == RESERVED_CHAIN_ID {
            return Ok("ok".to_string());
        }
        let mut chain = self.node.chain.write().expect("chain lock poisoned");
        chain.reset();
        drop(chain);
        self.node.rebuild_ledger().await;
        Ok("ok".to_string())
    }

    async fn get_block(&self, index: u64) -> RpcResult<String> {
        let chain = self.node.chain.read().expect("chain lock poisoned");
        let index = usize::try_from(index)
            .map_err(|_| crate::error::NodeError::Protocol("index out of range".into()))?;
        let block = chain
            .block_at(index)
            .ok_or_else(|| crate::error::NodeError::Protocol("block index out of range".into()))?;
        serde_json::to_string(block).map_err(|e| rpc_error(e.to_string()))
    }
}

fn reply_chain_info(node: &NodeContext, message: &str) -> ChainInfo {
    let chain = node.chain.read().expect("chain lock poisoned");
    chain_info_of(&chain, &node.config.node_address, &node.secure_channel.public_key_base64(), message)
}

/// A [`PeerRpcClient`] built over this trait, used by the mining loop to
/// actually ask registered peers to vote. The node only has a real one of
/// these once a transport binds [`ChainRpcServer`] to the network (§1,
/// out of scope); it is generic so a test harness can wire two in-process
/// `ChainRpcImpl`s together without any network I/O.
pub struct LoopbackRpcClient<F> {
    pub dispatch: F,
}

#[jsonrpsee::core::async_trait]
impl<F> PeerRpcClient for LoopbackRpcClient<F>
where
    F: Fn(&str) -> Option<Arc<ChainRpcImpl>> + Send + Sync,
{
    async fn vote(&self, peer_address: &str, block: &Block) -> Result<String, consensus::ConsensusError> {
        let Some(peer) = (self.dispatch)(peer_address) else {
            return Err(consensus::ConsensusError::PeerRpc(format!("unknown peer {peer_address}")));
        };
        let encoded = serde_json::to_vec(block).map_err(|e| consensus::ConsensusError::PeerRpc(e.to_string()))?;
        let payload = format!(
            "Vote:{}",
            base64::Engine::encode(&base64::engine::general_purpose::STANDARD, encoded)
        );
        peer.vote(payload)
            .await
            .map_err(|e| consensus::ConsensusError::PeerRpc(e.to_string()))
    }

    async fn verify_code(&self, peer_address: &str, code_base64: &str) -> Result<String, consensus::ConsensusError> {
        let Some(peer) = (self.dispatch)(peer_address) else {
            return Err(consensus::ConsensusError::PeerRpc(format!("unknown peer {peer_address}")));
        };
        peer.verify_code(format!("VerifyCode:{code_base64}"))
            .await
            .map_err(|e| consensus::ConsensusError::PeerRpc(e.to_string()))
    }
}
