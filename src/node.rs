//! The node orchestrator (§4.8): owns the chain, ledger, pending pool, peer
//! registry, and consensus engine as an explicit [`NodeContext`] value
//! rather than process-wide singletons (§9, first design note).
//!
//! Lock ordering is fixed and documented at every acquisition site: **chain
//! → ledger → pending-pool** (§5, §9). No code path holds two of these
//! locks across an `.await` point.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use p256::ecdsa::VerifyingKey;
use rust_decimal::Decimal;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use crate::block::Block;
use crate::chain::Chain;
use crate::config::NodeConfig;
use crate::consensus::{self, PeerRpcClient};
use crate::contract::{CodePolicy, ContractEvaluator};
use crate::crypto::KeyPair;
use crate::error::NodeError;
use crate::gas::{self, GasConfig, RewardRole};
use crate::ledger::{Ledger, PendingPool};
use crate::peer::PeerRegistry;
use crate::secure_channel::SecureChannel;
use crate::storage::Storage;
use crate::transaction::{Address, Transaction, TransactionBuilder, TransactionType, SYSTEM_ADDRESS};

/// Explicit, threaded-through node state (§9: replaces "process-wide
/// singleton state"). Constructing one is the only way to get a working
/// node; there is no global default.
pub struct NodeContext {
    pub config: NodeConfig,
    pub chain: RwLock<Chain>,
    pub ledger: AsyncMutex<Ledger>,
    pub pool: AsyncMutex<PendingPool>,
    pub peers: PeerRegistry,
    pub gas_config: RwLock<GasConfig>,
    pub identity: KeyPair,
    pub secure_channel: SecureChannel,
    pub storage: Arc<dyn Storage>,
    pub contract_evaluator: Arc<dyn ContractEvaluator>,
    pub code_policy: Arc<dyn CodePolicy>,
    pub shutdown: CancellationToken,
    pub mining_cancel: AtomicBool,
}

impl NodeContext {
    pub fn new(
        config: NodeConfig,
        storage: Arc<dyn Storage>,
        contract_evaluator: Arc<dyn ContractEvaluator>,
        code_policy: Arc<dyn CodePolicy>,
    ) -> Self {
        let identity = KeyPair::generate();
        let peers = PeerRegistry::new(config.node_address.clone(), crate::peer::DEFAULT_NODE_TIMEOUT_SECONDS);
        let secure_channel = SecureChannel::new(KeyPair {
            signing_key: identity.signing_key.clone(),
        });

        NodeContext {
            chain: RwLock::new(Chain::new(config.chain_id.clone(), 1)),
            ledger: AsyncMutex::new(Ledger::default()),
            pool: AsyncMutex::new(PendingPool::default()),
            peers,
            gas_config: RwLock::new(GasConfig::default()),
            identity,
            secure_channel,
            storage,
            contract_evaluator,
            code_policy,
            shutdown: CancellationToken::new(),
            mining_cancel: AtomicBool::new(false),
            config,
        }
    }

    /// Rebuild the ledger from the current chain. Caller must already hold
    /// (or be willing to acquire) the chain read lock before the ledger
    /// lock, per the fixed lock order.
    pub async fn rebuild_ledger(&self) {
        let chain = self.chain.read().expect("chain lock poisoned");
        let mut ledger = self.ledger.lock().await;
        ledger.update_from_chain(&chain);
    }

    /// A crude proxy for "current network load" (§4.2): pending pool
    /// occupancy against an assumed soft capacity. `spec.md` does not name
    /// a source for this signal; this is a documented, minimal choice (see
    /// DESIGN.md) and is itself a `GasConfig`-independent policy knob.
    pub async fn network_load(&self) -> Decimal {
        const ASSUMED_CAPACITY: usize = 256;
        let pool = self.pool.lock().await;
        let ratio = pool.len() as f64 / ASSUMED_CAPACITY as f64;
        Decimal::from_f64_retain(ratio.min(1.0)).unwrap_or(Decimal::ZERO)
    }

    /// `AddTransaction(tx)` (§4.8): sign `tx` with this node's identity if
    /// it arrived unsigned, verify the signature against the sender's
    /// claimed public key, debit `tx.gas` from the sender's ledger balance,
    /// and enqueue on the pool. `tx.gas` was only *computed* at finalize
    /// time (§4.3) — charging it to the sender happens here, per §4.8.
    pub async fn add_transaction(
        &self,
        mut tx: Transaction,
        sender_public_key: &VerifyingKey,
    ) -> Result<(), NodeError> {
        if tx.signature.is_none() {
            tx.sign(&self.identity.signing_key);
        }
        tx.verify_signature(sender_public_key)?;

        let mut ledger = self.ledger.lock().await;
        *ledger.balance_entry(&tx.sender) -= tx.gas;
        self.pool.lock().await.push(tx);
        Ok(())
    }

    pub async fn get_transactions_by_address(&self, address: &Address) -> Vec<Transaction> {
        let chain = self.chain.read().expect("chain lock poisoned");
        chain
            .blocks
            .iter()
            .flat_map(|b| b.transactions.iter())
            .filter(|tx| &tx.sender == address || &tx.recipient == address)
            .cloned()
            .collect()
    }

    /// Most recent `$<name>` state-update transaction's `data`, or an empty
    /// string if the contract has never had its state updated.
    fn current_contract_state(&self, name: &str) -> String {
        let chain = self.chain.read().expect("chain lock poisoned");
        chain
            .blocks
            .iter()
            .flat_map(|b| b.transactions.iter())
            .rev()
            .find(|tx| tx.contract_name() == Some(name) && tx.is_contract_state_update())
            .map(|tx| tx.data.clone())
            .unwrap_or_default()
    }

    /// `ExecuteSmartContract(name, inputs)` (§4.8): load state, delegate to
    /// the external evaluator, and on success enqueue a state-update
    /// transaction carrying the new compressed state.
    pub async fn execute_smart_contract(
        &self,
        name: &str,
        inputs: &str,
    ) -> Result<crate::contract::ContractExecutionOutcome, crate::contract::ContractError> {
        let state = self.current_contract_state(name);
        let outcome = self.contract_evaluator.execute(name, &state, inputs).await?;

        if outcome.ok {
            let gas_config = *self.gas_config.read().expect("gas config lock poisoned");
            let network_load = self.network_load().await;
            let tx = TransactionBuilder::new(
                TransactionType::ContractState,
                self.config.miner_address.clone(),
                SYSTEM_ADDRESS.into(),
            )
            .info(format!("${name}"))
            .data(outcome.new_state_base64.clone())
            .finalize(&gas_config, network_load, &self.identity.signing_key);
            self.pool.lock().await.push(tx);
        }

        Ok(outcome)
    }

    /// One iteration of the mining loop (§4.8): snapshot+clear the pool,
    /// build and mine a block, run consensus, install on success, and queue
    /// the next cycle's reward transactions.
    pub async fn mine_once(&self, client: &dyn PeerRpcClient) -> Result<Option<Block>, NodeError> {
        let pending = {
            let mut pool = self.pool.lock().await;
            if pool.is_empty() || self.peers.is_empty() {
                return Ok(None);
            }
            pool.snapshot_and_clear()
        };

        let previous_hash = self.chain.read().expect("chain lock poisoned").tail().hash.clone();
        let difficulty = self.chain.read().expect("chain lock poisoned").difficulty;

        let mut block = Block::new(previous_hash, pending.clone());
        let issuer = self.config.miner_address.clone();
        let node_address = self.config.node_address.clone();
        let cancel_flag = &self.mining_cancel;

        let mine_result = tokio::task::block_in_place(|| block.mine(difficulty, issuer, node_address, cancel_flag));
        if mine_result.is_err() {
            // Cancelled: put everything back in original order (§7).
            self.pool.lock().await.requeue_front(pending);
            return Ok(None);
        }

        let accepted = consensus::reach_consensus(&self.peers, client, &block, consensus::DEFAULT_DECISION_TIMEOUT).await;
        if !accepted {
            log::warn!("block {} failed to reach consensus quorum", block.hash);
            self.pool.lock().await.requeue_front(pending);
            return Ok(None);
        }

        {
            let mut chain = self.chain.write().expect("chain lock poisoned");
            chain.add_block(block.clone(), false)?;
        }
        self.storage.save_block(&block)?;
        self.rebuild_ledger().await;
        self.queue_reward_transactions().await;

        Ok(Some(block))
    }

    /// Emit miner + validator reward transactions for the next mining
    /// cycle, settling founder seats first (§4.2, §4.8).
    async fn queue_reward_transactions(&self) {
        let gas_config = *self.gas_config.read().expect("gas config lock poisoned");
        let mut ledger = self.ledger.lock().await;
        let mut pool = self.pool.lock().await;

        let system_balance = ledger.balance_of(SYSTEM_ADDRESS);
        let founder_open = gas::founder_seats_remaining(&gas_config, crate::ledger::TOTAL_SUPPLY, system_balance);
        let wallet_count = ledger.participant_count();
        let network_load = Decimal::ZERO;

        for (role, address, tx_type) in [
            (RewardRole::Miner, self.config.miner_address.clone(), TransactionType::MinerReward),
            (RewardRole::Validator, self.config.node_address.clone(), TransactionType::ValidatorReward),
        ] {
            let balance_is_zero = ledger.balance_of(&address).is_zero();
            let reward = gas::settle_reward(&gas_config, founder_open, role, balance_is_zero, wallet_count);
            let tx = TransactionBuilder::new(tx_type, SYSTEM_ADDRESS.into(), address.clone())
                .amount(reward)
                .finalize(&gas_config, network_load, &self.identity.signing_key);
            pool.push(tx);
            *ledger_balance_mut(&mut ledger, SYSTEM_ADDRESS) -= reward;
            *ledger_balance_mut(&mut ledger, &address) += reward;
        }
    }
}

/// Small helper so `queue_reward_transactions` can nudge the in-memory
/// ledger the same way `Ledger::transfer` does, ahead of the next rebuild.
fn ledger_balance_mut<'a>(ledger: &'a mut Ledger, address: &str) -> &'a mut Decimal {
    ledger.balance_entry(address)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::contract::{AllowAllPolicy, EchoEvaluator};
    use crate::storage::MemStorage;

    fn test_context() -> NodeContext {
        let config = NodeConfig {
            chain_id: "test-chain".into(),
            miner_address: "miner".into(),
            node_address: "https://node.example".into(),
            ..NodeConfig::default()
        };
        NodeContext::new(config, Arc::new(MemStorage::default()), Arc::new(EchoEvaluator), Arc::new(AllowAllPolicy))
    }

    #[tokio::test]
    async fn fresh_context_has_genesis_chain() {
        let ctx = test_context();
        assert_eq!(ctx.chain.read().unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn mine_once_with_empty_pool_is_a_no_op() {
        let ctx = test_context();
        ctx.peers.add("https://peer.example".into()).unwrap();

        struct NoOpClient;
        #[async_trait::async_trait]
        impl PeerRpcClient for NoOpClient {
            async fn vote(&self, _: &str, _: &Block) -> Result<String, crate::consensus::ConsensusError> {
                Ok("ok#miner".into())
            }
            async fn verify_code(&self, _: &str, _: &str) -> Result<String, crate::consensus::ConsensusError> {
                Ok("ok".into())
            }
        }

        let result = ctx.mine_once(&NoOpClient).await.unwrap();
        assert!(result.is_none());
        assert_eq!(ctx.chain.read().unwrap().len(), 1);
    }
}
