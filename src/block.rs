//! Blocks: ordered transaction batches, hash-linked and proof-of-work mined
//! (§3, §4.1).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transaction::{Address, Transaction};

#[derive(Debug, Error)]
pub enum BlockError {
    #[error("mining was cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub timestamp: DateTime<Utc>,
    pub previous_hash: String,
    pub hash: String,
    pub nonce: i64,
    pub issuer: Address,
    pub node_address: Address,
    pub transactions: Vec<Transaction>,
    pub approves: Vec<String>,
}

/// A contract as seen through the block's derived view (§9: `derive_contracts`
/// replaces the computed-property-per-call pattern).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contract {
    pub name: String,
    pub code_base64: String,
}

impl Block {
    pub fn genesis() -> Self {
        Block {
            timestamp: Utc::now(),
            previous_hash: "0".to_string(),
            hash: String::new(),
            nonce: 0,
            issuer: String::new(),
            node_address: String::new(),
            transactions: Vec::new(),
            approves: Vec::new(),
        }
        .with_computed_hash()
    }

    pub fn new(previous_hash: String, transactions: Vec<Transaction>) -> Self {
        Block {
            timestamp: Utc::now(),
            previous_hash,
            hash: String::new(),
            nonce: 0,
            issuer: String::new(),
            node_address: String::new(),
            transactions,
            approves: Vec::new(),
        }
    }

    /// `H(concat(tx.hash) || "-" || previous_hash || "-" || nonce)` (§4.1).
    /// Transaction order is preserved byte-for-byte — no sorting here.
    pub fn compute_hash(&self) -> String {
        let mut payload = String::new();
        for tx in &self.transactions {
            payload.push_str(&tx.hash());
        }
        payload.push('-');
        payload.push_str(&self.previous_hash);
        payload.push('-');
        payload.push_str(&self.nonce.to_string());
        crate::crypto::sha256_base64(&payload)
    }

    fn with_computed_hash(mut self) -> Self {
        self.hash = self.compute_hash();
        self
    }

    /// Mine this block at `difficulty`, honoring `cancel` for the tight CPU
    /// loop at `difficulty >= 1` (§4.1, §5). Returns `Err(Cancelled)` if
    /// `cancel` flips true before a valid nonce is found.
    pub fn mine(
        &mut self,
        difficulty: u32,
        issuer: Address,
        node_address: Address,
        cancel: &AtomicBool,
    ) -> Result<(), BlockError> {
        self.issuer = issuer;
        self.node_address = node_address;

        if difficulty == 0 {
            self.hash = self.compute_hash();
            return Ok(());
        }

        let prefix: String = std::iter::repeat('0').take(difficulty as usize).collect();
        loop {
            self.hash = self.compute_hash();
            if self.hash.starts_with(&prefix) {
                return Ok(());
            }
            if cancel.load(Ordering::Relaxed) {
                return Err(BlockError::Cancelled);
            }
            self.nonce += 1;
        }
    }

    /// Does `hash` begin with `difficulty` literal `'0'` characters, and does
    /// it match what recomputing from the stored fields would produce?
    pub fn satisfies_difficulty(&self, difficulty: u32) -> bool {
        if difficulty == 0 {
            return true;
        }
        let prefix: String = std::iter::repeat('0').take(difficulty as usize).collect();
        self.hash.starts_with(&prefix)
    }

    pub fn is_hash_valid(&self) -> bool {
        self.compute_hash() == self.hash
    }

    /// `Nonce == -1` is the sentinel meaning "reset chain" (§3).
    pub fn is_reset_sentinel(&self) -> bool {
        self.nonce == -1
    }
}

/// Extract the `name -> contract` view over a block's deploy transactions
/// (§3 `smart_contracts`, §9 `derive_contracts`). Later deploys of the same
/// name within one block shadow earlier ones, matching insertion-order
/// replay semantics used elsewhere in the ledger.
pub fn derive_contracts(block: &Block) -> HashMap<String, Contract> {
    let mut contracts = HashMap::new();
    for tx in &block.transactions {
        if tx.is_contract_deploy() {
            if let Some(name) = tx.contract_name() {
                contracts.insert(
                    name.to_string(),
                    Contract {
                        name: name.to_string(),
                        code_base64: tx.data.clone(),
                    },
                );
            }
        }
    }
    contracts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gas::GasConfig;
    use crate::transaction::{TransactionBuilder, TransactionType};
    use rust_decimal::Decimal;

    fn sample_tx() -> Transaction {
        let kp = crate::crypto::KeyPair::generate();
        TransactionBuilder::new(TransactionType::NativeTransfer, "alice".into(), "bob".into())
            .amount(Decimal::ONE)
            .finalize(&GasConfig::default(), Decimal::ZERO, &kp.signing_key)
    }

    #[test]
    fn genesis_has_previous_hash_zero() {
        let genesis = Block::genesis();
        assert_eq!(genesis.previous_hash, "0");
        assert!(genesis.transactions.is_empty());
        assert!(genesis.is_hash_valid());
    }

    #[test]
    fn mining_with_zero_difficulty_is_immediate() {
        let mut block = Block::new("0".into(), vec![sample_tx()]);
        let cancel = AtomicBool::new(false);
        block
            .mine(0, "miner".into(), "node".into(), &cancel)
            .unwrap();
        assert!(block.is_hash_valid());
    }

    #[test]
    fn mining_at_difficulty_one_finds_leading_zero() {
        let mut block = Block::new("0".into(), vec![sample_tx()]);
        let cancel = AtomicBool::new(false);
        block
            .mine(1, "miner".into(), "node".into(), &cancel)
            .unwrap();
        assert!(block.satisfies_difficulty(1));
        assert!(block.is_hash_valid());
    }

    #[test]
    fn mining_honors_cancellation() {
        let mut block = Block::new("0".into(), vec![sample_tx()]);
        let cancel = AtomicBool::new(true);
        let result = block.mine(6, "miner".into(), "node".into(), &cancel);
        assert!(matches!(result, Err(BlockError::Cancelled)));
    }

    #[test]
    fn derive_contracts_finds_deploy_transactions() {
        let kp = crate::crypto::KeyPair::generate();
        let deploy = TransactionBuilder::new(
            TransactionType::ContractCode,
            "alice".into(),
            crate::transaction::SYSTEM_ADDRESS.into(),
        )
        .info("$$Counter")
        .data("Y29kZQ==")
        .finalize(&GasConfig::default(), Decimal::ZERO, &kp.signing_key);
        let block = Block::new("0".into(), vec![deploy]);
        let contracts = derive_contracts(&block);
        assert!(contracts.contains_key("Counter"));
    }
}
