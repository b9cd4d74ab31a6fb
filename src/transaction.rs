//! Transactions: the immutable, signed unit of ledger mutation (§3, §4.3).

use chrono::{DateTime, Utc};
use p256::ecdsa::{SigningKey, VerifyingKey};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::crypto;

pub type Address = String;

pub const SYSTEM_ADDRESS: &str = "SYSTEM";
pub const UNKNOWN_ADDRESS: &str = "UNKNOWN";

/// Canonical-string protocol version, mixed into the signed payload
/// alongside (but distinct from) the build fingerprint appended by
/// [`crypto::sign`].
const CANONICAL_VERSION: &str = "1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionType {
    NativeTransfer,
    MinerReward,
    ValidatorReward,
    ContractCode,
    ContractState,
    Gas,
    Data,
    Server,
    GasConfiguration,
    Founder,
    Export,
    Import,
    NotDefined,
}

impl TransactionType {
    /// The `name` field of the canonical string — stable across Rust's
    /// `Debug` formatting so a future field reorder can't silently change
    /// what gets signed.
    fn canonical_name(&self) -> &'static str {
        match self {
            TransactionType::NativeTransfer => "NativeTransfer",
            TransactionType::MinerReward => "MinerReward",
            TransactionType::ValidatorReward => "ValidatorReward",
            TransactionType::ContractCode => "ContractCode",
            TransactionType::ContractState => "ContractState",
            TransactionType::Gas => "Gas",
            TransactionType::Data => "Data",
            TransactionType::Server => "Server",
            TransactionType::GasConfiguration => "GasConfiguration",
            TransactionType::Founder => "Founder",
            TransactionType::Export => "Export",
            TransactionType::Import => "Import",
            TransactionType::NotDefined => "NotDefined",
        }
    }
}

#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("transaction is unsigned")]
    Unsigned,
    #[error("signature does not verify")]
    BadSignature,
    #[error("build fingerprint mismatch")]
    FingerprintMismatch,
    #[error("sender balance insufficient for transfer")]
    InsufficientBalance,
    #[error("transaction id already seen (replay)")]
    Replay,
}

impl From<crypto::CryptoError> for TransactionError {
    fn from(err: crypto::CryptoError) -> Self {
        match err {
            crypto::CryptoError::FingerprintMismatch => TransactionError::FingerprintMismatch,
            _ => TransactionError::BadSignature,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub tx_type: TransactionType,
    pub sender: Address,
    pub recipient: Address,
    pub amount: Decimal,
    pub timestamp: DateTime<Utc>,
    pub info: String,
    pub data: String,
    pub gas: Decimal,
    pub signature: Option<String>,
}

impl Transaction {
    /// The string that gets hashed and signed. Field order and separators
    /// are load-bearing — every peer must derive the same bytes.
    pub fn canonical_string(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{}|{}",
            self.tx_type.canonical_name(),
            self.id,
            self.sender,
            self.recipient,
            self.data,
            self.info,
            self.amount,
            CANONICAL_VERSION
        )
    }

    /// Lowercase hex SHA-256 of the canonical string (§4.3).
    pub fn hash(&self) -> String {
        crypto::sha256_hex(&self.canonical_string())
    }

    pub fn is_contract_deploy(&self) -> bool {
        self.info.starts_with("$$") && self.recipient == SYSTEM_ADDRESS
    }

    pub fn is_contract_state_update(&self) -> bool {
        self.info.starts_with('$') && !self.info.starts_with("$$")
    }

    /// The contract name embedded in a deploy (`$$Name`) or state-update
    /// (`$Name`) transaction's `info` field, if any.
    pub fn contract_name(&self) -> Option<&str> {
        if self.is_contract_deploy() {
            self.info.strip_prefix("$$")
        } else if self.is_contract_state_update() {
            self.info.strip_prefix('$')
        } else {
            None
        }
    }

    pub fn verify_signature(&self, public_key: &VerifyingKey) -> Result<(), TransactionError> {
        let sig = self.signature.as_deref().ok_or(TransactionError::Unsigned)?;
        crypto::verify(public_key, &self.canonical_string(), sig)?;
        Ok(())
    }

    /// Sign over the canonical string with `signing_key`, overwriting any
    /// existing signature (§4.8 `AddTransaction`'s "sign if unsigned" step).
    pub fn sign(&mut self, signing_key: &SigningKey) {
        self.signature = Some(crypto::sign(signing_key, &self.canonical_string()));
    }
}

/// Accumulates transaction fields and finalizes gas + signature in one step
/// (§9: "event-style mutation" replaced by builder finalization — there is
/// no setter on `Transaction` that triggers a hidden gas recompute).
pub struct TransactionBuilder {
    tx_type: TransactionType,
    sender: Address,
    recipient: Address,
    amount: Decimal,
    info: String,
    data: String,
}

impl TransactionBuilder {
    pub fn new(tx_type: TransactionType, sender: Address, recipient: Address) -> Self {
        Self {
            tx_type,
            sender,
            recipient,
            amount: Decimal::ZERO,
            info: String::new(),
            data: String::new(),
        }
    }

    pub fn amount(mut self, amount: Decimal) -> Self {
        self.amount = amount;
        self
    }

    pub fn info(mut self, info: impl Into<String>) -> Self {
        self.info = info.into();
        self
    }

    pub fn data(mut self, data: impl Into<String>) -> Self {
        self.data = data.into();
        self
    }

    /// Compute gas against `config`/`network_load`, sign with `signing_key`,
    /// and produce the finished, immutable [`Transaction`].
    pub fn finalize(
        self,
        config: &crate::gas::GasConfig,
        network_load: Decimal,
        signing_key: &SigningKey,
    ) -> Transaction {
        let is_system = self.sender == SYSTEM_ADDRESS;
        let gas = crate::gas::transaction_gas(
            config,
            is_system,
            self.sender.len(),
            self.data.len(),
            self.info.len(),
            network_load,
        );
        let mut tx = Transaction {
            id: Uuid::new_v4(),
            tx_type: self.tx_type,
            sender: self.sender,
            recipient: self.recipient,
            amount: self.amount,
            timestamp: Utc::now(),
            info: self.info,
            data: self.data,
            gas,
            signature: None,
        };
        let sig = crypto::sign(signing_key, &tx.canonical_string());
        tx.signature = Some(sig);
        tx
    }
}
