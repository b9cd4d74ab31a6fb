//! Crate-level error aggregation.
//!
//! Each subsystem module defines its own `thiserror` error enum (see
//! `crypto::CryptoError`, `chain::ChainError`, `ledger::LedgerError`,
//! `storage::StorageError`, `peer::PeerError`, `consensus::ConsensusError`,
//! `contract::ContractError`). [`NodeError`] aggregates them at the
//! orchestration boundary (`node`, `rpc`) so callers outside a single
//! subsystem only need to match one type.

use thiserror::Error;

use crate::chain::ChainError;
use crate::consensus::ConsensusError;
use crate::contract::ContractError;
use crate::crypto::CryptoError;
use crate::ledger::LedgerError;
use crate::peer::PeerError;
use crate::storage::StorageError;
use crate::transaction::TransactionError;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Peer(#[from] PeerError),

    #[error(transparent)]
    Consensus(#[from] ConsensusError),

    #[error(transparent)]
    Contract(#[from] ContractError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// A request arrived on the pending pool or RPC surface that was
    /// malformed in a way no subsystem enum models individually (§7:
    /// "Protocol errors").
    #[error("protocol error: {0}")]
    Protocol(String),
}

pub type NodeResult<T> = core::result::Result<T, NodeError>;
