//! The append-only chain: genesis, validation, block lookup, fork choice
//! (§3, §4.1).

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::block::{derive_contracts, Block};

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("previous_hash does not match the current tail")]
    PreviousHashMismatch,
    #[error("block hash does not match its recomputed hash")]
    HashMismatch,
    #[error("block does not satisfy the configured difficulty")]
    DifficultyNotMet,
    #[error("archive directory could not be read: {0}")]
    ArchiveIo(#[from] std::io::Error),
    #[error("archived block is malformed: {0}")]
    ArchiveDecode(#[from] serde_json::Error),
}

pub type ChainResult<T> = Result<T, ChainError>;

#[derive(Debug, Clone)]
pub struct Chain {
    pub chain_id: String,
    pub blocks: Vec<Block>,
    pub difficulty: u32,
}

impl Chain {
    /// A fresh chain containing only the genesis block (§8 scenario S1).
    pub fn new(chain_id: impl Into<String>, difficulty: u32) -> Self {
        Chain {
            chain_id: chain_id.into(),
            blocks: vec![Block::genesis()],
            difficulty,
        }
    }

    pub fn tail(&self) -> &Block {
        self.blocks.last().expect("chain always has at least genesis")
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn block_at(&self, index: usize) -> Option<&Block> {
        self.blocks.get(index)
    }

    pub fn block_by_hash(&self, hash: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.hash == hash)
    }

    /// `AddBlock` (§4.1). With `force`, append unconditionally. Without,
    /// require previous-hash linkage, hash recomputation, and (if
    /// `difficulty > 0`) the leading-zero prefix. Idempotent on duplicate
    /// hash: returns `Ok(false)` without appending rather than erroring.
    pub fn add_block(&mut self, block: Block, force: bool) -> ChainResult<bool> {
        if self.block_by_hash(&block.hash).is_some() {
            return Ok(false);
        }

        if !force {
            if block.previous_hash != self.tail().hash {
                return Err(ChainError::PreviousHashMismatch);
            }
            if !block.is_hash_valid() {
                return Err(ChainError::HashMismatch);
            }
            if !block.satisfies_difficulty(self.difficulty) {
                return Err(ChainError::DifficultyNotMet);
            }
        }

        self.blocks.push(block);
        Ok(true)
    }

    /// Validate the chain in memory: hash linkage, recomputed hashes, and
    /// that genesis has `previous_hash == "0"` (§4.1, invariants 1-2 of §8).
    pub fn is_valid(&self) -> bool {
        match self.blocks.first() {
            Some(genesis) if genesis.previous_hash == "0" => {}
            _ => return false,
        }
        for window in self.blocks.windows(2) {
            let (prev, cur) = (&window[0], &window[1]);
            if cur.previous_hash != prev.hash {
                return false;
            }
            if !cur.is_hash_valid() {
                return false;
            }
        }
        self.blocks.iter().all(|b| b.is_hash_valid())
    }

    /// Extend validation across archived blocks loaded from
    /// `<dir>/*.gz` in lexicographic order (§4.1 "Archive validation",
    /// §6 persistent state layout). Each archive file holds one DEFLATE
    /// + base64-wrapped JSON block; the predicate applied across the
    /// live-chain/archive boundary is the same hash-linkage check used
    /// internally.
    pub fn validate_with_archive(&self, archive_dir: &Path) -> ChainResult<bool> {
        if !self.is_valid() {
            return Ok(false);
        }
        if !archive_dir.is_dir() {
            return Ok(true);
        }

        let mut entries: Vec<_> = fs::read_dir(archive_dir)?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map(|ext| ext == "gz").unwrap_or(false))
            .collect();
        entries.sort_by_key(|e| e.file_name());

        let mut previous_hash = self.tail().hash.clone();
        for entry in entries {
            let encoded = fs::read_to_string(entry.path())?;
            let json_bytes = crate::crypto::decompress_base64(encoded.trim())
                .map_err(|_| ChainError::ArchiveIo(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "archive entry is not a valid compressed block",
                )))?;
            let block: Block = serde_json::from_slice(&json_bytes)?;
            if block.previous_hash != previous_hash || !block.is_hash_valid() {
                return Ok(false);
            }
            previous_hash = block.hash.clone();
        }
        Ok(true)
    }

    /// Fork choice (§4.1): accept an incoming chain iff it validates, is
    /// strictly longer, and the local chain has no deployed contracts
    /// (contracts are sticky state that must never be discarded by a reorg).
    pub fn should_replace_with(&self, incoming: &Chain) -> bool {
        if !incoming.is_valid() {
            return false;
        }
        if incoming.len() <= self.len() {
            return false;
        }
        !self.has_any_deployed_contract()
    }

    pub fn has_any_deployed_contract(&self) -> bool {
        self.blocks.iter().any(|b| !derive_contracts(b).is_empty())
    }

    /// Reset to a fresh genesis-only chain, used when a peer's `NewBlocks`
    /// payload carries the reset sentinel (`Nonce == -1`, §3, §6).
    pub fn reset(&mut self) {
        self.blocks = vec![Block::genesis()];
    }
}
