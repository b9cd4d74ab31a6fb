//! Persistent storage: a per-chain SQLite database indexing blocks and
//! transactions (§4.1, §6), plus an in-memory implementation for tests.
//!
//! Errors never abort the process (§7, "Storage errors"): `save` returns
//! `Ok(false)` and `get` returns `Ok(None)` on I/O failure, leaving retry
//! policy to the caller, exactly as `spec.md` prescribes — the one
//! exception is opening the database file itself, which is a startup-time
//! fatal error (§7, "Fatal").

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection};
use thiserror::Error;

use crate::block::{derive_contracts, Block};
use crate::transaction::Address;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("block not found")]
    NotFound,
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Storage is a trait so the node can run against an in-memory fixture in
/// tests and against SQLite in production, matching the teacher's
/// `Storage`/`MemStorage`/`RocksStorage` split.
pub trait Storage: Send + Sync {
    fn save_block(&self, block: &Block) -> StorageResult<bool>;
    fn get_block_by_hash(&self, hash: &str) -> StorageResult<Option<Block>>;

    /// Find contract code whose name matches `name_pattern` (a SQL `LIKE`
    /// pattern against the block's JSON-encoded `smart_contracts` column,
    /// §4.1).
    fn find_contract_code(&self, name_pattern: &str) -> StorageResult<Vec<(String, String)>>;

    /// Contract names beginning with `prefix`.
    fn contract_names_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// All transactions touching `address`, as either sender or recipient.
    fn transactions_for_address(
        &self,
        address: &Address,
    ) -> StorageResult<Vec<crate::transaction::Transaction>>;
}

/// The literal schema of §4.1: `Blocks(hash PK, previous_hash, timestamp,
/// nonce, smart_contracts_json, transactions_json, base64_encoded)` and
/// `Transactions(id, block_hash FK, sender, recipient, amount, timestamp,
/// data)`.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn init_schema(conn: &Connection) -> StorageResult<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS Blocks (
                hash TEXT PRIMARY KEY,
                previous_hash TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                nonce INTEGER NOT NULL,
                smart_contracts_json TEXT NOT NULL,
                transactions_json TEXT NOT NULL,
                base64_encoded TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS Transactions (
                id TEXT NOT NULL,
                block_hash TEXT NOT NULL REFERENCES Blocks(hash),
                sender TEXT NOT NULL,
                recipient TEXT NOT NULL,
                amount TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                data TEXT NOT NULL
            );",
        )?;
        Ok(())
    }
}

impl Storage for SqliteStorage {
    fn save_block(&self, block: &Block) -> StorageResult<bool> {
        let conn = self.conn.lock().expect("sqlite connection mutex poisoned");
        let transactions_json = serde_json::to_string(&block.transactions)?;
        let contracts = derive_contracts(block);
        let contracts_json = serde_json::to_string(
            &contracts
                .values()
                .map(|c| (c.name.clone(), c.code_base64.clone()))
                .collect::<HashMap<_, _>>(),
        )?;
        let base64_encoded = crate::crypto::compress_base64(transactions_json.as_bytes());

        let result = conn.execute(
            "INSERT OR IGNORE INTO Blocks
                (hash, previous_hash, timestamp, nonce, smart_contracts_json, transactions_json, base64_encoded)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                block.hash,
                block.previous_hash,
                block.timestamp.to_rfc3339(),
                block.nonce,
                contracts_json,
                transactions_json,
                base64_encoded,
            ],
        );

        let inserted = match result {
            Ok(rows) => rows > 0,
            Err(e) => {
                log::warn!("failed to persist block {}: {e}", block.hash);
                return Ok(false);
            }
        };

        if inserted {
            for tx in &block.transactions {
                let _ = conn.execute(
                    "INSERT INTO Transactions (id, block_hash, sender, recipient, amount, timestamp, data)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        tx.id.to_string(),
                        block.hash,
                        tx.sender,
                        tx.recipient,
                        tx.amount.to_string(),
                        tx.timestamp.to_rfc3339(),
                        tx.data,
                    ],
                );
            }
        }

        Ok(inserted)
    }

    fn get_block_by_hash(&self, hash: &str) -> StorageResult<Option<Block>> {
        let conn = self.conn.lock().expect("sqlite connection mutex poisoned");
        let result = conn.query_row(
            "SELECT previous_hash, timestamp, nonce, transactions_json FROM Blocks WHERE hash = ?1",
            params![hash],
            |row| {
                let previous_hash: String = row.get(0)?;
                let timestamp: String = row.get(1)?;
                let nonce: i64 = row.get(2)?;
                let transactions_json: String = row.get(3)?;
                Ok((previous_hash, timestamp, nonce, transactions_json))
            },
        );

        match result {
            Ok((previous_hash, timestamp, nonce, transactions_json)) => {
                let transactions = serde_json::from_str(&transactions_json)?;
                Ok(Some(Block {
                    timestamp: timestamp.parse().unwrap_or_else(|_| chrono::Utc::now()),
                    previous_hash,
                    hash: hash.to_string(),
                    nonce,
                    issuer: String::new(),
                    node_address: String::new(),
                    transactions,
                    approves: Vec::new(),
                }))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => {
                log::warn!("failed to read block {hash}: {e}");
                Ok(None)
            }
        }
    }

    fn find_contract_code(&self, name_pattern: &str) -> StorageResult<Vec<(String, String)>> {
        let conn = self.conn.lock().expect("sqlite connection mutex poisoned");
        let mut stmt =
            conn.prepare("SELECT smart_contracts_json FROM Blocks WHERE smart_contracts_json LIKE ?1")?;
        let pattern = format!("%{name_pattern}%");
        let rows = stmt.query_map(params![pattern], |row| row.get::<_, String>(0))?;

        let mut found = Vec::new();
        for row in rows {
            let json = row?;
            let map: HashMap<String, String> = serde_json::from_str(&json)?;
            found.extend(map.into_iter());
        }
        Ok(found)
    }

    fn contract_names_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let all = self.find_contract_code("")?;
        Ok(all
            .into_iter()
            .map(|(name, _)| name)
            .filter(|name| name.starts_with(prefix))
            .collect())
    }

    fn transactions_for_address(
        &self,
        address: &Address,
    ) -> StorageResult<Vec<crate::transaction::Transaction>> {
        let conn = self.conn.lock().expect("sqlite connection mutex poisoned");
        let mut stmt =
            conn.prepare("SELECT block_hash FROM Transactions WHERE sender = ?1 OR recipient = ?1")?;
        let block_hashes: Vec<String> = stmt
            .query_map(params![address], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);
        drop(conn);

        let mut result = Vec::new();
        for hash in block_hashes {
            if let Some(block) = self.get_block_by_hash(&hash)? {
                result.extend(
                    block
                        .transactions
                        .into_iter()
                        .filter(|tx| &tx.sender == address || &tx.recipient == address),
                );
            }
        }
        Ok(result)
    }
}

/// In-memory storage used by unit and scenario tests.
#[derive(Default)]
pub struct MemStorage {
    blocks: Mutex<HashMap<String, Block>>,
}

impl Storage for MemStorage {
    fn save_block(&self, block: &Block) -> StorageResult<bool> {
        let mut blocks = self.blocks.lock().expect("mem storage mutex poisoned");
        if blocks.contains_key(&block.hash) {
            return Ok(false);
        }
        blocks.insert(block.hash.clone(), block.clone());
        Ok(true)
    }

    fn get_block_by_hash(&self, hash: &str) -> StorageResult<Option<Block>> {
        Ok(self
            .blocks
            .lock()
            .expect("mem storage mutex poisoned")
            .get(hash)
            .cloned())
    }

    fn find_contract_code(&self, name_pattern: &str) -> StorageResult<Vec<(String, String)>> {
        let blocks = self.blocks.lock().expect("mem storage mutex poisoned");
        let mut found = Vec::new();
        for block in blocks.values() {
            for contract in derive_contracts(block).into_values() {
                if name_pattern.is_empty() || contract.name.contains(name_pattern) {
                    found.push((contract.name, contract.code_base64));
                }
            }
        }
        Ok(found)
    }

    fn contract_names_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .find_contract_code("")?
            .into_iter()
            .map(|(name, _)| name)
            .filter(|name| name.starts_with(prefix))
            .collect())
    }

    fn transactions_for_address(
        &self,
        address: &Address,
    ) -> StorageResult<Vec<crate::transaction::Transaction>> {
        let blocks = self.blocks.lock().expect("mem storage mutex poisoned");
        Ok(blocks
            .values()
            .flat_map(|b| b.transactions.clone())
            .filter(|tx| &tx.sender == address || &tx.recipient == address)
            .collect())
    }
}
