//! Peer registry and liveness tracking (§3, §4.6).

use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use thiserror::Error;
use url::Url;

use crate::transaction::Address;

pub const DEFAULT_NODE_TIMEOUT_SECONDS: u64 = 120;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("peer address is not a well-formed absolute URL: {0}")]
    MalformedAddress(String),
}

#[derive(Debug, Clone)]
pub struct PeerEntry {
    pub address: Address,
    pub last_seen: SystemTime,
    pub shared_key: Option<[u8; 32]>,
}

/// Known node addresses with last-seen timestamps. Backed by a concurrent
/// map (§5, "Peer registry — concurrent map; key operations are
/// single-writer idempotent"). The shared-key cache lives alongside it so a
/// membership change can invalidate cached keys atomically.
pub struct PeerRegistry {
    self_address: Address,
    timeout: Duration,
    entries: DashMap<Address, PeerEntry>,
}

impl PeerRegistry {
    pub fn new(self_address: Address, timeout_seconds: u64) -> Self {
        Self {
            self_address,
            timeout: Duration::from_secs(timeout_seconds),
            entries: DashMap::new(),
        }
    }

    /// Validate that `address` parses as an absolute URL-like string before
    /// registering it (§4.6: "A well-formed discovered peer address must
    /// parse as an absolute URL-like string").
    pub fn validate_address(address: &str) -> Result<(), PeerError> {
        Url::parse(address)
            .map(|_| ())
            .map_err(|e| PeerError::MalformedAddress(e.to_string()))
    }

    /// `Add(addr)` (§4.6). Self-address is never inserted. Invalidates the
    /// cached shared key so the next message to this peer re-handshakes.
    pub fn add(&self, address: Address) -> Result<(), PeerError> {
        if address == self.self_address {
            return Ok(());
        }
        Self::validate_address(&address)?;
        self.entries
            .entry(address.clone())
            .and_modify(|entry| {
                entry.last_seen = SystemTime::now();
                entry.shared_key = None;
            })
            .or_insert_with(|| PeerEntry {
                address,
                last_seen: SystemTime::now(),
                shared_key: None,
            });
        Ok(())
    }

    pub fn remove(&self, address: &str) {
        self.entries.remove(address);
    }

    /// `Touch(addr)`: updates last-seen without disturbing the cached key.
    pub fn touch(&self, address: &str) {
        if let Some(mut entry) = self.entries.get_mut(address) {
            entry.last_seen = SystemTime::now();
        }
    }

    pub fn cache_shared_key(&self, address: &str, key: [u8; 32]) {
        if let Some(mut entry) = self.entries.get_mut(address) {
            entry.shared_key = Some(key);
        }
    }

    pub fn shared_key(&self, address: &str) -> Option<[u8; 32]> {
        self.entries.get(address).and_then(|e| e.shared_key)
    }

    /// Periodic sweep removing entries older than the configured timeout.
    pub fn sweep_expired(&self) {
        let now = SystemTime::now();
        self.entries.retain(|_, entry| {
            now.duration_since(entry.last_seen)
                .map(|age| age < self.timeout)
                .unwrap_or(true)
        });
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_address_is_never_inserted() {
        let registry = PeerRegistry::new("https://self.example".into(), DEFAULT_NODE_TIMEOUT_SECONDS);
        registry.add("https://self.example".into()).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn malformed_address_is_rejected() {
        let registry = PeerRegistry::new("https://self.example".into(), DEFAULT_NODE_TIMEOUT_SECONDS);
        assert!(registry.add("not-a-url".into()).is_err());
    }

    #[test]
    fn re_adding_a_peer_invalidates_cached_key() {
        let registry = PeerRegistry::new("https://self.example".into(), DEFAULT_NODE_TIMEOUT_SECONDS);
        registry.add("https://peer.example".into()).unwrap();
        registry.cache_shared_key("https://peer.example", [1u8; 32]);
        assert!(registry.shared_key("https://peer.example").is_some());
        registry.add("https://peer.example".into()).unwrap();
        assert!(registry.shared_key("https://peer.example").is_none());
    }

    #[test]
    fn sweep_removes_stale_entries() {
        let registry = PeerRegistry::new("https://self.example".into(), 0);
        registry.add("https://peer.example".into()).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        registry.sweep_expired();
        assert!(registry.is_empty());
    }
}
