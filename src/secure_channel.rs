//! End-to-end encrypted, authenticated request/response between nodes
//! (§4.7). Every inter-node RPC payload flows through here except
//! `GetPublicKey` itself.

use async_trait::async_trait;
use thiserror::Error;

use crate::crypto::{self, CryptoError, KeyPair, SecureEnvelope};
use crate::peer::PeerRegistry;
use crate::transaction::Address;

#[derive(Debug, Error)]
pub enum SecureChannelError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("could not reach peer to fetch its public key: {0}")]
    HandshakeFailed(String),
}

pub type SecureChannelResult<T> = Result<T, SecureChannelError>;

/// The transport-agnostic half of the handshake: fetching a peer's public
/// key via the unencrypted `GetPublicKey` call (§4.7 step 2). Actual binding
/// to HTTP/SignalR/WebRTC is out of scope (§1); the node orchestrator
/// supplies an implementation that performs the real network call.
#[async_trait]
pub trait PublicKeyFetcher: Send + Sync {
    async fn fetch_public_key(&self, peer_address: &str) -> SecureChannelResult<String>;
}

/// Owns this node's long-lived ECDH identity and drives the handshake +
/// per-message envelope encryption, caching shared keys in the peer
/// registry so repeat messages skip the handshake (§4.7).
pub struct SecureChannel {
    identity: KeyPair,
}

impl SecureChannel {
    pub fn new(identity: KeyPair) -> Self {
        Self { identity }
    }

    pub fn public_key_base64(&self) -> String {
        self.identity.public_key_base64()
    }

    /// Fetch (or reuse the cached) shared key for `peer_address`.
    pub async fn shared_key_for(
        &self,
        registry: &PeerRegistry,
        fetcher: &dyn PublicKeyFetcher,
        peer_address: &Address,
    ) -> SecureChannelResult<[u8; 32]> {
        if let Some(key) = registry.shared_key(peer_address) {
            return Ok(key);
        }

        let peer_public_key_b64 = fetcher
            .fetch_public_key(peer_address)
            .await
            .map_err(|e| SecureChannelError::HandshakeFailed(e.to_string()))?;
        let peer_public_key = crypto::parse_public_key(&peer_public_key_b64)?;
        let shared_key = crypto::ecdh_shared_key(&self.identity.signing_key, &peer_public_key);

        registry.cache_shared_key(peer_address, shared_key);
        Ok(shared_key)
    }

    /// Encrypt `plaintext` for `peer_address`, handshaking first if needed.
    pub async fn encrypt_for(
        &self,
        registry: &PeerRegistry,
        fetcher: &dyn PublicKeyFetcher,
        peer_address: &Address,
        plaintext: &str,
    ) -> SecureChannelResult<SecureEnvelope> {
        let key = self.shared_key_for(registry, fetcher, peer_address).await?;
        Ok(crypto::encrypt_envelope(&key, &self.public_key_base64(), plaintext))
    }

    /// Decrypt an inbound envelope. Derives the shared key fresh from the
    /// envelope's own `shared_key` (the sender's public key) rather than
    /// trusting the registry alone, so a first contact from an
    /// as-yet-unregistered peer still decrypts correctly.
    pub fn decrypt_from(&self, envelope: &SecureEnvelope) -> SecureChannelResult<String> {
        let sender_public_key = crypto::parse_public_key(&envelope.shared_key)?;
        let key = crypto::ecdh_shared_key(&self.identity.signing_key, &sender_public_key);
        crypto::decrypt_envelope(&key, envelope).map_err(SecureChannelError::from)
    }
}
