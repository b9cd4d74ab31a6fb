//! Dedicated tamper-detection coverage for the secure peer channel (§4.7,
//! §8 invariant implicit in S8): any bit flip in an authenticated envelope
//! must surface as `CryptoError::Tampered`, never as corrupted plaintext.

use smartxchain::crypto::{self, CryptoError, KeyPair};
use smartxchain::peer::PeerRegistry;
use smartxchain::secure_channel::{PublicKeyFetcher, SecureChannel, SecureChannelError, SecureChannelResult};

struct StaticFetcher(String);

#[async_trait::async_trait]
impl PublicKeyFetcher for StaticFetcher {
    async fn fetch_public_key(&self, _peer_address: &str) -> SecureChannelResult<String> {
        Ok(self.0.clone())
    }
}

/// Flip one base64 character away from the tail of the string, so a flip
/// never lands on a `=` padding character.
fn flip_a_char(s: &str) -> String {
    let mut chars: Vec<char> = s.chars().collect();
    let index = chars.len() / 2;
    chars[index] = if chars[index] == 'A' { 'B' } else { 'A' };
    chars.into_iter().collect()
}

#[test]
fn tampered_ciphertext_is_rejected_at_the_crypto_layer() {
    let key = [7u8; 32];
    let mut envelope = crypto::encrypt_envelope(&key, "sender-pk", "classified payload");
    envelope.encrypted_message = flip_a_char(&envelope.encrypted_message);

    let result = crypto::decrypt_envelope(&key, &envelope);
    assert!(matches!(result, Err(CryptoError::Tampered)));
}

#[test]
fn tampered_hmac_is_rejected_at_the_crypto_layer() {
    let key = [9u8; 32];
    let mut envelope = crypto::encrypt_envelope(&key, "sender-pk", "classified payload");
    envelope.hmac = flip_a_char(&envelope.hmac);

    let result = crypto::decrypt_envelope(&key, &envelope);
    assert!(matches!(result, Err(CryptoError::Tampered)));
}

#[test]
fn untampered_envelope_round_trips() {
    let key = [3u8; 32];
    let envelope = crypto::encrypt_envelope(&key, "sender-pk", "classified payload");
    let plaintext = crypto::decrypt_envelope(&key, &envelope).unwrap();
    assert_eq!(plaintext, "classified payload");
}

#[tokio::test]
async fn tampered_envelope_through_the_node_secure_channel_never_yields_plaintext() {
    let alice = SecureChannel::new(KeyPair::generate());
    let bob = SecureChannel::new(KeyPair::generate());

    let registry = PeerRegistry::new("https://alice.example".into(), 120);
    registry.add("https://bob.example".into()).unwrap();
    let fetcher = StaticFetcher(bob.public_key_base64());

    let mut envelope = alice
        .encrypt_for(&registry, &fetcher, &"https://bob.example".to_string(), "mission critical")
        .await
        .unwrap();
    envelope.encrypted_message = flip_a_char(&envelope.encrypted_message);

    let result = bob.decrypt_from(&envelope);
    assert!(matches!(result, Err(SecureChannelError::Crypto(CryptoError::Tampered))));
}
