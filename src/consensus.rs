//! Majority-vote block and contract consensus (§4.5).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::block::Block;
use crate::peer::PeerRegistry;
use crate::transaction::Address;

pub const DEFAULT_DECISION_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("peer rpc error: {0}")]
    PeerRpc(String),
}

/// What a peer actually said, after parsing its reply. An unreachable peer
/// or malformed reply both count as [`Vote::Abstain`] — never as a
/// rejection (§4.5, §7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Vote {
    Positive { reported_address: Address },
    Negative(String),
    Abstain,
}

/// The node orchestrator's hook for reaching a peer over the secure channel.
/// Actual transport binding is out of scope (§1); tests supply a mock.
#[async_trait]
pub trait PeerRpcClient: Send + Sync {
    async fn vote(&self, peer_address: &str, block: &Block) -> Result<String, ConsensusError>;
    async fn verify_code(&self, peer_address: &str, code_base64: &str) -> Result<String, ConsensusError>;
}

fn quorum(peer_count: usize) -> usize {
    peer_count / 2 + 1
}

/// Parse a `Vote` RPC reply (`"ok#<minerAddr>"` or `""`) into a [`Vote`]
/// (§4.5 step 2). A peer returning an address different from its own
/// registered address is still counted positive (§4.5, "ordering &
/// tie-breaks").
fn parse_vote_reply(reply: &str) -> Vote {
    match reply.strip_prefix("ok#") {
        Some(addr) => Vote::Positive {
            reported_address: addr.to_string(),
        },
        None if reply.is_empty() => Vote::Abstain,
        None => Vote::Negative(reply.to_string()),
    }
}

/// `ReachConsensus(block)` (§4.5): broadcast `Vote:<base64(block)>` to every
/// registered peer, collect replies until the deadline, and accept iff
/// positive votes reach quorum (`floor(|peers|/2) + 1`). Votes are idempotent
/// by peer address — each peer contributes at most one vote to the tally
/// (§4.5, "ordering & tie-breaks").
pub async fn reach_consensus(
    registry: &PeerRegistry,
    client: &dyn PeerRpcClient,
    block: &Block,
    timeout: Duration,
) -> bool {
    let peers = registry.addresses();
    if peers.is_empty() {
        return true;
    }

    let mut votes: HashMap<Address, Vote> = HashMap::new();
    let deadline = tokio::time::Instant::now() + timeout;

    let mut pending = peers
        .into_iter()
        .map(|peer| {
            let block = block.clone();
            async move {
                let reply = tokio::time::timeout_at(deadline, client.vote(&peer, &block)).await;
                let vote = match reply {
                    Ok(Ok(reply)) => parse_vote_reply(&reply),
                    Ok(Err(e)) => {
                        log::warn!("vote rpc to {peer} failed: {e}");
                        Vote::Abstain
                    }
                    Err(_) => Vote::Abstain,
                };
                (peer, vote)
            }
        })
        .collect::<futures::stream::FuturesUnordered<_>>();

    use futures::StreamExt;
    while let Some((peer, vote)) = pending.next().await {
        votes.insert(peer, vote);
    }

    let positive = votes
        .values()
        .filter(|v| matches!(v, Vote::Positive { .. }))
        .count();
    positive >= quorum(votes.len().max(1))
}

/// `ReachCodeConsensus(contract)` (§4.5): identical shape to block
/// consensus, but the message is `VerifyCode:<compressed-base64(code)>` and
/// each peer's reply is `"ok"` or a failure string from its local
/// [`crate::contract::CodePolicy`].
pub async fn reach_code_consensus(
    registry: &PeerRegistry,
    client: &dyn PeerRpcClient,
    code_base64: &str,
    timeout: Duration,
) -> bool {
    let peers = registry.addresses();
    if peers.is_empty() {
        return true;
    }

    let deadline = tokio::time::Instant::now() + timeout;
    let mut pending = peers
        .into_iter()
        .map(|peer| {
            let code = code_base64.to_string();
            async move {
                let reply =
                    tokio::time::timeout_at(deadline, client.verify_code(&peer, &code)).await;
                let ok = matches!(reply, Ok(Ok(ref r)) if r == "ok");
                if let Ok(Err(e)) = &reply {
                    log::warn!("verify_code rpc to {peer} failed: {e}");
                }
                ok
            }
        })
        .collect::<futures::stream::FuturesUnordered<_>>();

    use futures::StreamExt;
    let mut positive = 0usize;
    let mut total = 0usize;
    while let Some(ok) = pending.next().await {
        total += 1;
        if ok {
            positive += 1;
        }
    }
    positive >= quorum(total.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::DEFAULT_NODE_TIMEOUT_SECONDS;

    struct AllPositive;
    #[async_trait]
    impl PeerRpcClient for AllPositive {
        async fn vote(&self, _peer: &str, _block: &Block) -> Result<String, ConsensusError> {
            Ok("ok#miner".to_string())
        }
        async fn verify_code(&self, _peer: &str, _code: &str) -> Result<String, ConsensusError> {
            Ok("ok".to_string())
        }
    }

    struct AllNegative;
    #[async_trait]
    impl PeerRpcClient for AllNegative {
        async fn vote(&self, _peer: &str, _block: &Block) -> Result<String, ConsensusError> {
            Ok(String::new())
        }
        async fn verify_code(&self, _peer: &str, _code: &str) -> Result<String, ConsensusError> {
            Ok("failed:unsafe".to_string())
        }
    }

    fn registry_with(peers: &[&str]) -> PeerRegistry {
        let registry = PeerRegistry::new("https://self.example".into(), DEFAULT_NODE_TIMEOUT_SECONDS);
        for peer in peers {
            registry.add((*peer).to_string()).unwrap();
        }
        registry
    }

    #[tokio::test]
    async fn quorum_reached_with_majority_positive() {
        let registry = registry_with(&["https://a.example", "https://b.example", "https://c.example"]);
        let block = Block::genesis();
        let accepted = reach_consensus(&registry, &AllPositive, &block, Duration::from_millis(500)).await;
        assert!(accepted);
    }

    #[tokio::test]
    async fn quorum_not_reached_when_all_abstain_or_reject() {
        let registry = registry_with(&["https://a.example", "https://b.example", "https://c.example"]);
        let block = Block::genesis();
        let accepted = reach_consensus(&registry, &AllNegative, &block, Duration::from_millis(500)).await;
        assert!(!accepted);
    }

    #[tokio::test]
    async fn no_peers_means_trivially_accepted() {
        let registry = registry_with(&[]);
        let block = Block::genesis();
        let accepted = reach_consensus(&registry, &AllNegative, &block, Duration::from_millis(500)).await;
        assert!(accepted);
    }

    #[tokio::test]
    async fn code_consensus_follows_the_same_quorum_rule() {
        let registry = registry_with(&["https://a.example", "https://b.example"]);
        let accepted = reach_code_consensus(&registry, &AllPositive, "code", Duration::from_millis(500)).await;
        assert!(accepted);
        let rejected = reach_code_consensus(&registry, &AllNegative, "code", Duration::from_millis(500)).await;
        assert!(!rejected);
    }
}
