//! Invariant 8: with N peers, a block is accepted iff the number of
//! positive votes reaches `floor(N/2)+1` within the deadline.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use smartxchain::block::Block;
use smartxchain::consensus::{reach_consensus, ConsensusError, PeerRpcClient};
use smartxchain::peer::PeerRegistry;

/// Replies positive for the first `positive_votes` calls it serves (by
/// arrival order) and negative thereafter, letting a single client exercise
/// an arbitrary split across N peers.
struct SplitVoteClient {
    positive_votes: usize,
    served: AtomicUsize,
}

#[async_trait::async_trait]
impl PeerRpcClient for SplitVoteClient {
    async fn vote(&self, _peer: &str, _block: &Block) -> Result<String, ConsensusError> {
        let index = self.served.fetch_add(1, Ordering::SeqCst);
        if index < self.positive_votes {
            Ok("ok#some-miner".into())
        } else {
            Ok(String::new())
        }
    }

    async fn verify_code(&self, _peer: &str, _code: &str) -> Result<String, ConsensusError> {
        Ok(String::new())
    }
}

fn registry_with_peers(n: usize) -> PeerRegistry {
    let registry = PeerRegistry::new("https://self.example".into(), 120);
    for i in 0..n {
        registry.add(format!("https://peer-{i}.example")).unwrap();
    }
    registry
}

async fn consensus_with_split(n: usize, positive_votes: usize) -> bool {
    let registry = registry_with_peers(n);
    let client = SplitVoteClient {
        positive_votes,
        served: AtomicUsize::new(0),
    };
    let block = Block::genesis();
    reach_consensus(&registry, &client, &block, Duration::from_secs(1)).await
}

#[tokio::test]
async fn quorum_is_floor_n_over_two_plus_one() {
    // N=5, quorum=3.
    assert!(!consensus_with_split(5, 2).await, "2/5 must not reach quorum 3");
    assert!(consensus_with_split(5, 3).await, "3/5 must reach quorum 3");
    assert!(consensus_with_split(5, 5).await, "unanimous must reach quorum");
}

#[tokio::test]
async fn quorum_with_even_peer_count() {
    // N=4, quorum=3.
    assert!(!consensus_with_split(4, 2).await, "2/4 must not reach quorum 3");
    assert!(consensus_with_split(4, 3).await, "3/4 must reach quorum 3");
}

#[tokio::test]
async fn single_peer_requires_its_own_vote() {
    // N=1, quorum=1.
    assert!(consensus_with_split(1, 1).await);
    assert!(!consensus_with_split(1, 0).await);
}

#[tokio::test]
async fn no_peers_trivially_accepts() {
    let registry = PeerRegistry::new("https://self.example".into(), 120);
    let client = SplitVoteClient {
        positive_votes: 0,
        served: AtomicUsize::new(0),
    };
    let block = Block::genesis();
    assert!(reach_consensus(&registry, &client, &block, Duration::from_secs(1)).await);
}

struct TimeoutClient;

#[async_trait::async_trait]
impl PeerRpcClient for TimeoutClient {
    async fn vote(&self, _peer: &str, _block: &Block) -> Result<String, ConsensusError> {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok("ok#miner".into())
    }

    async fn verify_code(&self, _peer: &str, _code: &str) -> Result<String, ConsensusError> {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok("ok".into())
    }
}

#[tokio::test]
async fn a_peer_that_never_replies_in_time_counts_as_abstain_not_rejection() {
    // N=3, quorum=2. A single responsive peer can never alone reach
    // quorum once the other two time out as abstentions.
    let registry = registry_with_peers(3);
    let block = Block::genesis();
    let accepted = reach_consensus(&registry, &TimeoutClient, &block, Duration::from_millis(20)).await;
    assert!(!accepted, "an all-timeout vote must not be silently accepted");
}
