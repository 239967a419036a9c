pub mod engine;
pub mod network;
pub mod state_machine;
pub mod storage;

pub use engine::*;
pub use network::*;
pub use state_machine::*;
pub use storage::*;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// How long a proposed entry may take to commit and apply before the caller
/// gets an answer. The underlying log append is not cancelled when this
/// fires, so a late commit after a timeout is possible.
pub const PROPOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ProposeError {
    /// This node cannot commit the entry. The caller may retry against the
    /// leader, if one is known.
    #[error("not the cluster leader (current leader: {leader:?})")]
    NotLeader { leader: Option<u64> },

    /// The deadline elapsed before the commit was observed. The entry may
    /// still land later; callers must treat this as an unknown outcome and
    /// re-read state rather than blindly retry.
    #[error("commit not observed within {0:?}")]
    Timeout(Duration),

    #[error("consensus engine error: {0}")]
    Engine(#[source] anyhow::Error),
}

/// The narrow seam between the control plane and the consensus engine:
/// propose entries and change membership. The HTTP layer is tested against a
/// fake implementation of this trait.
#[async_trait]
pub trait ConsensusEngine: Send + Sync {
    /// Submits an event to the replication pipeline and returns once it has
    /// been committed by a quorum and applied on this node.
    async fn submit(&self, event: Event) -> Result<(), ProposeError>;

    /// Adds the given peer as a full voting member. Only meaningful on a
    /// node able to coordinate the membership change.
    async fn add_voter(&self, id: u64, addr: String) -> anyhow::Result<()>;

    fn is_leader(&self) -> bool;

    fn leader_id(&self) -> Option<u64>;
}

/// Deterministic node identity derived from the advertised peer address.
/// Identity and address are the same string in the join protocol, so every
/// node computes the same id for a given peer. FNV-1a, 64 bit.
pub fn node_id_for(addr: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in addr.as_bytes() {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}
