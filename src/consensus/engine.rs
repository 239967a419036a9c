use crate::consensus::network::PeerNetworkFactory;
use crate::consensus::state_machine::SharedValue;
use crate::consensus::storage::{create_storage, Member, NodeIdType, TypeConfig};
use crate::consensus::{node_id_for, ConsensusEngine, Event, ProposeError, PROPOSE_TIMEOUT};
use anyhow::anyhow;
use async_trait::async_trait;
use openraft::error::{ClientWriteError, RaftError};
use openraft::{ChangeMembers, Config, Raft};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub type CellRaft = Raft<TypeConfig>;

/// The one concrete consensus engine: openraft wired to sled-backed stores
/// and an HTTP peer transport. Everything behind [`ConsensusEngine`] so the
/// control plane can be exercised against a fake.
pub struct RaftEngine {
    node_id: NodeIdType,
    addr: String,
    raft: CellRaft,
}

impl RaftEngine {
    /// Builds and starts the raft core for this node. `addr` is the address
    /// peers dial for consensus traffic; the durable log, stable metadata
    /// and snapshots live under `data_dir`.
    pub async fn new<P: AsRef<Path>>(
        addr: String,
        state: SharedValue,
        data_dir: P,
    ) -> anyhow::Result<Self> {
        let config = Config {
            heartbeat_interval: 500,
            election_timeout_min: 1500,
            election_timeout_max: 3000,
            ..Default::default()
        };
        let config = Arc::new(config.validate()?);

        let storage_path = data_dir.as_ref().join("raft");
        std::fs::create_dir_all(&storage_path)?;
        let (log_store, sm_store) = create_storage(&storage_path, state)?;
        let network = PeerNetworkFactory::new();

        let node_id = node_id_for(&addr);
        let raft = Raft::new(node_id, config, network, log_store, sm_store).await?;

        info!(node_id, %addr, "consensus engine started");

        Ok(Self {
            node_id,
            addr,
            raft,
        })
    }

    /// Forms a brand-new single-member cluster with this node as the sole
    /// voter. Peers join later through the membership API.
    pub async fn bootstrap(&self) -> anyhow::Result<()> {
        let mut members = BTreeMap::new();
        members.insert(
            self.node_id,
            Member {
                addr: self.addr.clone(),
            },
        );
        self.raft.initialize(members).await?;
        info!(node_id = self.node_id, "bootstrapped as sole voting member");
        Ok(())
    }

    pub fn raft(&self) -> &CellRaft {
        &self.raft
    }

    pub fn node_id(&self) -> NodeIdType {
        self.node_id
    }
}

#[async_trait]
impl ConsensusEngine for RaftEngine {
    async fn submit(&self, event: Event) -> Result<(), ProposeError> {
        match tokio::time::timeout(PROPOSE_TIMEOUT, self.raft.client_write(event)).await {
            // Deadline elapsed; the append is not cancelled, so the entry
            // may still commit later.
            Err(_) => Err(ProposeError::Timeout(PROPOSE_TIMEOUT)),
            Ok(Ok(_)) => Ok(()),
            Ok(Err(RaftError::APIError(ClientWriteError::ForwardToLeader(forward)))) => {
                Err(ProposeError::NotLeader {
                    leader: forward.leader_id,
                })
            }
            Ok(Err(err)) => Err(ProposeError::Engine(anyhow!(err))),
        }
    }

    async fn add_voter(&self, id: NodeIdType, addr: String) -> anyhow::Result<()> {
        let node = Member { addr };

        // Admit as a learner first so the new node catches up on the log,
        // then promote it to a voter.
        self.raft.add_learner(id, node, true).await?;
        self.raft
            .change_membership(ChangeMembers::AddVoterIds(BTreeSet::from([id])), false)
            .await?;

        Ok(())
    }

    fn is_leader(&self) -> bool {
        self.raft.metrics().borrow().current_leader == Some(self.node_id)
    }

    fn leader_id(&self) -> Option<NodeIdType> {
        self.raft.metrics().borrow().current_leader
    }
}
