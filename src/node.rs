use crate::config::Config;
use crate::consensus::{
    node_id_for, ConsensusEngine, Event, ProposeError, RaftEngine, SharedValue,
};
use std::sync::Arc;
use tracing::info;

/// One participant in the cluster: owns the replicated state machine and a
/// handle to the consensus engine that feeds it committed entries.
pub struct ClusterNode {
    state: SharedValue,
    engine: Arc<dyn ConsensusEngine>,
}

impl ClusterNode {
    /// Brings up this node: creates the data directory, constructs a fresh
    /// state machine at value 0 (the stores restore a persisted snapshot if
    /// one exists) and starts the consensus engine. With `bootstrap` set the
    /// node forms a new single-member cluster; otherwise it waits to be
    /// added as a voter by an existing member.
    ///
    /// Returns the node plus the concrete engine, which the caller needs to
    /// serve the peer-facing consensus endpoints.
    pub async fn start(config: &Config) -> anyhow::Result<(Arc<Self>, Arc<RaftEngine>)> {
        std::fs::create_dir_all(&config.data_dir)?;

        let state = SharedValue::new();
        let engine = Arc::new(
            RaftEngine::new(
                config.raft_addr.to_string(),
                state.clone(),
                &config.data_dir,
            )
            .await?,
        );

        if config.bootstrap {
            engine.bootstrap().await?;
        }

        info!(raft_addr = %config.raft_addr, bootstrap = config.bootstrap, "cluster node started");

        let node = Arc::new(Self {
            state,
            engine: engine.clone(),
        });
        Ok((node, engine))
    }

    /// Wires a node to an arbitrary engine. This is how the control plane is
    /// tested without a running raft core.
    pub fn with_engine(state: SharedValue, engine: Arc<dyn ConsensusEngine>) -> Arc<Self> {
        Arc::new(Self { state, engine })
    }

    /// Reads the state machine directly, without a log round-trip. Eventually
    /// consistent with respect to the leader.
    pub fn current_value(&self) -> i64 {
        self.state.get()
    }

    /// Serializes a "set" entry into the replication pipeline. Succeeds only
    /// once the entry is committed and applied; fails with a retryable
    /// [`ProposeError::NotLeader`] on a follower and with
    /// [`ProposeError::Timeout`] if the commit deadline elapses.
    pub async fn propose_set(&self, new_value: i64) -> Result<(), ProposeError> {
        self.engine.submit(Event::Set { value: new_value }).await
    }

    /// Registers the peer as a voting member. Identity and address are the
    /// same string in the join protocol; the numeric id is derived from it.
    pub async fn add_voter(&self, peer_address: &str) -> anyhow::Result<()> {
        self.engine
            .add_voter(node_id_for(peer_address), peer_address.to_string())
            .await
    }

    pub fn is_leader(&self) -> bool {
        self.engine.is_leader()
    }
}
