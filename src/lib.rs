pub mod api;
pub mod config;
pub mod consensus;
pub mod join;
pub mod node;
pub mod raft_api;

pub use api::create_router;
pub use config::{resolve, Config, ConfigError, ConfigErrors, RawConfig};
pub use consensus::{
    node_id_for, ConsensusEngine, Event, ProposeError, RaftEngine, SharedValue, ValueSnapshot,
};
pub use join::JoinCoordinator;
pub use node::ClusterNode;
pub use raft_api::create_raft_router;
