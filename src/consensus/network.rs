use crate::consensus::storage::{Member, NodeIdType, TypeConfig};
use openraft::error::{InstallSnapshotError, NetworkError, RPCError, RaftError};
use openraft::network::{RPCOption, RaftNetwork, RaftNetworkFactory};
use openraft::raft::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse,
    VoteRequest, VoteResponse,
};

/// Hands out per-peer RPC clients. Peer addresses come from the membership
/// records the engine passes in, so there is no separate address registry.
#[derive(Clone, Default)]
pub struct PeerNetworkFactory {
    client: reqwest::Client,
}

impl PeerNetworkFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RaftNetworkFactory<TypeConfig> for PeerNetworkFactory {
    type Network = PeerClient;

    async fn new_client(&mut self, _target: NodeIdType, node: &Member) -> Self::Network {
        PeerClient {
            target_addr: node.addr.clone(),
            client: self.client.clone(),
        }
    }
}

/// JSON-over-HTTP client for one peer's consensus endpoints.
pub struct PeerClient {
    target_addr: String,
    client: reqwest::Client,
}

impl PeerClient {
    async fn send_rpc<Req, Resp, E>(
        &self,
        path: &str,
        req: &Req,
    ) -> Result<Resp, RPCError<NodeIdType, Member, RaftError<NodeIdType, E>>>
    where
        Req: serde::Serialize,
        Resp: serde::de::DeserializeOwned,
        E: std::error::Error,
    {
        let url = format!("http://{}/raft/{}", self.target_addr, path);

        let response = self
            .client
            .post(&url)
            .json(req)
            .send()
            .await
            .map_err(|e| RPCError::Network(NetworkError::new(&e)))?;

        if !response.status().is_success() {
            return Err(RPCError::Network(NetworkError::new(&std::io::Error::other(
                format!("HTTP error: {}", response.status()),
            ))));
        }

        response
            .json()
            .await
            .map_err(|e| RPCError::Network(NetworkError::new(&e)))
    }
}

impl RaftNetwork<TypeConfig> for PeerClient {
    async fn append_entries(
        &mut self,
        req: AppendEntriesRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<AppendEntriesResponse<NodeIdType>, RPCError<NodeIdType, Member, RaftError<NodeIdType>>>
    {
        self.send_rpc("append", &req).await
    }

    async fn install_snapshot(
        &mut self,
        req: InstallSnapshotRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<
        InstallSnapshotResponse<NodeIdType>,
        RPCError<NodeIdType, Member, RaftError<NodeIdType, InstallSnapshotError>>,
    > {
        self.send_rpc("snapshot", &req).await
    }

    async fn vote(
        &mut self,
        req: VoteRequest<NodeIdType>,
        _option: RPCOption,
    ) -> Result<VoteResponse<NodeIdType>, RPCError<NodeIdType, Member, RaftError<NodeIdType>>> {
        self.send_rpc("vote", &req).await
    }
}
