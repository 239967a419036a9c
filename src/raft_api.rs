use crate::consensus::{NodeIdType, RaftEngine, TypeConfig};
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use openraft::raft::{
    AppendEntriesRequest, InstallSnapshotRequest, InstallSnapshotResponse, VoteRequest,
};
use std::sync::Arc;

/// The peer-facing half of the consensus transport. Served on the raft bind
/// address, mirroring the endpoints [`crate::consensus::PeerClient`] dials.
pub fn create_raft_router(engine: Arc<RaftEngine>) -> Router {
    Router::new()
        .route("/raft/vote", post(handle_vote))
        .route("/raft/append", post(handle_append_entries))
        .route("/raft/snapshot", post(handle_install_snapshot))
        .with_state(engine)
}

async fn handle_vote(
    State(engine): State<Arc<RaftEngine>>,
    Json(req): Json<VoteRequest<NodeIdType>>,
) -> impl IntoResponse {
    match engine.raft().vote(req).await {
        Ok(resp) => (StatusCode::OK, Json(resp)).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn handle_append_entries(
    State(engine): State<Arc<RaftEngine>>,
    Json(req): Json<AppendEntriesRequest<TypeConfig>>,
) -> impl IntoResponse {
    match engine.raft().append_entries(req).await {
        Ok(resp) => (StatusCode::OK, Json(resp)).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn handle_install_snapshot(
    State(engine): State<Arc<RaftEngine>>,
    Json(req): Json<InstallSnapshotRequest<TypeConfig>>,
) -> impl IntoResponse {
    let resp: Result<InstallSnapshotResponse<NodeIdType>, _> =
        engine.raft().install_snapshot(req).await;
    match resp {
        Ok(resp) => (StatusCode::OK, Json(resp)).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}
