use crate::node::ClusterNode;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

/// The client-facing control plane: value reads/writes on `/key`, cluster
/// admission on `/join`. Stateless beyond the node handle; every effect goes
/// through [`ClusterNode`].
pub fn create_router(node: Arc<ClusterNode>) -> Router {
    Router::new()
        .route("/key", get(handle_key_get).post(handle_key_post))
        .route("/join", post(handle_join))
        .fallback(handle_unknown_path)
        .with_state(node)
}

#[derive(Deserialize)]
struct SetRequest {
    #[serde(rename = "newValue")]
    new_value: i64,
}

#[derive(Serialize)]
struct ValueResponse {
    value: i64,
}

async fn handle_key_post(State(node): State<Arc<ClusterNode>>, body: Bytes) -> StatusCode {
    // Parsed by hand so a malformed body is a plain 400 with no state change.
    let request: SetRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            warn!(error = %err, "rejecting malformed set request");
            return StatusCode::BAD_REQUEST;
        }
    };

    match node.propose_set(request.new_value).await {
        Ok(()) => StatusCode::OK,
        Err(err) => {
            error!(error = %err, "set proposal failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn handle_key_get(State(node): State<Arc<ClusterNode>>) -> Json<ValueResponse> {
    Json(ValueResponse {
        value: node.current_value(),
    })
}

async fn handle_join(State(node): State<Arc<ClusterNode>>, headers: HeaderMap) -> StatusCode {
    let peer_address = match headers.get("Peer-Address").and_then(|v| v.to_str().ok()) {
        Some(addr) if !addr.is_empty() => addr.to_string(),
        _ => {
            warn!("Peer-Address not set on join request");
            return StatusCode::BAD_REQUEST;
        }
    };

    match node.add_voter(&peer_address).await {
        Ok(()) => {
            info!(peer = %peer_address, "peer joined the cluster");
            StatusCode::OK
        }
        Err(err) => {
            error!(error = %err, peer = %peer_address, "error joining peer");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

// Unknown paths are a client error here, matching the control plane's
// contract of 400 rather than 404.
async fn handle_unknown_path() -> StatusCode {
    StatusCode::BAD_REQUEST
}
