use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use raftcell::consensus::{ConsensusEngine, Event, ProposeError};
use raftcell::{create_router, ClusterNode, SharedValue};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

/// Commits instantly against the node's own state machine, so the control
/// plane can be tested without a raft core.
#[derive(Default)]
struct FakeEngine {
    state: SharedValue,
    fail_submit: bool,
    voters: Mutex<Vec<String>>,
    add_voter_calls: AtomicU64,
}

#[async_trait]
impl ConsensusEngine for FakeEngine {
    async fn submit(&self, event: Event) -> Result<(), ProposeError> {
        if self.fail_submit {
            return Err(ProposeError::NotLeader { leader: None });
        }
        self.state.apply(&event);
        Ok(())
    }

    async fn add_voter(&self, _id: u64, addr: String) -> anyhow::Result<()> {
        self.add_voter_calls.fetch_add(1, Ordering::SeqCst);
        self.voters.lock().unwrap().push(addr);
        Ok(())
    }

    fn is_leader(&self) -> bool {
        true
    }

    fn leader_id(&self) -> Option<u64> {
        Some(1)
    }
}

fn control_plane(fail_submit: bool) -> (Router, Arc<FakeEngine>) {
    let state = SharedValue::new();
    let engine = Arc::new(FakeEngine {
        state: state.clone(),
        fail_submit,
        ..Default::default()
    });
    let node = ClusterNode::with_engine(state, engine.clone());
    (create_router(node), engine)
}

async fn get_value(router: &Router) -> i64 {
    let response = router
        .clone()
        .oneshot(Request::builder().uri("/key").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    parsed["value"].as_i64().unwrap()
}

#[tokio::test]
async fn set_then_get_round_trip() {
    let (router, _) = control_plane(false);

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/key")
                .body(Body::from(r#"{"newValue": 42}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(get_value(&router).await, 42);
}

#[tokio::test]
async fn get_returns_zero_on_a_fresh_node() {
    let (router, _) = control_plane(false);
    assert_eq!(get_value(&router).await, 0);
}

#[tokio::test]
async fn malformed_set_body_is_rejected_without_state_change() {
    let (router, _) = control_plane(false);

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/key")
                .body(Body::from("this is not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert_eq!(get_value(&router).await, 0);
}

#[tokio::test]
async fn commit_failure_surfaces_as_500() {
    let (router, _) = control_plane(true);

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/key")
                .body(Body::from(r#"{"newValue": 1}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn join_without_peer_address_never_reaches_the_engine() {
    let (router, engine) = control_plane(false);

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/join")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(engine.add_voter_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn join_registers_the_advertised_peer_as_a_voter() {
    let (router, engine) = control_plane(false);

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/join")
                .header("Peer-Address", "10.0.0.9:7000")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        engine.voters.lock().unwrap().as_slice(),
        ["10.0.0.9:7000".to_string()]
    );
}

#[tokio::test]
async fn unknown_paths_are_a_client_error() {
    let (router, _) = control_plane(false);

    let response = router
        .oneshot(
            Request::builder()
                .uri("/not-a-thing")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unsupported_methods_on_known_paths_are_405() {
    let (router, _) = control_plane(false);

    let response = router
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}
