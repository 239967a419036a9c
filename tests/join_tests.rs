use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use raftcell::JoinCoordinator;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

#[tokio::test]
async fn retries_forever_against_an_unreachable_peer() {
    // Reserve a port, then free it so nothing is listening there.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let dead_peer = listener.local_addr().unwrap().to_string();
    drop(listener);

    let coordinator = Arc::new(JoinCoordinator::with_backoff(
        dead_peer,
        "127.0.0.1:7000".to_string(),
        Duration::from_millis(20),
    ));
    let mut joined = coordinator.clone().spawn();

    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(
        coordinator.attempts() >= 3,
        "expected at least 3 attempts, saw {}",
        coordinator.attempts()
    );
    // Still trying: completion must not have fired.
    assert!(joined.try_recv().is_err());
}

struct SeedState {
    hits: AtomicU64,
    peer_header: Mutex<Option<String>>,
}

async fn flaky_join(State(seed): State<Arc<SeedState>>, headers: HeaderMap) -> StatusCode {
    let hit = seed.hits.fetch_add(1, Ordering::SeqCst) + 1;
    *seed.peer_header.lock().unwrap() = headers
        .get("Peer-Address")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    // Admission succeeds on the third ask, as if a leader finally emerged.
    if hit < 3 {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    }
}

#[tokio::test]
async fn keeps_retrying_until_the_peer_admits_it() {
    let seed = Arc::new(SeedState {
        hits: AtomicU64::new(0),
        peer_header: Mutex::new(None),
    });
    let router = Router::new()
        .route("/join", post(flaky_join))
        .with_state(seed.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let peer = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let coordinator = Arc::new(JoinCoordinator::with_backoff(
        peer,
        "127.0.0.1:7000".to_string(),
        Duration::from_millis(20),
    ));
    let joined = coordinator.clone().spawn();

    tokio::time::timeout(Duration::from_secs(5), joined)
        .await
        .expect("join loop never completed")
        .expect("join task dropped the completion channel");

    assert!(coordinator.attempts() >= 3);
    assert_eq!(
        seed.peer_header.lock().unwrap().as_deref(),
        Some("127.0.0.1:7000")
    );
}
