use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{info, warn};

/// Pause between join attempts against an unavailable peer.
pub const JOIN_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Background loop a non-bootstrap node runs to ask an existing cluster
/// member to admit it as a voter. Retries forever with a fixed backoff:
/// until it has joined, this node can never serve consistent state, so
/// giving up is not an option. Success is terminal, so the loop needs no
/// cancellation; it reports completion over a one-shot channel.
pub struct JoinCoordinator {
    peer: String,
    advertise: String,
    backoff: Duration,
    attempts: AtomicU64,
    client: reqwest::Client,
}

impl JoinCoordinator {
    /// `peer` is the HTTP address of an existing member; `advertise` is this
    /// node's own consensus-traffic address, which doubles as its identity.
    pub fn new(peer: String, advertise: String) -> Self {
        Self::with_backoff(peer, advertise, JOIN_RETRY_INTERVAL)
    }

    pub fn with_backoff(peer: String, advertise: String, backoff: Duration) -> Self {
        Self {
            peer,
            advertise,
            backoff,
            attempts: AtomicU64::new(0),
            client: reqwest::Client::new(),
        }
    }

    /// Number of join requests issued so far.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    async fn try_join(&self) -> anyhow::Result<()> {
        let url = format!("http://{}/join", self.peer);
        let response = self
            .client
            .post(&url)
            .header("Peer-Address", self.advertise.as_str())
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("non 200 status code: {}", response.status());
        }
        Ok(())
    }

    /// Starts the retry loop on its own task, concurrent with the node's
    /// server startup. The returned receiver fires once membership has been
    /// granted.
    pub fn spawn(self: Arc<Self>) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            loop {
                self.attempts.fetch_add(1, Ordering::Relaxed);
                match self.try_join().await {
                    Ok(()) => {
                        info!(peer = %self.peer, "joined cluster");
                        let _ = tx.send(());
                        return;
                    }
                    Err(err) => {
                        warn!(error = %err, peer = %self.peer, "error joining cluster, will retry");
                        tokio::time::sleep(self.backoff).await;
                    }
                }
            }
        });
        rx
    }
}
