use anyhow::Result;
use clap::Parser;
use raftcell::{create_raft_router, create_router, resolve, ClusterNode, JoinCoordinator, RawConfig};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let raw = RawConfig::parse();
    let config = match resolve(&raw) {
        Ok(config) => config,
        Err(errors) => {
            eprintln!("Configuration errors - {errors}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "raftcell=info,openraft=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let (node, engine) = ClusterNode::start(&config).await?;

    // Peer-facing consensus endpoints live on the raft bind address.
    let raft_listener = TcpListener::bind(config.raft_addr).await?;
    info!(address = %config.raft_addr, "consensus transport listening");
    let raft_router = create_raft_router(engine);
    tokio::spawn(async move {
        if let Err(err) = axum::serve(raft_listener, raft_router).await {
            error!(error = %err, "consensus transport server error");
        }
    });

    // A joining node dials a member while its own servers come up; the two
    // proceed concurrently.
    if !config.bootstrap {
        if let Some(peer) = &config.join_address {
            let coordinator = Arc::new(JoinCoordinator::new(
                peer.clone(),
                config.raft_addr.to_string(),
            ));
            let joined = coordinator.spawn();
            tokio::spawn(async move {
                if joined.await.is_ok() {
                    info!("cluster membership granted");
                }
            });
        }
    }

    let listener = TcpListener::bind(config.http_addr).await?;
    info!(address = %config.http_addr, "control plane listening");
    axum::serve(listener, create_router(node)).await?;

    Ok(())
}
