//! Server command: HTTP listener plus the embedded worker and relay tick.

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::http::router::build_router;
use crate::state::AppState;
use crate::worker::{run_relay_tick, run_worker};

pub async fn run(state: AppState, host: &str, port: u16) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();

    let worker_id = format!("worker-{}", Uuid::now_v7());
    let worker = tokio::spawn(run_worker(state.clone(), worker_id, shutdown.clone()));
    let relay = tokio::spawn(run_relay_tick(state.clone(), shutdown.clone()));

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(format!("{host}:{port}")).await?;
    tracing::info!(host, port, "sagaflow listening");

    let signal_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            signal_token.cancel();
        })
        .await?;

    shutdown.cancel();
    let _ = worker.await;
    let _ = relay.await;
    Ok(())
}
