#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Rasi payment API server.
//!
//! HTTP surface over the reconciliation core: checkout session creation,
//! processor webhook intake, payment verification and operator endpoints,
//! plus the periodic maintenance tasks.

mod allowlist;
mod error;
mod routes;
mod state;
mod tasks;

use std::net::SocketAddr;
use std::sync::Arc;

use rasi_reconciler::ReconcilerService;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::routes::create_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,rasi_api=debug,rasi_reconciler=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Rasi payment API v{}", env!("CARGO_PKG_VERSION"));

    let service = Arc::new(ReconcilerService::from_env()?);
    tracing::info!(
        test_mode = service.config.test_mode,
        validate_signature = service.config.validate_signature,
        validate_source_ip = service.config.validate_source_ip,
        "configuration loaded"
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(AppState::new(service.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let background = tasks::spawn_all(service, shutdown_rx);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install ctrl-c handler");
        }
        tracing::info!("shutdown signal received");
    })
    .await?;

    // Stop the periodic tasks and wait for the in-flight passes to finish.
    let _ = shutdown_tx.send(true);
    for handle in background {
        let _ = handle.await;
    }
    tracing::info!("shutdown complete");

    Ok(())
}
