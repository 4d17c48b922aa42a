//! Server bootstrap, grounded on `rcommerce-api::server::run_http_server`.
//! Its TLS/Let's Encrypt/ACME machinery is dropped since this spec has no
//! TLS surface of its own; a reverse proxy terminates TLS in front of this
//! service, same as recommended for the HTTPS server loop it is grounded on.

use std::net::SocketAddr;

use filestage_core::engine::Engine;
use filestage_core::{Config, Result};
use tracing::info;

use crate::state::AppState;

/// Runs the HTTP server until it receives a shutdown signal (Ctrl+C or
/// SIGTERM), then drains the engine for `server.graceful_shutdown_timeout_secs`.
pub async fn run(config: Config) -> Result<()> {
    let addr = SocketAddr::from((
        config
            .server
            .host
            .parse::<std::net::IpAddr>()
            .map_err(|e| filestage_core::Error::Config(format!("Invalid host: {}", e)))?,
        config.server.port,
    ));

    let store = Engine::build_store(&config).await;
    let engine = Engine::start(&config, store.clone());
    let app_state = AppState::new(engine.service.clone(), store);

    let app = crate::routes::create_router(app_state);

    info!("filestage API listening on http://{}", addr);
    log_routes();

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| filestage_core::Error::Network(e.to_string()))?;

    let grace = std::time::Duration::from_secs(config.server.graceful_shutdown_timeout_secs);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| filestage_core::Error::Network(e.to_string()))?;

    info!("draining in-flight jobs (grace period {:?})", grace);
    engine.shutdown(grace).await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}

fn log_routes() {
    info!("Available routes:");
    info!("  GET  /health                       - Health check");
    info!("  POST /v1/download/initiate         - Initiate a download job");
    info!("  GET  /v1/download/status/:jobId    - Poll job status");
    info!("  GET  /v1/download/:jobId           - Resolve (redirect or ?format=json)");
}
