//! Chunked upload server
//!
//! Standalone binary wrapping the ingest endpoint for local testing and
//! demonstration; the library crate (`chunkcore`) is the thing meant to be
//! embedded into a larger upload framework.

use anyhow::Context;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chunkcore::auth::AllowAll;
use chunkcore::chunk::{Backend, ChunkWriter};
use chunkcore::config::Config;
use chunkcore::ingest;
use chunkcore::session::InMemorySessionStore;
use chunkcore::state::AppState;
use chunkcore::sweeper;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        tracing::error!("server exited with error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chunkcore=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config = Config::from_env();
    tracing::info!("Starting chunked upload server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        uploads_dir = %config.uploads_dir.display(),
        max_chunk_kb = config.max_chunk_kb,
        "chunked upload configuration loaded"
    );

    let session_store: Arc<dyn chunkcore::session::SessionStore> =
        Arc::new(InMemorySessionStore::new());
    let chunk_writer = ChunkWriter::new(config.uploads_dir.clone(), Backend::Local);

    let sweeper_handle = sweeper::spawn(
        Arc::clone(&session_store),
        chunk_writer.clone(),
        std::time::Duration::from_secs(600),
    );

    let port = config.port;
    let state = AppState::new(config, session_store, chunk_writer, Arc::new(AllowAll));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health_check))
        .merge(ingest::router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("chunked upload server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server loop failed")?;

    sweeper_handle.abort();
    tracing::info!("server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let signal = tokio::select! {
        _ = ctrl_c => "ctrl_c",
        _ = terminate => "sigterm",
    };

    tracing::info!(signal, "starting graceful shutdown");
}
