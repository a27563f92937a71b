//! wgr-daemon entry point.
//!
//! This file is intentionally thin: it sets up tracing, loads config, builds
//! the shared state, spawns the background tasks, wires middleware, and
//! starts the HTTP server. All route handlers live in `routes.rs`; all
//! shared state types live in `state.rs`.

use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use serde_json::json;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};
use uuid::Uuid;

use wgr_audit::{AuditTopic, AuditWriter};
use wgr_daemon::{routes, state};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Dev convenience; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let config_path = std::env::var("WGR_CONFIG").ok().map(PathBuf::from);
    let loaded = wgr_config::load(config_path.as_deref()).context("configuration load failed")?;
    let listen_addr: SocketAddr = loaded
        .config
        .listen_addr
        .parse()
        .context("listen_addr is not a valid socket address")?;

    let run_id = Uuid::new_v4();
    let audit_path = std::env::var("WGR_AUDIT_LOG")
        .unwrap_or_else(|_| "wgr-audit.jsonl".to_string());
    let mut audit =
        AuditWriter::resume(&audit_path, run_id, true).context("audit log open failed")?;
    audit.append(
        AuditTopic::Lifecycle,
        "daemon_started",
        json!({ "run_id": run_id, "config_hash": loaded.config_hash }),
    )?;

    let reconcile_interval = Duration::from_secs(loaded.config.reconcile_interval_secs);
    let expiry_interval = Duration::from_secs(loaded.config.expiry_sweep_interval_secs);

    let shared = Arc::new(state::AppState::new(loaded, audit));

    wgr_events::spawn_reward_consumer(Arc::clone(&shared.queue), Arc::clone(&shared.rewards));
    state::spawn_expiry_sweep(Arc::clone(&shared), expiry_interval);
    state::spawn_reconcile_sweep(Arc::clone(&shared), reconcile_interval);

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    info!("wgr-daemon listening on http://{}", listen_addr);
    axum::serve(tokio::net::TcpListener::bind(listen_addr).await?, app)
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
