//! `hub-engine` — runtime engine server for a healthcare HL7 v2/MLLP
//! integration bus.
//!
//! Starts the [`Engine`] with a `SQLite`-backed [`TraceStore`] and serves
//! its control surface (deploy/start/stop/reload/status) over HTTP until
//! `SIGINT`, at which point every deployed production is stopped
//! gracefully before the process exits.

use std::sync::Arc;

use anyhow::Result;
use hub_engine::config::EngineConfig;
use hub_engine::engine::Engine;
use hub_engine::server;
use hub_engine::trace_store::TraceStore;
use hub_engine::trace_store::sqlite::SqliteTraceStore;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("hub_engine=info".parse()?),
        )
        .json()
        .init();

    info!("starting hub-engine");

    let config = EngineConfig::from_env()?;
    info!(
        db_path = %config.db_path.display(),
        bind_addr = %config.bind_addr,
        "configuration loaded"
    );

    let trace_store = Arc::new(SqliteTraceStore::open(&config.db_path).await?) as Arc<dyn TraceStore>;
    let engine = Arc::new(Engine::new(Arc::clone(&trace_store), config.reconcile_interval));

    let shutdown = CancellationToken::new();
    let server_shutdown = shutdown.clone();
    let router = server::create_router(Arc::clone(&engine));

    tokio::spawn(async move {
        if let Err(err) = server::serve(config.bind_addr, router, server_shutdown).await {
            tracing::error!(error = %err, "control-surface server stopped with error");
        }
    });

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_shutdown.cancel();
        }
    });

    shutdown.cancelled().await;
    info!("shutting down");
    engine.shutdown();
    Ok(())
}
