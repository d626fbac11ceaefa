//! Advisor bridge server
//!
//! Relays chat turns from the UI to the registered AG-UI agents and streams
//! their events back as newline-delimited JSON.
//!
//! ```bash
//! advisor-bridge --config bridge.toml
//! curl http://localhost:3000/readiness
//! ```

use anyhow::{Context, Result};
use bridge_adapter::AgUiAdapter;
use bridge_core::{AgentAdapter, BridgeConfig};
use bridge_runtime::{Runtime, RuntimeRegistry};
use bridge_server::create_router;
use bridge_session::{InMemorySessionService, SessionService, spawn_idle_sweeper};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
#[command(name = "advisor-bridge", version, about)]
struct Args {
    /// Configuration file; bridge.toml is searched upwards from the working directory otherwise
    #[arg(short, long, env = "BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Override server.host
    #[arg(long)]
    host: Option<String>,

    /// Override server.port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => BridgeConfig::load_from(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => BridgeConfig::load().context("Failed to load configuration")?,
    };
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    bridge_telemetry::init_telemetry(&config.observability);

    let connect_timeout = config.timeouts.connect();
    let registry = RuntimeRegistry::from_registrations(
        &config.agent_registrations()?,
        |registration| -> bridge_core::Result<Arc<dyn AgentAdapter>> {
            Ok(Arc::new(AgUiAdapter::new(
                registration.endpoint.clone(),
                connect_timeout,
            )?))
        },
    )
    .context("Failed to build agent registry")?;
    for name in registry.names() {
        tracing::info!(agent = %name, "Agent registered");
    }

    let sessions: Arc<dyn SessionService> = Arc::new(InMemorySessionService::new());
    let runtime = Runtime::builder()
        .registry(registry)
        .session_service(sessions.clone())
        .config(&config)
        .build()
        .context("Failed to create runtime")?;

    let shutdown = CancellationToken::new();
    let sweeper = spawn_idle_sweeper(
        sessions,
        config.session.idle_timeout(),
        config.session.sweep_interval(),
        shutdown.clone(),
    );

    let app = create_router(Arc::new(runtime), &config.server.base_path);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(
        addr = %listener.local_addr()?,
        base_path = %config.server.base_path,
        "Bridge listening"
    );

    let stop = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutting down");
            stop.cancel();
        })
        .await
        .context("Server failed")?;

    shutdown.cancel();
    sweeper.await.context("Session sweeper panicked")?;
    Ok(())
}
