pub mod api;
pub mod config;
pub mod error;
pub mod server;

use anyhow::Context;
use codebox_sandbox::{DockerRuntime, RuntimeClient, SandboxProvisioner};
use codebox_terminal::{SessionRegistry, TerminalBridge};
use config::Config;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub use api::{create_router, AppState};

/// Wire the provisioner and terminal bridge to a runtime
pub fn build_state(runtime: Arc<dyn RuntimeClient>, config: &Config) -> AppState {
    let provisioner = Arc::new(SandboxProvisioner::new(
        runtime.clone(),
        config.sandbox.clone(),
    ));
    let bridge = TerminalBridge::new(
        runtime,
        Arc::new(SessionRegistry::new()),
        config.bridge_settings(),
    );
    AppState::new(provisioner, bridge)
}

pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let runtime = DockerRuntime::new().context("connecting to the container runtime")?;
    let runtime: Arc<dyn RuntimeClient> = Arc::new(runtime);

    if let Err(e) = runtime.ping().await {
        warn!("Container runtime is not responding yet: {}", e);
    }

    let state = build_state(runtime, &config);
    let registry = state.bridge.registry();
    let app = create_router(state, &config.client_url);

    let address = config.bind_address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("binding to {}", address))?;

    info!("Codebox server listening on {}", address);
    info!("CORS origin: {}", config.client_url);

    server::serve(listener, app, shutdown_signal(registry)).await;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal(registry: Arc<SessionRegistry>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!(
        "Shutdown signal received, closing {} terminal session(s)",
        registry.len()
    );
    registry.terminate_all();
}

#[cfg(test)]
mod tests;
