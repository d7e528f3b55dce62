//! Skiff server entry point.
//!
//! Loads configuration from the environment, optionally sweeps orphaned
//! containers, then serves the command API over HTTP until Ctrl-C.

use skiff_server::{http, ServerConfig, SkiffServer};
use tokio::signal;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("skiff_server=info,skiff_core=info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting Skiff server");

    let config = ServerConfig::from_env();
    tracing::info!(?config, "Configuration loaded");

    // Warn-only: problems are logged, startup continues.
    config.validate_warn();

    let server = SkiffServer::new(&config)?;

    if config.reconcile_on_start {
        match server.orchestrator().sweep_orphans().await {
            Ok(report) => tracing::info!(
                removed = report.removed.len(),
                failed = report.failed.len(),
                "Startup reconciliation complete"
            ),
            Err(e) => tracing::error!(error = %e, "Startup reconciliation failed"),
        }
    }

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let http_server = server.clone();
    let http_addr = config.http_addr;
    let mut shutdown_rx = shutdown_tx.subscribe();
    let http_handle = tokio::spawn(async move {
        let shutdown = async move {
            let _ = shutdown_rx.recv().await;
        };

        if let Err(e) = http::serve(http_server, http_addr, shutdown).await {
            tracing::error!(error = %e, "HTTP server error");
        }
    });

    tracing::info!(http_addr = %config.http_addr, "Server ready");

    signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal");

    let _ = shutdown_tx.send(());
    let _ = http_handle.await;

    tracing::info!("Server shutdown complete");
    Ok(())
}
