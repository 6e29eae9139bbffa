//! `receiver` binary entry point.
//!
//! Startup sequence:
//! 1. Load and validate [`Config`] from environment variables.
//! 2. Initialise telemetry.
//! 3. Load TLS material and bind the [`Listener`].
//! 4. Wire Ctrl-C / SIGTERM to the listener's shutdown handle.
//! 5. Serve until shutdown completes.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use receiver::config::Config;
use receiver::server::{Listener, LoggingProcessor, ShutdownHandle};
use receiver::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg = Config::from_env().map_err(|e| {
        // Telemetry is not yet up; write to stderr directly.
        eprintln!("ERROR: configuration invalid: {e:#}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init_telemetry(&cfg.log_level, cfg.otel_exporter_otlp_endpoint.as_deref())?;
    info!(version = env!("CARGO_PKG_VERSION"), "receiver starting");

    // -----------------------------------------------------------------------
    // 3. Listener
    // -----------------------------------------------------------------------
    let server_config = cfg
        .server_config()
        .context("failed to load TLS material")?;
    let listener = Listener::start(server_config).await?;
    info!(addr = %listener.local_addr(), "listening");

    // -----------------------------------------------------------------------
    // 4. Shutdown trigger
    // -----------------------------------------------------------------------
    tokio::spawn(shutdown_on_signal(listener.shutdown_handle()));

    // -----------------------------------------------------------------------
    // 5. Serve
    // -----------------------------------------------------------------------
    listener.run(Arc::new(LoggingProcessor)).await;

    info!("receiver stopped");
    telemetry::shutdown_telemetry();
    Ok(())
}

async fn shutdown_on_signal(handle: ShutdownHandle) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
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

    info!("shutdown requested");
    handle.trigger();
}
