pub mod admin;
pub mod files;

use crate::config::types::AppConfig;
use crate::context::AppContext;
use crate::throttle::Throttler;

use anyhow::Result;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Main server orchestrator.
///
/// Builds one throttler per configured file server, wires both planes to the
/// shared context, and supervises until a shutdown signal arrives. Shutdown
/// stops the listeners first, lets in-flight downloads drain up to the
/// configured timeout, then cancels whatever is still running.
pub async fn run(config: AppConfig) -> Result<()> {
    let config = Arc::new(config);

    let mut throttlers = HashMap::new();
    for server in &config.servers {
        throttlers.insert(
            server.name.clone(),
            Arc::new(Throttler::new(
                server.throttle.total_limit,
                server.throttle.enabled,
            )),
        );
    }
    let ctx = Arc::new(AppContext::new(config.clone(), throttlers));

    let shutdown = CancellationToken::new();
    let transfers = CancellationToken::new();

    for server in config.servers.clone() {
        let throttler = ctx.throttlers[&server.name].clone();
        let name = server.name.clone();
        let ctx = ctx.clone();
        let shutdown = shutdown.clone();
        let transfers = transfers.clone();
        tokio::spawn(async move {
            if let Err(e) = files::serve(server, throttler, ctx, shutdown, transfers).await {
                error!(server = %name, error = %e, "File server error");
            }
        });
    }

    {
        let listen = config.admin.listen.clone();
        let ctx = ctx.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = admin::serve(listen, ctx, shutdown).await {
                error!(error = %e, "Admin server error");
            }
        });
    }

    tokio::spawn(handle_signals(shutdown.clone()));

    shutdown.cancelled().await;

    let timeout = config.limits.shutdown_timeout;
    info!(timeout, "Initiating graceful shutdown");
    let drain_deadline =
        tokio::time::Instant::now() + Duration::from_secs(timeout);
    loop {
        let active = ctx.active_connections.load(Ordering::Relaxed);
        if active == 0 {
            info!("All connections drained");
            break;
        }
        if tokio::time::Instant::now() >= drain_deadline {
            warn!(active_connections = active, "Shutdown timeout reached, cancelling transfers");
            transfers.cancel();
            break;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    info!(
        uptime_secs = ctx.start_time.elapsed().as_secs(),
        "Graceful shutdown complete"
    );
    Ok(())
}

#[cfg(unix)]
async fn handle_signals(shutdown: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "Failed to install SIGTERM handler");
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {
            info!("SIGTERM received, initiating graceful shutdown");
        }
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => info!("Ctrl-C received, initiating graceful shutdown"),
                Err(e) => error!(error = %e, "Failed to listen for Ctrl-C"),
            }
        }
    }
    shutdown.cancel();
}

#[cfg(not(unix))]
async fn handle_signals(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C");
        return;
    }
    info!("Ctrl-C received, initiating graceful shutdown");
    shutdown.cancel();
}
