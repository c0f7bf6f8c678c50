use crate::context::AppContext;
use crate::protocol::{parse_admin_command, AdminCommand};
use crate::utils::{respond_error, respond_ok, respond_text};

use anyhow::{Context as _, Result};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Run the control-plane listener until `shutdown` fires.
pub async fn serve(listen: String, ctx: Arc<AppContext>, shutdown: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .with_context(|| format!("binding admin server on {listen}"))?;
    serve_on_listener(listener, ctx, shutdown).await
}

/// Like [`serve`], but on an already-bound listener (used by tests to avoid
/// port races).
pub async fn serve_on_listener(
    listener: tokio::net::TcpListener,
    ctx: Arc<AppContext>,
    shutdown: CancellationToken,
) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "Admin server listening");
    }

    loop {
        let (stream, peer) = tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!(error = %e, "Admin accept error");
                        continue;
                    }
                }
            }
            _ = shutdown.cancelled() => {
                info!("Admin server shutting down");
                break;
            }
        };

        info!(peer = %peer, "New admin connection");
        let ctx = ctx.clone();
        tokio::spawn(async move {
            handle_connection(stream, peer.to_string(), &ctx).await;
        });
    }

    Ok(())
}

/// Per-connection command loop. Every failed command leaves all throttlers
/// untouched; successes reply `OK`.
async fn handle_connection(stream: TcpStream, peer: String, ctx: &AppContext) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!(peer = %peer, "Admin client left");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(peer = %peer, error = %e, "Failed to read admin command line");
                break;
            }
        }

        let command = match parse_admin_command(&line) {
            Ok(command) => command,
            Err(e) => {
                debug!(peer = %peer, error = %e, "Rejected admin command");
                if respond_error(&mut write_half, &e).await.is_err() {
                    break;
                }
                continue;
            }
        };

        let reply = match command {
            AdminCommand::Stop => {
                let _ = respond_text(&mut write_half, "BYE!").await;
                break;
            }
            AdminCommand::Throttle { server, enable } => {
                dispatch_throttle(ctx, &server, enable)
            }
            AdminCommand::ServerLimit { server, limit } => {
                dispatch_server_limit(ctx, &server, limit)
            }
            AdminCommand::ConnectionLimit { key, limit } => {
                dispatch_connection_limit(ctx, &key, limit)
            }
        };

        let write_result = match reply {
            Ok(()) => respond_ok(&mut write_half).await,
            Err(message) => {
                warn!(peer = %peer, error = %message, "Admin command failed");
                respond_error(&mut write_half, message).await
            }
        };
        if write_result.is_err() {
            break;
        }
    }
}

fn dispatch_throttle(ctx: &AppContext, server: &str, enable: bool) -> Result<(), String> {
    let throttler = ctx
        .throttlers
        .get(server)
        .ok_or_else(|| format!("unknown server {server}"))?;
    if enable {
        throttler.enable();
    } else {
        throttler.disable();
    }
    info!(server = %server, enabled = enable, "Throttling toggled");
    Ok(())
}

fn dispatch_server_limit(ctx: &AppContext, server: &str, limit: u64) -> Result<(), String> {
    let throttler = ctx
        .throttlers
        .get(server)
        .ok_or_else(|| format!("unknown server {server}"))?;
    throttler.set_server_limit(limit);
    info!(server = %server, limit, "Server bandwidth limit set");
    Ok(())
}

/// A connection key is only meaningful to the server it is connected to, but
/// the operator does not know which one that is, so the pin is applied to
/// every configured throttler.
fn dispatch_connection_limit(ctx: &AppContext, key: &str, limit: u64) -> Result<(), String> {
    for throttler in ctx.throttlers.values() {
        throttler.set_connection_limit(limit, key);
    }
    info!(connection = %key, limit, "Connection bandwidth limit set");
    Ok(())
}
