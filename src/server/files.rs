use crate::config::types::FileServerConfig;
use crate::context::AppContext;
use crate::protocol::{parse_data_command, DataCommand};
use crate::throttle::{Throttler, WriteOutcome};
use crate::utils::{respond_error, respond_text};

use anyhow::{Context as _, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWrite, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Run one data-plane listener until `shutdown` fires.
///
/// `shutdown` stops the accept loop; `transfers` is handed to every paced
/// write so in-flight downloads can be cut separately once the drain window
/// closes.
pub async fn serve(
    server: FileServerConfig,
    throttler: Arc<Throttler>,
    ctx: Arc<AppContext>,
    shutdown: CancellationToken,
    transfers: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(&server.listen)
        .await
        .with_context(|| format!("binding file server `{}` on {}", server.name, server.listen))?;
    serve_on_listener(listener, server, throttler, ctx, shutdown, transfers).await
}

/// Like [`serve`], but on an already-bound listener (used by tests to avoid
/// port races).
pub async fn serve_on_listener(
    listener: TcpListener,
    server: FileServerConfig,
    throttler: Arc<Throttler>,
    ctx: Arc<AppContext>,
    shutdown: CancellationToken,
    transfers: CancellationToken,
) -> Result<()> {
    let base_dir = tokio::fs::canonicalize(&server.base_dir)
        .await
        .with_context(|| {
            format!(
                "server `{}` base_dir {}",
                server.name,
                server.base_dir.display()
            )
        })?;

    info!(server = %server.name, addr = %server.listen, "File server listening");

    let semaphore = Arc::new(Semaphore::new(ctx.config.limits.max_connections as usize));

    loop {
        let (stream, peer) = tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!(server = %server.name, error = %e, "Accept error");
                        continue;
                    }
                }
            }
            _ = shutdown.cancelled() => {
                info!(server = %server.name, "File server shutting down (no new connections)");
                break;
            }
        };

        let permit = match semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(server = %server.name, peer = %peer, "Connection limit reached, dropping connection");
                drop(stream);
                continue;
            }
        };

        info!(server = %server.name, peer = %peer, "New client connection");
        let throttler = throttler.clone();
        let ctx = ctx.clone();
        let base_dir = base_dir.clone();
        let transfers = transfers.clone();

        tokio::spawn(async move {
            let _permit = permit;
            ctx.active_connections.fetch_add(1, Ordering::Relaxed);
            handle_connection(stream, peer.to_string(), &base_dir, &throttler, &transfers).await;
            ctx.active_connections.fetch_sub(1, Ordering::Relaxed);
        });
    }

    Ok(())
}

/// Per-connection command loop. The remote-address string is the key the
/// throttler tracks this connection under; it is unregistered exactly once
/// when the conversation ends.
async fn handle_connection(
    stream: TcpStream,
    key: String,
    base_dir: &Path,
    throttler: &Throttler,
    transfers: &CancellationToken,
) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!(peer = %key, "Client left");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(peer = %key, error = %e, "Failed to read command line");
                break;
            }
        }

        let command = match parse_data_command(&line) {
            Ok(command) => command,
            Err(e) => {
                debug!(peer = %key, error = %e, "Rejected command");
                if respond_error(&mut write_half, &e).await.is_err() {
                    break;
                }
                continue;
            }
        };

        match command {
            DataCommand::Stop => {
                let _ = respond_text(&mut write_half, "BYE!").await;
                break;
            }
            DataCommand::File { name } => {
                match stream_file(base_dir, &name, &mut write_half, &key, throttler, transfers)
                    .await
                {
                    Ok((bytes, WriteOutcome::Completed)) => {
                        info!(peer = %key, file = %name, bytes, "File served");
                    }
                    Ok((bytes, WriteOutcome::Cancelled)) => {
                        info!(peer = %key, file = %name, bytes, "Transfer cancelled");
                        break;
                    }
                    Ok((bytes, WriteOutcome::Failed(e))) => {
                        warn!(peer = %key, file = %name, bytes, error = %e, "Transfer failed");
                        break;
                    }
                    Err(e) => {
                        warn!(peer = %key, file = %name, error = %e, "File request refused");
                        if respond_error(&mut write_half, format!("{e:#}")).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }

    throttler.unregister(&key);
}

/// Resolve `name` under the base directory and stream it through the pacer.
///
/// `Err` means the request was refused before any byte was sent (bad path,
/// unopenable file) and the connection can keep going; the `Ok` outcome
/// describes how the started transfer ended.
async fn stream_file<W: AsyncWrite + Unpin>(
    base_dir: &Path,
    name: &str,
    sink: &mut W,
    key: &str,
    throttler: &Throttler,
    cancel: &CancellationToken,
) -> Result<(u64, WriteOutcome)> {
    let path = resolve_under(base_dir, name).await?;
    let mut file = tokio::fs::File::open(&path)
        .await
        .with_context(|| format!("opening {}", path.display()))?;
    Ok(throttler.write(cancel, sink, key, &mut file).await)
}

/// Normalize `base_dir/name` and refuse anything that escapes the base
/// directory, including symlinks pointing outside it.
async fn resolve_under(base_dir: &Path, name: &str) -> Result<PathBuf> {
    let joined = base_dir.join(name.trim());
    let path = tokio::fs::canonicalize(&joined)
        .await
        .with_context(|| format!("opening {}", joined.display()))?;
    if !path.starts_with(base_dir) {
        anyhow::bail!("path escapes the served directory: {}", name.trim());
    }
    Ok(path)
}
