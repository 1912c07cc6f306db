//! WebSocket gateway server.
//!
//! One listener serves the `/ws` upgrade endpoint plus a plain HTTP
//! `GET /health` liveness document on the same port, so clients can check
//! the daemon without a WebSocket library.

pub mod protocol;
pub mod session;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{debug, error, info, warn};

use crate::AppContext;

/// Binds the listener and serves connections until a shutdown signal.
///
/// Returns an error (and a non-zero exit) if the port cannot be bound. On
/// SIGINT/SIGTERM every language server is shut down before returning.
pub async fn run(ctx: Arc<AppContext>) -> Result<()> {
    let addr = format!("0.0.0.0:{}", ctx.config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to listen on {addr}"))?;
    info!(addr = %addr, "gateway listening (WebSocket on /ws, HTTP health on same port)");

    let shutdown = make_shutdown_future();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                info!("shutdown signal received, stopping language servers");
                ctx.registry.shutdown_all().await;
                break;
            }

            conn = listener.accept() => {
                let (stream, peer) = match conn {
                    Ok(c) => c,
                    Err(e) => {
                        error!(err = %e, "accept error");
                        continue;
                    }
                };
                debug!(peer = %peer, "new connection");
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, ctx).await {
                        warn!(peer = %peer, err = %e, "connection error");
                    }
                });
            }
        }
    }

    info!("gateway stopped");
    Ok(())
}

/// Resolves when a shutdown signal is received: SIGTERM or Ctrl-C on Unix,
/// Ctrl-C elsewhere.
async fn make_shutdown_future() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(err = %e, "failed to register SIGTERM handler");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}

async fn handle_connection(stream: TcpStream, ctx: Arc<AppContext>) -> Result<()> {
    // Peek at the first bytes to pick off plain HTTP health checks before
    // the WebSocket handshake consumes the stream.
    let mut peek_buf = [0u8; 12];
    let n = stream.peek(&mut peek_buf).await.unwrap_or(0);
    if n >= 11 && &peek_buf[..11] == b"GET /health" {
        return handle_health_check(stream, &ctx).await;
    }

    let ws = accept_hdr_async(stream, |req: &Request, resp: Response| {
        if req.uri().path() == "/ws" {
            Ok(resp)
        } else {
            let mut not_found =
                ErrorResponse::new(Some("WebSocket endpoint is /ws".to_string()));
            *not_found.status_mut() = StatusCode::NOT_FOUND;
            Err(not_found)
        }
    })
    .await
    .context("websocket handshake failed")?;

    session::run(ws, ctx).await;
    Ok(())
}

/// Answers `GET /health` with a one-shot JSON status document.
async fn handle_health_check(mut stream: TcpStream, ctx: &AppContext) -> Result<()> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    // Consume the request; any GET /health is fine.
    let mut req_buf = vec![0u8; 2048];
    let _ = stream.read(&mut req_buf).await;

    let body = serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime": ctx.started_at.elapsed().as_secs(),
        "languages": ctx.registry.languages().await,
    });
    let body_str = body.to_string();
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body_str.len(),
        body_str
    );
    stream.write_all(response.as_bytes()).await?;
    Ok(())
}
