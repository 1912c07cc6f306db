//! Per-connection session: inbound dispatch, outbound writer, and the
//! notification forwarder.

use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::{tungstenite::Message, WebSocketStream};
use tracing::{debug, warn};

use crate::document::DocumentMirror;
use crate::lsp::registry::{self, LspRegistry};
use crate::{fsutil, AppContext};

use super::protocol::{self, ClientMessage};

/// The document currently owned by a session.
struct OpenDocument {
    path: String,
    mirror: DocumentMirror,
}

/// One browser connection. Holds the open file and its in-memory mirror;
/// both the dispatch loop and deferred routing read them, so they live
/// under a session-scoped mutex whose critical sections never span child
/// I/O awaits.
struct Session {
    registry: Arc<LspRegistry>,
    document: Mutex<Option<OpenDocument>>,
}

/// Drives one accepted WebSocket until either side closes.
///
/// Three concerns run under one `select!`: the inbound dispatch loop, the
/// outbound writer draining a bounded queue, and the forwarder moving
/// merged LSP notifications into that queue. Whichever finishes first ends
/// the session.
pub async fn run(ws: WebSocketStream<TcpStream>, ctx: Arc<AppContext>) {
    let (mut sink, mut stream) = ws.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(128);

    let session = Session {
        registry: ctx.registry.clone(),
        document: Mutex::new(None),
    };

    tokio::select! {
        _ = inbound_loop(&mut stream, &session, &out_tx) => {
            debug!("client stream ended");
        }
        _ = outbound_loop(&mut out_rx, &mut sink) => {
            debug!("outbound sink closed");
        }
        _ = forward_notifications(&ctx.registry, &out_tx) => {
            debug!("notification stream ended");
        }
    }
}

async fn inbound_loop(
    stream: &mut SplitStream<WebSocketStream<TcpStream>>,
    session: &Session,
    out_tx: &mpsc::Sender<Message>,
) {
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Some(reply) = session.handle_text(&text).await {
                    if out_tx.send(Message::Text(reply)).await.is_err() {
                        break;
                    }
                }
            }
            Ok(Message::Ping(data)) => {
                let _ = out_tx.send(Message::Pong(data)).await;
            }
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }
}

async fn outbound_loop(
    out_rx: &mut mpsc::Receiver<Message>,
    sink: &mut SplitSink<WebSocketStream<TcpStream>, Message>,
) {
    while let Some(msg) = out_rx.recv().await {
        if let Err(e) = sink.send(msg).await {
            warn!(err = %e, "websocket send error");
            break;
        }
    }
}

/// Merged-channel frames become `lsp_notification` envelopes.
async fn forward_notifications(registry: &LspRegistry, out_tx: &mpsc::Sender<Message>) {
    while let Some(frame) = registry.recv_notification().await {
        let envelope = protocol::lsp_notification(&frame);
        if out_tx.send(Message::Text(envelope)).await.is_err() {
            break;
        }
    }
}

impl Session {
    /// Parses and dispatches one client message. Returns the reply to send,
    /// if the message type produces one; errors become `error` envelopes.
    async fn handle_text(&self, text: &str) -> Option<String> {
        let msg: ClientMessage = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(e) => return Some(protocol::error(&format!("invalid message: {e}"))),
        };

        match self.dispatch(msg).await {
            Ok(reply) => reply,
            Err(e) => Some(protocol::error(&format!("{e:#}"))),
        }
    }

    async fn dispatch(&self, msg: ClientMessage) -> Result<Option<String>> {
        match msg {
            ClientMessage::OpenFile { path } => self.open_file(path).await,
            ClientMessage::ConfigureLsp {
                language,
                server_path,
                compile_commands_dir,
            } => {
                self.configure_lsp(language, server_path, compile_commands_dir)
                    .await
            }
            ClientMessage::Delta {
                from_pos,
                to_pos,
                insert,
            } => self.delta(from_pos, to_pos, &insert).await,
            ClientMessage::Save { path, content } => self.save(path, content).await,
            ClientMessage::LspRequest { id, method, params } => {
                self.lsp_request(id, &method, params).await
            }
        }
    }

    async fn open_file(&self, path: String) -> Result<Option<String>> {
        let content = fsutil::read_to_string(&path).await?;

        {
            let mut document = self.document.lock().await;
            // Re-opening replaces any previous mirror.
            *document = Some(OpenDocument {
                path: path.clone(),
                mirror: DocumentMirror::open(content.clone()),
            });
        }
        debug!(path = %path, bytes = content.len(), "file opened");

        let reply = protocol::file_opened(&path, &content);

        // Best-effort: the file may be for a language with no engine yet.
        match registry::language_for_path(&path) {
            Some(language) => {
                let params = json!({
                    "textDocument": {
                        "uri": format!("file://{path}"),
                        "languageId": language,
                        "version": 1,
                        "text": content,
                    },
                });
                if let Err(e) = self
                    .registry
                    .route_notification("textDocument/didOpen", params)
                    .await
                {
                    debug!(path = %path, err = %e, "didOpen not routed");
                }
            }
            None => debug!(path = %path, "no language detected, didOpen not sent"),
        }

        Ok(Some(reply))
    }

    async fn configure_lsp(
        &self,
        language: String,
        server_path: Option<String>,
        compile_commands_dir: Option<String>,
    ) -> Result<Option<String>> {
        let server_path = match server_path.filter(|p| !p.is_empty()) {
            Some(path) => path,
            None => default_server_path(&language)
                .ok_or_else(|| {
                    anyhow!("no default language server for {language:?}; set serverPath")
                })?
                .to_string(),
        };

        let compile_commands_dir = compile_commands_dir.filter(|d| !d.is_empty());
        self.registry
            .start(&language, &server_path, compile_commands_dir.as_deref())
            .await?;

        // The compilation-database directory doubles as the workspace root.
        let root_dir = compile_commands_dir.as_deref().unwrap_or("/");
        self.registry.initialize(&language, root_dir).await?;

        Ok(Some(protocol::lsp_configured(&language)))
    }

    async fn delta(&self, from_pos: usize, to_pos: usize, insert: &str) -> Result<Option<String>> {
        let (path, text, version) = {
            let mut document = self.document.lock().await;
            let doc = document
                .as_mut()
                .ok_or_else(|| anyhow!("no file is open"))?;
            doc.mirror.apply(from_pos, to_pos, insert)?;
            (
                doc.path.clone(),
                doc.mirror.text().to_string(),
                doc.mirror.version(),
            )
        };

        // Whole-document sync on the wire, not incremental.
        let params = json!({
            "textDocument": {
                "uri": format!("file://{path}"),
                "version": version,
            },
            "contentChanges": [{ "text": text }],
        });
        if let Err(e) = self
            .registry
            .route_notification("textDocument/didChange", params)
            .await
        {
            debug!(path = %path, err = %e, "didChange not routed");
        }

        Ok(None)
    }

    async fn save(&self, path: String, content: String) -> Result<Option<String>> {
        // The client's content is authoritative; the mirror is not resynced.
        fsutil::write_string(&path, &content).await?;
        debug!(path = %path, bytes = content.len(), "file saved");

        let reply = protocol::file_saved();

        let params = json!({
            "textDocument": { "uri": format!("file://{path}") },
        });
        if let Err(e) = self
            .registry
            .route_notification("textDocument/didSave", params)
            .await
        {
            debug!(path = %path, err = %e, "didSave not routed");
        }

        Ok(Some(reply))
    }

    async fn lsp_request(&self, id: Value, method: &str, params: Value) -> Result<Option<String>> {
        let frame = self.registry.route_request(method, params).await?;

        // Server-reported errors become a gateway error message, not a
        // passthrough of the JSON-RPC error object.
        if let Some(error) = frame.get("error") {
            bail!("language server error: {error}");
        }

        let result = frame.get("result").cloned().unwrap_or(Value::Null);
        Ok(Some(protocol::lsp_response(&id, result)))
    }
}

/// Built-in server binaries per language tag. Anything else needs an
/// explicit `serverPath`.
fn default_server_path(language: &str) -> Option<&'static str> {
    match language {
        "cpp" => Some("clangd"),
        "python" => Some("pylsp"),
        _ => None,
    }
}
