//! Client ↔ server JSON envelopes.
//!
//! Every message on the WebSocket is `{ "type": <tag>, "payload": <object> }`.
//! Inbound messages deserialize into [`ClientMessage`]; an unknown tag or a
//! malformed payload is a deserialization error that the session reports as
//! an `error` envelope, never a panic.

use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientMessage {
    OpenFile {
        path: String,
    },
    #[serde(rename_all = "camelCase")]
    ConfigureLsp {
        language: String,
        #[serde(default)]
        server_path: Option<String>,
        #[serde(default)]
        compile_commands_dir: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Delta {
        from_pos: usize,
        to_pos: usize,
        insert: String,
    },
    Save {
        path: String,
        content: String,
    },
    LspRequest {
        id: Value,
        method: String,
        #[serde(default)]
        params: Value,
    },
}

// ─── Outbound envelope builders ──────────────────────────────────────────────

pub fn file_opened(path: &str, content: &str) -> String {
    envelope("file_opened", json!({ "path": path, "content": content }))
}

pub fn file_saved() -> String {
    envelope("file_saved", json!({ "success": true }))
}

pub fn lsp_configured(language: &str) -> String {
    envelope("lsp_configured", json!({ "success": true, "language": language }))
}

/// Wraps a server-originated LSP notification frame verbatim.
pub fn lsp_notification(frame: &Value) -> String {
    envelope("lsp_notification", frame.clone())
}

/// The response to an `lsp_request`, echoing the client's own id. Only the
/// `result` field of the server frame is carried.
pub fn lsp_response(id: &Value, result: Value) -> String {
    envelope(
        "lsp_response",
        json!({ "id": id, "jsonrpc": "2.0", "result": result }),
    )
}

pub fn error(message: &str) -> String {
    envelope("error", json!({ "message": message }))
}

fn envelope(kind: &str, payload: Value) -> String {
    json!({ "type": kind, "payload": payload }).to_string()
}
