//! LSP multiplexer: framing codec, child process supervision, JSON-RPC
//! request correlation, and URI-based routing across language servers.

pub mod codec;
pub mod engine;
pub mod process;
pub mod registry;

use thiserror::Error;

/// Errors produced by the LSP subsystem.
///
/// Callers above the gateway boundary generally stringify these into a
/// client-facing `error` envelope; inside the subsystem the variant matters
/// (a dead engine is handled differently from a routing miss).
#[derive(Debug, Error)]
pub enum LspError {
    #[error("malformed frame header: {0}")]
    MalformedHeader(String),

    #[error("truncated frame body")]
    TruncatedBody,

    #[error("language server closed the connection")]
    PeerClosed,

    #[error("language server not running")]
    NotRunning,

    #[error("no language server configured for language: {0}")]
    NoEngine(String),

    #[error("could not detect language for file: {0}")]
    UnknownLanguage(String),

    #[error("params carry no textDocument.uri")]
    BadParams,

    #[error("failed to spawn language server: {0}")]
    Spawn(std::io::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
