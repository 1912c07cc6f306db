//! Language-tag → engine registry with URI-driven routing.
//!
//! Each engine's notification stream is moved by a forwarder task into one
//! merged channel; downstream consumers need no per-engine tag because the
//! URI inside each LSP frame already identifies its source.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

use super::engine::LspEngine;
use super::LspError;

/// Capacity of the merged notification channel shared by all engines.
/// Forwarders drop-and-log on overflow so a misbehaving engine cannot
/// back-pressure the gateway.
const MERGED_CHANNEL_CAPACITY: usize = 100;

/// All running language servers, keyed by language tag.
pub struct LspRegistry {
    engines: RwLock<HashMap<String, Arc<LspEngine>>>,
    merged_tx: mpsc::Sender<Value>,
    merged_rx: Mutex<mpsc::Receiver<Value>>,
}

impl Default for LspRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LspRegistry {
    pub fn new() -> Self {
        let (merged_tx, merged_rx) = mpsc::channel(MERGED_CHANNEL_CAPACITY);
        Self {
            engines: RwLock::new(HashMap::new()),
            merged_tx,
            merged_rx: Mutex::new(merged_rx),
        }
    }

    /// Starts a language server for `language`, replacing (and shutting
    /// down) any engine already registered under that tag.
    pub async fn start(
        &self,
        language: &str,
        server_path: &str,
        compile_commands_dir: Option<&str>,
    ) -> Result<(), LspError> {
        let mut engines = self.engines.write().await;

        if let Some(old) = engines.remove(language) {
            info!(language, "replacing existing language server");
            old.shutdown().await;
        }

        let (engine, mut notifications) =
            LspEngine::spawn(language, server_path, compile_commands_dir)?;

        // Forwarder: per-engine stream → merged channel. Exits when the
        // engine's notification channel closes at shutdown.
        let merged_tx = self.merged_tx.clone();
        let lang = language.to_string();
        tokio::spawn(async move {
            while let Some(frame) = notifications.recv().await {
                if merged_tx.try_send(frame).is_err() {
                    warn!(language = %lang, "merged notification channel full, dropping frame");
                }
            }
            debug!(language = %lang, "notification forwarder stopped");
        });

        engines.insert(language.to_string(), engine);
        info!(language, server = server_path, "language server started");
        Ok(())
    }

    /// Performs the LSP `initialize` handshake followed by the
    /// `initialized` notification.
    pub async fn initialize(&self, language: &str, root_dir: &str) -> Result<(), LspError> {
        let params = json!({
            "processId": null,
            "rootUri": format!("file://{root_dir}"),
            "capabilities": {
                "textDocument": {
                    "completion": {
                        "completionItem": {
                            "snippetSupport": true,
                        },
                    },
                    "publishDiagnostics": {},
                },
            },
        });

        self.send_request(language, "initialize", params).await?;
        self.send_notification(language, "initialized", json!({}))
            .await?;
        info!(language, "language server initialized");
        Ok(())
    }

    /// Sends a request to the engine registered for `language`.
    pub async fn send_request(
        &self,
        language: &str,
        method: &str,
        params: Value,
    ) -> Result<Value, LspError> {
        self.engine_for(language).await?.request(method, params).await
    }

    /// Sends a notification to the engine registered for `language`.
    pub async fn send_notification(
        &self,
        language: &str,
        method: &str,
        params: Value,
    ) -> Result<(), LspError> {
        self.engine_for(language).await?.notify(method, params).await
    }

    /// Routes a request to the engine owning `params.textDocument.uri`.
    pub async fn route_request(&self, method: &str, params: Value) -> Result<Value, LspError> {
        let language = language_from_params(&params)?;
        debug!(method, language = %language, "routing lsp request");
        self.send_request(&language, method, params).await
    }

    /// Routes a notification to the engine owning `params.textDocument.uri`.
    pub async fn route_notification(&self, method: &str, params: Value) -> Result<(), LspError> {
        let language = language_from_params(&params)?;
        debug!(method, language = %language, "routing lsp notification");
        self.send_notification(&language, method, params).await
    }

    /// Receives the next merged notification frame.
    ///
    /// Concurrent callers compete for frames; a session consumes the stream
    /// for as long as it is connected.
    pub async fn recv_notification(&self) -> Option<Value> {
        self.merged_rx.lock().await.recv().await
    }

    /// Languages with a registered engine, sorted for stable output.
    pub async fn languages(&self) -> Vec<String> {
        let mut languages: Vec<String> = self.engines.read().await.keys().cloned().collect();
        languages.sort();
        languages
    }

    /// Whether a live engine is registered for `language`.
    pub async fn is_running(&self, language: &str) -> bool {
        self.engines
            .read()
            .await
            .get(language)
            .is_some_and(|e| e.is_running())
    }

    /// Tears down every engine and clears the registry.
    pub async fn shutdown_all(&self) {
        let mut engines = self.engines.write().await;
        for (language, engine) in engines.drain() {
            info!(language = %language, "shutting down language server");
            engine.shutdown().await;
        }
    }

    async fn engine_for(&self, language: &str) -> Result<Arc<LspEngine>, LspError> {
        self.engines
            .read()
            .await
            .get(language)
            .cloned()
            .ok_or_else(|| LspError::NoEngine(language.to_string()))
    }
}

/// Extracts `textDocument.uri` from request params, strips the `file://`
/// scheme and detects the owning language from the path suffix.
fn language_from_params(params: &Value) -> Result<String, LspError> {
    let uri = params
        .get("textDocument")
        .and_then(|doc| doc.get("uri"))
        .and_then(Value::as_str)
        .ok_or(LspError::BadParams)?;

    let path = uri.strip_prefix("file://").unwrap_or(uri);
    language_for_path(path)
        .map(str::to_string)
        .ok_or_else(|| LspError::UnknownLanguage(path.to_string()))
}

/// File-extension → language tag policy.
pub fn language_for_path(path: &str) -> Option<&'static str> {
    let ext = Path::new(path).extension()?.to_str()?;
    match ext {
        "py" => Some("python"),
        "c" | "cc" | "cpp" | "cxx" | "h" | "hpp" => Some("cpp"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_follows_the_suffix_policy() {
        assert_eq!(language_for_path("/x/y.py"), Some("python"));
        assert_eq!(language_for_path("/x/y.cpp"), Some("cpp"));
        assert_eq!(language_for_path("/x/y.cc"), Some("cpp"));
        assert_eq!(language_for_path("/x/y.cxx"), Some("cpp"));
        assert_eq!(language_for_path("/x/y.c"), Some("cpp"));
        assert_eq!(language_for_path("/x/y.h"), Some("cpp"));
        assert_eq!(language_for_path("/x/y.hpp"), Some("cpp"));
        assert_eq!(language_for_path("/x/y.rs"), None);
        assert_eq!(language_for_path("/x/noext"), None);
        // Suffix matching, not a fixed-width slice: short names still work.
        assert_eq!(language_for_path("a.py"), Some("python"));
    }

    #[test]
    fn language_extraction_strips_the_file_scheme() {
        let params = json!({"textDocument": {"uri": "file:///src/main.py"}});
        assert_eq!(language_from_params(&params).unwrap(), "python");
    }

    #[test]
    fn language_extraction_rejects_missing_uri() {
        let err = language_from_params(&json!({"position": {}})).unwrap_err();
        assert!(matches!(err, LspError::BadParams), "{err}");
    }

    #[test]
    fn language_extraction_rejects_unknown_suffix() {
        let params = json!({"textDocument": {"uri": "file:///src/main.zig"}});
        let err = language_from_params(&params).unwrap_err();
        assert!(matches!(err, LspError::UnknownLanguage(_)), "{err}");
    }

    #[tokio::test]
    async fn start_twice_leaves_exactly_one_engine() {
        let registry = LspRegistry::new();
        registry.start("python", "/bin/cat", None).await.unwrap();
        registry.start("python", "/bin/cat", None).await.unwrap();

        assert_eq!(registry.languages().await, vec!["python"]);
        assert!(registry.is_running("python").await);
    }

    #[tokio::test]
    async fn route_request_reaches_the_matching_engine_only() {
        let registry = LspRegistry::new();
        registry.start("python", "/bin/cat", None).await.unwrap();

        // cat echoes the routed request back as its own "response".
        let reply = registry
            .route_request(
                "textDocument/hover",
                json!({"textDocument": {"uri": "file:///x/y.py"}}),
            )
            .await
            .unwrap();
        assert_eq!(reply["method"], json!("textDocument/hover"));

        // A cpp-addressed request finds no engine.
        let err = registry
            .route_request(
                "textDocument/hover",
                json!({"textDocument": {"uri": "file:///x/y.cpp"}}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LspError::NoEngine(_)), "{err}");
    }

    #[tokio::test]
    async fn notifications_merge_across_engines() {
        let registry = LspRegistry::new();
        registry.start("python", "/bin/cat", None).await.unwrap();

        registry
            .send_notification(
                "python",
                "textDocument/publishDiagnostics",
                json!({"uri": "file:///x/y.py", "diagnostics": []}),
            )
            .await
            .unwrap();

        let frame = registry.recv_notification().await.unwrap();
        assert_eq!(frame["method"], json!("textDocument/publishDiagnostics"));
    }

    #[tokio::test]
    async fn shutdown_all_clears_the_registry() {
        let registry = LspRegistry::new();
        registry.start("python", "/bin/cat", None).await.unwrap();
        registry.start("cpp", "/bin/cat", None).await.unwrap();

        registry.shutdown_all().await;
        assert!(registry.languages().await.is_empty());
        assert!(!registry.is_running("python").await);
    }
}
