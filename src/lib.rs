pub mod config;
pub mod document;
pub mod fsutil;
pub mod gateway;
pub mod lsp;

use std::sync::Arc;

use config::GatewayConfig;
use lsp::registry::LspRegistry;

/// Shared application state passed to every connection handler.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<GatewayConfig>,
    pub registry: Arc<LspRegistry>,
    pub started_at: std::time::Instant,
}
