//! Shared application state for the diagnostics HTTP surface.

use crate::config::BridgeConfig;
use crate::session::SessionRegistry;

/// Process-wide state handed to the HTTP handlers as `Arc<AppState>`.
pub struct AppState {
    /// Live and recently-finished call sessions.
    pub registry: SessionRegistry,
    /// Resolved process configuration.
    pub config: BridgeConfig,
}

impl AppState {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            registry: SessionRegistry::new(),
            config,
        }
    }
}
