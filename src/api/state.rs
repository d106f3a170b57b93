//! Shared application state threaded through every handler via [`axum::extract::State`].

use std::sync::Arc;

use reqwest::Client;

use crate::config::RuntimeConfig;
use crate::interpreter::InterpreterBridge;
use crate::ports::PortManager;
use crate::process::ProcessRegistry;
use crate::session::SessionManager;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RuntimeConfig>,
    pub sessions: SessionManager,
    pub processes: ProcessRegistry,
    pub ports: PortManager,
    pub interpreter: InterpreterBridge,
    /// Shared client for the preview proxy's upstream requests; reusing one
    /// client keeps connection pooling effective across requests.
    pub http_client: Client,
}

impl AppState {
    pub fn new(config: RuntimeConfig) -> Self {
        let config = Arc::new(config);
        let sessions = SessionManager::new(config.session.clone());
        Self {
            processes: ProcessRegistry::new(config.process.clone(), sessions.clone()),
            sessions,
            ports: PortManager::new(config.ports.clone()),
            interpreter: InterpreterBridge::new(config.interpreter.clone()),
            http_client: Client::builder()
                .build()
                .expect("building the shared reqwest client"),
            config,
        }
    }
}
