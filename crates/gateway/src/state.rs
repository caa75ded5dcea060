use std::sync::Arc;

use cb_domain::config::Config;
use cb_orchestrator::Orchestrator;
use cb_sessions::SessionStore;

/// Shared application state handed to the router and CLI commands.
///
/// Holds no transport; `run` boots the same state without connecting.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionStore>,
    pub orchestrator: Orchestrator,
}
