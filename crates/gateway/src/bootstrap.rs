//! AppState construction shared by `serve` and `run`, plus transport
//! wiring for `serve`.

use std::sync::Arc;

use tokio::sync::mpsc;

use cb_domain::config::{Config, ConfigSeverity, TransportKind};
use cb_orchestrator::{Orchestrator, ProcessLauncher};
use cb_sessions::SessionStore;
use cb_transport::{
    Connector, CredentialStore, ReconnectPolicy, SidecarConnector, Supervisor, TransportEvent,
};

use crate::console::{ConsoleConnector, CONSOLE_ID};
use crate::state::AppState;

/// Validate config, open the session store and build the orchestrator.
pub fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    let errors = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .count();
    if errors > 0 {
        anyhow::bail!("config validation failed with {errors} error(s)");
    }

    // ── Session store ────────────────────────────────────────────────
    let sessions = Arc::new(SessionStore::open(config.state.resolved_sessions_file()));

    // ── Orchestrator ─────────────────────────────────────────────────
    let orchestrator = Orchestrator::new(
        config.agent.clone(),
        Arc::new(ProcessLauncher),
        sessions.clone(),
    );
    tracing::info!(
        binary = %config.agent.binary,
        timeout_secs = config.agent.timeout_secs,
        heartbeat_secs = config.agent.heartbeat_secs,
        "orchestrator ready"
    );

    Ok(AppState {
        config,
        sessions,
        orchestrator,
    })
}

/// Console mode routes stdin lines as the operator's own conversation, so
/// an empty `self_id` is filled in with the console identity.
pub fn prepare_config(mut config: Config) -> Config {
    if config.transport.kind == TransportKind::Console && config.bridge.self_id.trim().is_empty() {
        tracing::info!(self_id = CONSOLE_ID, "console transport: using default self_id");
        config.bridge.self_id = CONSOLE_ID.to_owned();
    }
    config
}

/// Pick the connector for the configured transport kind.
pub fn build_connector(config: &Config) -> Arc<dyn Connector> {
    match config.transport.kind {
        TransportKind::Sidecar => {
            let credentials = CredentialStore::new(config.auth_dir());
            tracing::info!(
                url = %config.transport.sidecar_url,
                auth_dir = %credentials.dir().display(),
                "sidecar transport selected"
            );
            Arc::new(SidecarConnector::new(
                config.transport.sidecar_url.clone(),
                credentials,
            ))
        }
        TransportKind::Console => {
            tracing::info!("console transport selected");
            Arc::new(ConsoleConnector::stdio(config.bridge.self_id.clone()))
        }
    }
}

/// Create the connection supervisor.  Does not connect.
pub fn build_supervisor(config: &Config) -> (Supervisor, mpsc::UnboundedReceiver<TransportEvent>) {
    let policy = ReconnectPolicy::from(&config.transport.reconnect);
    Supervisor::new(build_connector(config), policy)
}
