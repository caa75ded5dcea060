mod agent;
mod bridge;
mod observability;
mod state;
mod transport;

pub use agent::*;
pub use bridge::*;
pub use observability::*;
pub use state::*;
pub use transport::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Credential directory, falling back to `<state.dir>/auth`.
    pub fn auth_dir(&self) -> std::path::PathBuf {
        self.transport
            .auth_dir
            .clone()
            .unwrap_or_else(|| self.state.resolved_dir().join("auth"))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let mut push = |severity, field: &str, message: String| {
            errors.push(ConfigError {
                severity,
                field: field.into(),
                message,
            })
        };

        if self.agent.binary.trim().is_empty() {
            push(
                ConfigSeverity::Error,
                "agent.binary",
                "agent binary must not be empty".into(),
            );
        }

        if self.agent.timeout_secs == 0 {
            push(
                ConfigSeverity::Error,
                "agent.timeout_secs",
                "timeout must be greater than 0".into(),
            );
        }

        if self.agent.heartbeat_secs == 0 {
            push(
                ConfigSeverity::Error,
                "agent.heartbeat_secs",
                "heartbeat interval must be greater than 0".into(),
            );
        } else if self.agent.heartbeat_secs >= self.agent.timeout_secs {
            push(
                ConfigSeverity::Warning,
                "agent.heartbeat_secs",
                "heartbeat interval is not shorter than the timeout; no progress notices will fire"
                    .into(),
            );
        }

        if let Some(wd) = &self.agent.workdir {
            if !wd.is_dir() {
                push(
                    ConfigSeverity::Warning,
                    "agent.workdir",
                    format!("{} is not a directory", wd.display()),
                );
            }
        }

        if self.bridge.self_id.trim().is_empty() {
            push(
                ConfigSeverity::Warning,
                "bridge.self_id",
                "no authorized conversation configured; every inbound message will be ignored"
                    .into(),
            );
        }

        if self.bridge.max_message_chars == 0 {
            push(
                ConfigSeverity::Error,
                "bridge.max_message_chars",
                "chunk size must be greater than 0".into(),
            );
        }

        if self.transport.kind == TransportKind::Sidecar {
            match url::Url::parse(&self.transport.sidecar_url) {
                Ok(u) if u.scheme() == "ws" || u.scheme() == "wss" => {}
                Ok(u) => push(
                    ConfigSeverity::Error,
                    "transport.sidecar_url",
                    format!("unsupported scheme \"{}\" (expected ws or wss)", u.scheme()),
                ),
                Err(e) => push(
                    ConfigSeverity::Error,
                    "transport.sidecar_url",
                    format!("invalid URL: {e}"),
                ),
            }
        }

        let rc = &self.transport.reconnect;
        if rc.generic_base_ms == 0 || rc.replaced_step_ms == 0 {
            push(
                ConfigSeverity::Error,
                "transport.reconnect",
                "backoff steps must be greater than 0".into(),
            );
        }
        if rc.max_delay_ms < rc.generic_base_ms {
            push(
                ConfigSeverity::Warning,
                "transport.reconnect.max_delay_ms",
                "max delay is below the base delay; every reconnect waits max_delay_ms".into(),
            );
        }

        errors
    }
}
