use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Chat transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which connector carries chat traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// JSON frames over a WebSocket to a sidecar that speaks the chat protocol.
    #[default]
    Sidecar,
    /// Operator types into stdin; replies go to stdout.  Local testing only.
    Console,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default)]
    pub kind: TransportKind,

    /// WebSocket URL of the chat sidecar.
    #[serde(default = "d_sidecar_url")]
    pub sidecar_url: String,

    /// Directory holding persisted transport credentials.
    /// Defaults to `<state.dir>/auth`.
    #[serde(default)]
    pub auth_dir: Option<PathBuf>,

    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::default(),
            sidecar_url: d_sidecar_url(),
            auth_dir: None,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Reconnect tiers.  All durations in milliseconds.
///
/// - generic drop: `min(generic_base_ms * 2^(n-1), max_delay_ms)`
/// - session replaced: `min(replaced_step_ms * n, max_delay_ms)`, giving up
///   once `n > replaced_max_attempts`
/// - session invalidated: fixed `logged_out_delay_ms`, counter reset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "d_generic_base_ms")]
    pub generic_base_ms: u64,
    #[serde(default = "d_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "d_replaced_step_ms")]
    pub replaced_step_ms: u64,
    #[serde(default = "d_replaced_max_attempts")]
    pub replaced_max_attempts: u32,
    #[serde(default = "d_logged_out_delay_ms")]
    pub logged_out_delay_ms: u64,
    /// A connection open at least this long resets the attempt counter
    /// when it closes.
    #[serde(default = "d_stability_threshold_ms")]
    pub stability_threshold_ms: u64,
    /// Bound on a single `open` call against the connector.
    #[serde(default = "d_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            generic_base_ms: d_generic_base_ms(),
            max_delay_ms: d_max_delay_ms(),
            replaced_step_ms: d_replaced_step_ms(),
            replaced_max_attempts: d_replaced_max_attempts(),
            logged_out_delay_ms: d_logged_out_delay_ms(),
            stability_threshold_ms: d_stability_threshold_ms(),
            connect_timeout_ms: d_connect_timeout_ms(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_sidecar_url() -> String {
    "ws://127.0.0.1:8765/".into()
}
fn d_generic_base_ms() -> u64 {
    2_000
}
fn d_max_delay_ms() -> u64 {
    60_000
}
fn d_replaced_step_ms() -> u64 {
    10_000
}
fn d_replaced_max_attempts() -> u32 {
    10
}
fn d_logged_out_delay_ms() -> u64 {
    3_000
}
fn d_stability_threshold_ms() -> u64 {
    20_000
}
fn d_connect_timeout_ms() -> u64 {
    20_000
}
