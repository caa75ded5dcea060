use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent process
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How the external agent binary is invoked for each request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent executable, resolved through `PATH` when not absolute.
    #[serde(default = "d_binary")]
    pub binary: String,

    /// Model-name override passed as `--model <name>`.
    #[serde(default)]
    pub model: Option<String>,

    /// Emit the permission-bypass flag.  The agent runs unattended, so
    /// there is nobody to answer an interactive permission prompt.
    #[serde(default = "d_true")]
    pub skip_permissions: bool,

    /// Initial working directory for spawned agents.  `None` means the
    /// bridge's own working directory.  Changed at runtime via `/project`.
    #[serde(default)]
    pub workdir: Option<PathBuf>,

    /// Hard timeout per invocation.  The process is killed when exceeded.
    #[serde(default = "d_timeout_secs")]
    pub timeout_secs: u64,

    /// Interval between "still working" progress notices.
    #[serde(default = "d_heartbeat_secs")]
    pub heartbeat_secs: u64,

    /// Upper bound (in characters) on the raw-text reply used when the
    /// agent's output contains no structured result record.
    #[serde(default = "d_fallback_max_chars")]
    pub fallback_max_chars: usize,

    /// Extra arguments inserted before the task text.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            binary: d_binary(),
            model: None,
            skip_permissions: true,
            workdir: None,
            timeout_secs: d_timeout_secs(),
            heartbeat_secs: d_heartbeat_secs(),
            fallback_max_chars: d_fallback_max_chars(),
            extra_args: Vec::new(),
        }
    }
}

fn d_binary() -> String {
    "claude".into()
}
fn d_true() -> bool {
    true
}
fn d_timeout_secs() -> u64 {
    4 * 60 * 60
}
fn d_heartbeat_secs() -> u64 {
    30
}
fn d_fallback_max_chars() -> usize {
    4000
}
