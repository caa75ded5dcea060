use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// On-disk state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StateConfig {
    /// Root for everything the bridge persists.  Defaults to `~/.chatbridge`.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Conversation → agent session token mapping.
    #[serde(default)]
    pub sessions_file: Option<PathBuf>,
    /// Single-instance lock file.
    #[serde(default)]
    pub pid_file: Option<PathBuf>,
}

impl StateConfig {
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".chatbridge")
        })
    }

    pub fn resolved_sessions_file(&self) -> PathBuf {
        self.sessions_file
            .clone()
            .unwrap_or_else(|| self.resolved_dir().join("sessions.json"))
    }

    pub fn resolved_pid_file(&self) -> PathBuf {
        self.pid_file
            .clone()
            .unwrap_or_else(|| self.resolved_dir().join("chatbridge.pid"))
    }
}
