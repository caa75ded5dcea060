use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Routing (authorized conversation)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which inbound messages the router accepts and how replies are shaped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// The operator's own conversation identity (the "note to self" chat).
    /// Messages in any other conversation are ignored.
    #[serde(default)]
    pub self_id: String,

    /// Alternate identities that resolve to the same account, e.g. a
    /// linked-device or privacy-preserving id the transport reports instead
    /// of the phone-number id.
    #[serde(default)]
    pub alt_ids: Vec<String>,

    /// Chunk size handed to the formatter when splitting long replies.
    #[serde(default = "d_max_message_chars")]
    pub max_message_chars: usize,

    /// Relay heartbeat notices while the agent is still working.
    #[serde(default = "d_true")]
    pub progress_notices: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            self_id: String::new(),
            alt_ids: Vec::new(),
            max_message_chars: d_max_message_chars(),
            progress_notices: true,
        }
    }
}

impl BridgeConfig {
    /// Whether `id` names the authorized conversation.  The comparison
    /// ignores any `:device` suffix on the user part, which transports add
    /// for linked devices (`123:4@host` and `123@host` are the same account).
    pub fn is_authorized(&self, id: &str) -> bool {
        let wanted = normalize_identity(id);
        if wanted.is_empty() {
            return false;
        }
        std::iter::once(&self.self_id)
            .chain(self.alt_ids.iter())
            .any(|known| !known.is_empty() && normalize_identity(known) == wanted)
    }
}

fn normalize_identity(id: &str) -> String {
    let id = id.trim();
    match id.split_once('@') {
        Some((user, host)) => {
            let user = user.split(':').next().unwrap_or(user);
            format!("{user}@{host}")
        }
        None => id.split(':').next().unwrap_or(id).to_owned(),
    }
}

fn d_max_message_chars() -> usize {
    4000
}
fn d_true() -> bool {
    true
}
