//! Session token store.
//!
//! Persists a flat JSON object (`{"<conversation id>": "<session token>"}`)
//! at the configured path.  The whole file is rewritten on every mutation
//! via a sibling temp file and a rename, so a crash mid-write leaves either
//! the old or the new mapping on disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};

use cb_domain::error::{Error, Result};
use cb_domain::trace::TraceEvent;

/// Conversation id → session token.  Ordered so the file diff is stable.
pub type SessionMap = BTreeMap<String, String>;

/// File-backed session token store.
pub struct SessionStore {
    path: PathBuf,
    tokens: RwLock<SessionMap>,
    /// Held across mutate + write so files land in mutation order.
    write_lock: Mutex<()>,
}

impl SessionStore {
    /// Load the mapping from `path`.
    ///
    /// A missing file is an empty mapping.  An unreadable or corrupt file is
    /// logged and also treated as empty; the affected conversations start
    /// fresh agent sessions.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let tokens = match load(&path) {
            Ok(map) => map,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "session file unreadable, starting with empty mapping"
                );
                SessionMap::new()
            }
        };

        tracing::info!(
            sessions = tokens.len(),
            path = %path.display(),
            "session store loaded"
        );

        Self {
            path,
            tokens: RwLock::new(tokens),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Session token for a conversation, if one is on file.
    pub fn get(&self, conversation_id: &str) -> Option<String> {
        self.tokens.read().get(conversation_id).cloned()
    }

    /// Store `token` for the conversation, replacing any prior token, and
    /// persist.  Writing the same token again is a no-op.
    pub fn set(&self, conversation_id: &str, token: &str) -> Result<()> {
        let _write = self.write_lock.lock();
        let snapshot = {
            let mut tokens = self.tokens.write();
            let previous = tokens.insert(conversation_id.to_owned(), token.to_owned());
            if previous.as_deref() == Some(token) {
                return Ok(());
            }
            TraceEvent::SessionTokenStored {
                conversation_id: conversation_id.to_owned(),
                session_token: token.to_owned(),
                replaced: previous.is_some(),
            }
            .emit();
            tokens.clone()
        };
        persist(&self.path, &snapshot)
    }

    /// Forget the conversation's token and persist.  Returns the removed
    /// token, or `None` when there was nothing to clear.
    pub fn clear(&self, conversation_id: &str, reason: &str) -> Result<Option<String>> {
        let _write = self.write_lock.lock();
        let (removed, snapshot) = {
            let mut tokens = self.tokens.write();
            let removed = tokens.remove(conversation_id);
            if removed.is_none() {
                return Ok(None);
            }
            (removed, tokens.clone())
        };

        TraceEvent::SessionTokenCleared {
            conversation_id: conversation_id.to_owned(),
            reason: reason.to_owned(),
        }
        .emit();

        persist(&self.path, &snapshot)?;
        Ok(removed)
    }

    /// Copy of the full mapping.
    pub fn snapshot(&self) -> SessionMap {
        self.tokens.read().clone()
    }

    pub fn len(&self) -> usize {
        self.tokens.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.read().is_empty()
    }

    /// Write the current mapping to disk.
    pub fn flush(&self) -> Result<()> {
        let _write = self.write_lock.lock();
        let snapshot = self.tokens.read().clone();
        persist(&self.path, &snapshot)
    }
}

fn load(path: &Path) -> Result<SessionMap> {
    if !path.exists() {
        return Ok(SessionMap::new());
    }
    let raw = std::fs::read_to_string(path)?;
    if raw.trim().is_empty() {
        return Ok(SessionMap::new());
    }
    Ok(serde_json::from_str(&raw)?)
}

/// Overwrite `path` with the full mapping.
pub fn persist(path: &Path, map: &SessionMap) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(map)
        .map_err(|e| Error::Other(format!("serializing sessions: {e}")))?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
