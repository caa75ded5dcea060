//! On-disk transport credentials.
//!
//! Credentials are opaque JSON owned by the chat protocol.  They live in
//! `<auth_dir>/creds.json`; invalidation removes the whole directory so no
//! protocol-side key material survives a logout.

use std::path::{Path, PathBuf};

use crate::error::TransportError;

const CREDS_FILE: &str = "creds.json";

#[derive(Debug, Clone)]
pub struct CredentialStore {
    dir: PathBuf,
}

impl CredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file(&self) -> PathBuf {
        self.dir.join(CREDS_FILE)
    }

    /// Stored credentials, or `None` if there are none.  A corrupt file is
    /// logged and treated as absent, which forces a fresh authentication.
    pub async fn load(&self) -> Option<serde_json::Value> {
        let path = self.file();
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "credentials unreadable");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "credentials corrupt, ignoring");
                None
            }
        }
    }

    /// Replace the stored credentials.
    pub async fn save(&self, creds: &serde_json::Value) -> Result<(), TransportError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.file();
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(creds)?;
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        tracing::debug!(path = %path.display(), "credentials saved");
        Ok(())
    }

    /// Remove the credential directory.  Absent is fine.
    pub async fn clear(&self) -> Result<(), TransportError> {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => {
                tracing::info!(dir = %self.dir.display(), "credentials cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
