/// Transport failures.
///
/// `Clone` so a single in-flight connect outcome can be handed to every
/// caller that joined it.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,
    #[error("transport is shutting down")]
    ShuttingDown,
    #[error("connect: {0}")]
    Connect(String),
    #[error("connect timed out after {0}ms")]
    ConnectTimeout(u64),
    #[error("connection superseded by generation {0}")]
    Superseded(u64),
    #[error("send: {0}")]
    Send(String),
    #[error("credentials: {0}")]
    Credentials(String),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Credentials(e.to_string())
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        TransportError::Credentials(e.to_string())
    }
}
