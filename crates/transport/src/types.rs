//! Events flowing from connections to the supervisor, and from the
//! supervisor to the application.

use serde::{Deserialize, Serialize};

/// Monotonic connection-attempt counter.
pub type Generation = u64;

/// Identity of one connection handle, unique within the process.
pub type HandleId = u64;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Connection → supervisor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Open,
    Close,
}

/// A connection-status change reported by the chat protocol.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    #[serde(default)]
    pub connection: Option<ConnectionStatus>,
    /// Disconnect cause, meaningful with `connection: close`.
    #[serde(default)]
    pub code: Option<u16>,
    /// Scannable authentication code for the operator.
    #[serde(default)]
    pub qr: Option<String>,
}

impl StatusUpdate {
    pub fn open() -> Self {
        Self {
            connection: Some(ConnectionStatus::Open),
            ..Default::default()
        }
    }

    pub fn closed(code: Option<u16>) -> Self {
        Self {
            connection: Some(ConnectionStatus::Close),
            code,
            qr: None,
        }
    }
}

/// Whether a message batch is new traffic or a history sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageBatch {
    /// Arrived while connected (`notify`).
    #[serde(rename = "notify")]
    Live,
    /// Replayed history (`append`).  Never routed.
    #[serde(rename = "append")]
    Historical,
}

/// One chat message as the protocol reports it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingMessage {
    /// Conversation identifier, e.g. `15551234567@s.whatsapp.net`.
    pub chat_id: String,
    #[serde(default)]
    pub sender_id: Option<String>,
    /// Authored by the account this bridge runs as.
    #[serde(default)]
    pub from_me: bool,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub is_group: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    /// The protocol rotated its credentials; persist them.
    Credentials(serde_json::Value),
    Status(StatusUpdate),
    Messages {
        batch: MessageBatch,
        messages: Vec<IncomingMessage>,
    },
}

/// An event tagged with the connection that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionEvent {
    pub generation: Generation,
    pub handle_id: HandleId,
    pub kind: EventKind,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Disconnect classification
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Close code: the session was logged out and credentials are void.
pub const CODE_LOGGED_OUT: u16 = 401;
/// Close code: another live session took over this one.
pub const CODE_REPLACED: u16 = 440;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectClass {
    /// Credentials are no longer valid; a fresh authentication is required.
    SessionInvalidated,
    /// Pre-empted by another session for the same account.
    Replaced,
    /// Everything else: network loss, server restart, socket error.
    Generic,
}

impl DisconnectClass {
    pub fn classify(code: Option<u16>) -> Self {
        match code {
            Some(CODE_LOGGED_OUT) => Self::SessionInvalidated,
            Some(CODE_REPLACED) => Self::Replaced,
            _ => Self::Generic,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionInvalidated => "session_invalidated",
            Self::Replaced => "replaced",
            Self::Generic => "generic",
        }
    }
}

impl std::fmt::Display for DisconnectClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Supervisor → application
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lifecycle notices for the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportNotice {
    /// Show this code to the operator so they can link the account.
    AuthCode(String),
    Opened { generation: Generation },
    Closed {
        generation: Generation,
        class: DisconnectClass,
    },
    /// Replaced-session reconnects gave up.  Nothing further is scheduled.
    ReconnectCeilingExceeded { attempts: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A live message from the current connection.
    Message(IncomingMessage),
    Notice(TransportNotice),
}
