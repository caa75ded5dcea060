//! The seam between the supervisor and a concrete chat protocol.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::types::{ConnectionEvent, EventKind, Generation, HandleId};

/// Where a connection reports its events.
///
/// Stamped with the generation and handle id the supervisor assigned to the
/// connection, so every event it emits can be checked against the current
/// connection before it is processed.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: Generation,
    handle_id: HandleId,
    tx: mpsc::UnboundedSender<ConnectionEvent>,
}

impl EventSink {
    pub fn new(
        generation: Generation,
        handle_id: HandleId,
        tx: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Self {
        Self {
            generation,
            handle_id,
            tx,
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// The id the connection's [`ConnectionHandle::id`] must report.
    pub fn handle_id(&self) -> HandleId {
        self.handle_id
    }

    /// Report an event.  Returns `false` once the supervisor is gone.
    pub fn emit(&self, kind: EventKind) -> bool {
        self.tx
            .send(ConnectionEvent {
                generation: self.generation,
                handle_id: self.handle_id,
                kind,
            })
            .is_ok()
    }
}

/// Opens connections and stores their credentials.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Start a connection for `generation`.  Resolves once the underlying
    /// link is established; protocol-level readiness is reported later as a
    /// `Status(open)` event on `events`.
    async fn open(
        &self,
        generation: Generation,
        events: EventSink,
    ) -> Result<Arc<dyn ConnectionHandle>, TransportError>;

    /// Save credentials reported by a credentials-update event.
    async fn persist_credentials(&self, creds: &serde_json::Value) -> Result<(), TransportError>;

    /// Discard all stored credentials.  The next `open` must authenticate
    /// from scratch.
    async fn clear_credentials(&self) -> Result<(), TransportError>;
}

/// A live connection.  Exclusively owned by the supervisor.
#[async_trait]
pub trait ConnectionHandle: Send + Sync {
    fn id(&self) -> HandleId;

    async fn send_text(&self, chat_id: &str, text: &str) -> Result<(), TransportError>;

    /// Tear the connection down.  Best effort; must not fail, and must not
    /// emit further events.
    async fn close(&self);
}
