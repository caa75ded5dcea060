//! WebSocket sidecar connector.
//!
//! The chat protocol runs in a sidecar process; this side exchanges JSON
//! frames with it over one WebSocket per connection generation.
//!
//! ```text
//! bridge ──hello {creds?}──────────────► sidecar
//! bridge ◄──connection.update {connection?, code?, qr?}
//! bridge ◄──creds.update {creds}
//! bridge ◄──messages.upsert {kind, messages}
//! bridge ──send {chat_id, text}────────► sidecar
//! ```
//!
//! A socket that ends without the sidecar first reporting `close` is
//! surfaced as a close with no code, which classifies as a generic drop.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::connector::{ConnectionHandle, Connector, EventSink};
use crate::credentials::CredentialStore;
use crate::error::TransportError;
use crate::types::{
    ConnectionStatus, EventKind, Generation, HandleId, IncomingMessage, MessageBatch,
    StatusUpdate,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Outbound queue depth per connection.
const OUTBOUND_CAPACITY: usize = 64;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire frames
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SidecarFrame {
    #[serde(rename = "connection.update")]
    ConnectionUpdate(StatusUpdate),

    #[serde(rename = "creds.update")]
    CredsUpdate { creds: serde_json::Value },

    #[serde(rename = "messages.upsert")]
    MessagesUpsert {
        kind: MessageBatch,
        #[serde(default)]
        messages: Vec<IncomingMessage>,
    },

    /// First frame on every connection.
    #[serde(rename = "hello")]
    Hello {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        creds: Option<serde_json::Value>,
    },

    #[serde(rename = "send")]
    Send { chat_id: String, text: String },
}

impl SidecarFrame {
    /// The supervisor event an inbound frame carries, if any.
    pub fn into_event(self) -> Option<EventKind> {
        match self {
            Self::ConnectionUpdate(update) => Some(EventKind::Status(update)),
            Self::CredsUpdate { creds } => Some(EventKind::Credentials(creds)),
            Self::MessagesUpsert { kind, messages } => Some(EventKind::Messages {
                batch: kind,
                messages,
            }),
            Self::Hello { .. } | Self::Send { .. } => None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Connector
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SidecarConnector {
    url: String,
    credentials: CredentialStore,
}

impl SidecarConnector {
    pub fn new(url: impl Into<String>, credentials: CredentialStore) -> Self {
        Self {
            url: url.into(),
            credentials,
        }
    }
}

#[async_trait]
impl Connector for SidecarConnector {
    async fn open(
        &self,
        generation: Generation,
        events: EventSink,
    ) -> Result<Arc<dyn ConnectionHandle>, TransportError> {
        tracing::info!(url = %self.url, generation, "connecting to sidecar");

        let (ws, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (mut sink, stream) = ws.split();

        // ── Send hello ───────────────────────────────────────────────
        let creds = self.credentials.load().await;
        tracing::debug!(generation, has_creds = creds.is_some(), "sending hello");
        let hello = serde_json::to_string(&SidecarFrame::Hello { creds })
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        sink.send(Message::Text(hello))
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        // ── Reader + writer tasks ────────────────────────────────────
        let (outbound_tx, outbound_rx) = mpsc::channel::<SidecarFrame>(OUTBOUND_CAPACITY);
        let cancel = CancellationToken::new();
        tokio::spawn(write_loop(sink, outbound_rx, cancel.clone()));
        tokio::spawn(read_loop(stream, events.clone(), cancel.clone()));

        Ok(Arc::new(SidecarHandle {
            id: events.handle_id(),
            outbound: outbound_tx,
            cancel,
        }))
    }

    async fn persist_credentials(&self, creds: &serde_json::Value) -> Result<(), TransportError> {
        self.credentials.save(creds).await
    }

    async fn clear_credentials(&self) -> Result<(), TransportError> {
        self.credentials.clear().await
    }
}

struct SidecarHandle {
    id: HandleId,
    outbound: mpsc::Sender<SidecarFrame>,
    cancel: CancellationToken,
}

#[async_trait]
impl ConnectionHandle for SidecarHandle {
    fn id(&self) -> HandleId {
        self.id
    }

    async fn send_text(&self, chat_id: &str, text: &str) -> Result<(), TransportError> {
        let frame = SidecarFrame::Send {
            chat_id: chat_id.to_owned(),
            text: text.to_owned(),
        };
        self.outbound
            .send(frame)
            .await
            .map_err(|_| TransportError::NotConnected)
    }

    async fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for SidecarHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut outbound: mpsc::Receiver<SidecarFrame>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                let json = match serde_json::to_string(&frame) {
                    Ok(j) => j,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to serialize outbound frame");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(json)).await {
                    tracing::debug!(error = %e, "sidecar write failed");
                    break;
                }
            }
        }
    }
}

async fn read_loop(mut stream: SplitStream<WsStream>, events: EventSink, cancel: CancellationToken) {
    let mut reported_close = false;

    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => return,
            msg = stream.next() => msg,
        };
        match msg {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<SidecarFrame>(&text) {
                Ok(frame) => {
                    let Some(kind) = frame.into_event() else {
                        tracing::debug!("ignoring outbound-only frame from sidecar");
                        continue;
                    };
                    if matches!(
                        &kind,
                        EventKind::Status(StatusUpdate {
                            connection: Some(ConnectionStatus::Close),
                            ..
                        })
                    ) {
                        reported_close = true;
                    }
                    if !events.emit(kind) {
                        return;
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "unrecognized sidecar frame");
                }
            },
            Some(Ok(Message::Close(frame))) => {
                tracing::info!(generation = events.generation(), ?frame, "sidecar closed connection");
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::warn!(generation = events.generation(), error = %e, "sidecar socket error");
                break;
            }
            None => break,
        }
    }

    if !reported_close && !cancel.is_cancelled() {
        events.emit(EventKind::Status(StatusUpdate::closed(None)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_connection_update() {
        let frame: SidecarFrame =
            serde_json::from_str(r#"{"type":"connection.update","connection":"close","code":440}"#)
                .unwrap();
        assert_eq!(
            frame.into_event(),
            Some(EventKind::Status(StatusUpdate::closed(Some(440))))
        );

        let qr: SidecarFrame =
            serde_json::from_str(r#"{"type":"connection.update","qr":"2@abc"}"#).unwrap();
        match qr.into_event() {
            Some(EventKind::Status(update)) => {
                assert_eq!(update.qr.as_deref(), Some("2@abc"));
                assert!(update.connection.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_messages_upsert() {
        let raw = r#"{
            "type": "messages.upsert",
            "kind": "notify",
            "messages": [
                {"chat_id": "1555@s.whatsapp.net", "from_me": true, "text": "hi"},
                {"chat_id": "1203@g.us", "sender_id": "1666@s.whatsapp.net", "is_group": true}
            ]
        }"#;
        let frame: SidecarFrame = serde_json::from_str(raw).unwrap();
        match frame.into_event() {
            Some(EventKind::Messages { batch, messages }) => {
                assert_eq!(batch, MessageBatch::Live);
                assert_eq!(messages.len(), 2);
                assert_eq!(messages[0].text.as_deref(), Some("hi"));
                assert!(messages[1].is_group);
                assert!(!messages[1].from_me);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn hello_omits_missing_creds() {
        let json = serde_json::to_value(SidecarFrame::Hello { creds: None }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "hello"}));

        let send = serde_json::to_value(SidecarFrame::Send {
            chat_id: "c".into(),
            text: "t".into(),
        })
        .unwrap();
        assert_eq!(send, serde_json::json!({"type": "send", "chat_id": "c", "text": "t"}));
    }

    #[test]
    fn outbound_frames_carry_no_event() {
        assert!(SidecarFrame::Hello { creds: None }.into_event().is_none());
    }
}
