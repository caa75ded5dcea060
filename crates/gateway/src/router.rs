//! Message router: the glue between the transport and the orchestrator.
//!
//! ```text
//! TransportEvent::Message ──► screen ──► command? ──► execute locally
//!                                │            └──► Orchestrator::submit
//!                                ▼                        │
//!                              ignored          reply / "Error: …"
//!                                                         │
//!                                      to_chat + chunk ──► ReplySink
//! ```
//!
//! Only the operator's own messages in the one authorized conversation are
//! acted on.  Submission happens inline on the event loop so a
//! conversation's messages reach the orchestrator in arrival order; waiting
//! for the reply and sending it happen on a spawned task.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use cb_domain::config::BridgeConfig;
use cb_orchestrator::{AgentResult, Progress, ProgressSink};
use cb_transport::{
    ConnectionSnapshot, IncomingMessage, Supervisor, TransportError, TransportEvent,
    TransportNotice,
};

use crate::commands::{self, CommandContext};
use crate::format;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outbound seam
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where replies go.
#[async_trait]
pub trait ReplySink: Send + Sync + 'static {
    async fn send_text(&self, chat_id: &str, text: &str) -> Result<(), TransportError>;

    /// Connection state for `/status`.
    fn connection(&self) -> Option<ConnectionSnapshot> {
        None
    }
}

#[async_trait]
impl ReplySink for Supervisor {
    async fn send_text(&self, chat_id: &str, text: &str) -> Result<(), TransportError> {
        Supervisor::send_text(self, chat_id, text).await
    }

    fn connection(&self) -> Option<ConnectionSnapshot> {
        Some(self.snapshot())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Screening
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Why an inbound message was not acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    /// Status broadcasts, channels and other pseudo-conversations.
    Broadcast,
    Group,
    /// Written by someone other than the operator.
    NotFromMe,
    /// The operator writing in some other conversation.
    Unauthorized,
    Empty,
}

/// Accept a message and return its trimmed text, or say why it is ignored.
pub fn screen<'a>(bridge: &BridgeConfig, msg: &'a IncomingMessage) -> Result<&'a str, Skip> {
    let chat = msg.chat_id.as_str();
    if chat.ends_with("@broadcast") || chat.ends_with("@newsletter") {
        return Err(Skip::Broadcast);
    }
    if msg.is_group || chat.ends_with("@g.us") {
        return Err(Skip::Group);
    }
    if !msg.from_me {
        return Err(Skip::NotFromMe);
    }
    if !bridge.is_authorized(chat) {
        return Err(Skip::Unauthorized);
    }
    match msg.text.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() => Ok(text),
        _ => Err(Skip::Empty),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Router
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
pub struct Router {
    state: AppState,
    replies: Arc<dyn ReplySink>,
}

impl Router {
    pub fn new(state: AppState, replies: Arc<dyn ReplySink>) -> Self {
        Self { state, replies }
    }

    /// Process transport events until `shutdown` resolves or the event
    /// stream ends.  Replies still in flight keep running on their tasks.
    pub async fn run(
        self,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
        shutdown: impl Future<Output = ()>,
    ) {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                event = events.recv() => match event {
                    Some(event) => {
                        self.handle_event(event);
                    }
                    None => {
                        tracing::info!("transport event stream ended");
                        break;
                    }
                },
            }
        }
        tracing::debug!("router stopped");
    }

    /// Handle one event.  Returns the reply task, if one was started.
    pub fn handle_event(&self, event: TransportEvent) -> Option<JoinHandle<()>> {
        match event {
            TransportEvent::Message(msg) => self.handle_message(msg),
            TransportEvent::Notice(notice) => {
                handle_notice(notice);
                None
            }
        }
    }

    pub fn handle_message(&self, msg: IncomingMessage) -> Option<JoinHandle<()>> {
        let bridge = &self.state.config.bridge;
        let text = match screen(bridge, &msg) {
            Ok(text) => text,
            Err(skip) => {
                tracing::debug!(chat_id = %msg.chat_id, reason = ?skip, "message ignored");
                return None;
            }
        };
        let chat_id = msg.chat_id.clone();
        let max_chars = bridge.max_message_chars;
        let replies = self.replies.clone();

        if let Some(command) = commands::parse(text) {
            tracing::info!(conversation_id = %chat_id, ?command, "local command");
            let ctx = CommandContext {
                conversation_id: &chat_id,
                orchestrator: &self.state.orchestrator,
                connection: self.replies.connection(),
            };
            let reply = commands::execute(&command, &ctx);
            return Some(tokio::spawn(async move {
                deliver(replies.as_ref(), &chat_id, &reply, max_chars).await;
            }));
        }

        tracing::info!(conversation_id = %chat_id, chars = text.chars().count(), "forwarding to agent");
        let (notices, mut notice_rx) = mpsc::unbounded_channel();
        let progress = bridge.progress_notices.then(|| progress_sink(notices));
        let outcome = self.state.orchestrator.submit(&chat_id, text, progress);

        // Notices go out on this task so none can trail the reply; any still
        // queued once the outcome is in are dropped.
        Some(tokio::spawn(async move {
            tokio::pin!(outcome);
            let outcome = loop {
                tokio::select! {
                    biased;
                    outcome = &mut outcome => break outcome,
                    Some(text) = notice_rx.recv() => {
                        if let Err(e) = replies.send_text(&chat_id, &text).await {
                            tracing::debug!(chat_id = %chat_id, error = %e, "progress notice not sent");
                        }
                    }
                }
            };
            let reply = render_outcome(&outcome);
            deliver(replies.as_ref(), &chat_id, &reply, max_chars).await;
        }))
    }
}

/// Heartbeats become "still working" texts for the request's reply task.
fn progress_sink(notices: mpsc::UnboundedSender<String>) -> ProgressSink {
    Arc::new(move |progress: Progress| {
        // The reply task is gone once the outcome is in.
        let _ = notices.send(progress_text(progress.elapsed));
    })
}

fn handle_notice(notice: TransportNotice) {
    match notice {
        TransportNotice::AuthCode(code) => {
            tracing::info!("authentication required, pairing code issued");
            eprintln!();
            eprintln!("  Link this bridge from the chat app using the pairing code:");
            eprintln!();
            eprintln!("  {code}");
            eprintln!();
        }
        TransportNotice::Opened { generation } => {
            tracing::info!(generation, "chat connection open");
        }
        TransportNotice::Closed { generation, class } => {
            tracing::info!(generation, %class, "chat connection closed");
        }
        TransportNotice::ReconnectCeilingExceeded { attempts } => {
            tracing::error!(
                attempts,
                "session keeps being replaced by another client; reconnecting stopped, restart required"
            );
        }
    }
}

/// The chat text for an agent outcome.
pub fn render_outcome(outcome: &AgentResult) -> String {
    match outcome {
        Ok(text) if text.trim().is_empty() => "(no output)".into(),
        Ok(text) => format::to_chat(text),
        Err(e) => format!("Error: {e}"),
    }
}

fn progress_text(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    if secs < 60 {
        format!("Still working... ({secs}s)")
    } else {
        format!("Still working... ({}m {}s)", secs / 60, secs % 60)
    }
}

/// Send `text` in chunks, in order.  Stops at the first failed chunk.
async fn deliver(replies: &dyn ReplySink, chat_id: &str, text: &str, max_chars: usize) {
    for (i, piece) in format::chunk(text, max_chars).iter().enumerate() {
        if let Err(e) = replies.send_text(chat_id, piece).await {
            tracing::warn!(chat_id, chunk = i, error = %e, "failed to send reply");
            return;
        }
    }
}
