//! Per-conversation single-flight gate with an explicit FIFO waiter list.
//!
//! Each conversation id maps to a [`ConversationQueue`].  The `busy` flag is
//! the mutex; `pending` holds requests that arrived while busy.  Whoever
//! clears `busy` (the conversation's worker, via [`ConversationQueues::next`])
//! is also the one who hands the next request out, so the check-and-pop is
//! a single critical section and ordering cannot be lost.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::AgentResult;

/// Heartbeat delivered while an agent run is still going.
#[derive(Debug, Clone)]
pub struct Progress {
    pub conversation_id: String,
    pub request_id: String,
    pub elapsed: Duration,
}

/// Callback for heartbeats.  Must not block; spawn if it needs to do I/O.
pub type ProgressSink = Arc<dyn Fn(Progress) + Send + Sync>;

/// A submitted request waiting for (or undergoing) execution.
pub struct PendingRequest {
    pub request_id: String,
    pub text: String,
    pub progress: Option<ProgressSink>,
    /// Set once this request has been retried after clearing a stale
    /// session token.  Guards against retry loops.
    pub recovery_attempted: bool,
    outcome: oneshot::Sender<AgentResult>,
}

impl PendingRequest {
    pub fn new(
        text: String,
        progress: Option<ProgressSink>,
    ) -> (Self, oneshot::Receiver<AgentResult>) {
        let (tx, rx) = oneshot::channel();
        let req = Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            text,
            progress,
            recovery_attempted: false,
            outcome: tx,
        };
        (req, rx)
    }

    /// Fulfil the request.  A caller that stopped waiting is not an error.
    pub fn resolve(self, outcome: AgentResult) {
        if self.outcome.send(outcome).is_err() {
            tracing::debug!(request_id = %self.request_id, "submitter dropped before outcome");
        }
    }
}

/// Serialization state for one conversation.
#[derive(Default)]
pub struct ConversationQueue {
    pub busy: bool,
    pub pending: VecDeque<PendingRequest>,
}

/// Result of [`ConversationQueues::admit`].
pub enum Admission {
    /// The conversation was idle; it is now busy and the caller must run
    /// this request.
    Run(PendingRequest),
    /// Queued behind a running request, at this 1-based position.
    Queued { position: usize },
}

/// All conversations' queues.  Entries are created lazily and live for the
/// process lifetime.
#[derive(Default)]
pub struct ConversationQueues {
    queues: Mutex<HashMap<String, ConversationQueue>>,
}

impl ConversationQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a request: run it now if the conversation is idle, otherwise
    /// append it to the waiter list.
    pub fn admit(&self, conversation_id: &str, req: PendingRequest) -> Admission {
        let mut queues = self.queues.lock();
        let queue = queues.entry(conversation_id.to_owned()).or_default();
        if queue.busy {
            queue.pending.push_back(req);
            Admission::Queued {
                position: queue.pending.len(),
            }
        } else {
            queue.busy = true;
            Admission::Run(req)
        }
    }

    /// Hand out the next waiter, or mark the conversation idle when there
    /// is none.  Only the conversation's current worker calls this.
    pub fn next(&self, conversation_id: &str) -> Option<PendingRequest> {
        let mut queues = self.queues.lock();
        let queue = queues.get_mut(conversation_id)?;
        let next = queue.pending.pop_front();
        if next.is_none() {
            queue.busy = false;
        }
        next
    }

    pub fn is_busy(&self, conversation_id: &str) -> bool {
        self.queues
            .lock()
            .get(conversation_id)
            .map(|q| q.busy)
            .unwrap_or(false)
    }

    /// Requests waiting behind the running one.
    pub fn depth(&self, conversation_id: &str) -> usize {
        self.queues
            .lock()
            .get(conversation_id)
            .map(|q| q.pending.len())
            .unwrap_or(0)
    }

    /// Number of conversations ever seen.
    pub fn conversation_count(&self) -> usize {
        self.queues.lock().len()
    }
}
