//! The agent process orchestrator.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use parking_lot::RwLock;
use tokio::time::{Instant, MissedTickBehavior};

use cb_domain::config::AgentConfig;
use cb_domain::trace::TraceEvent;
use cb_sessions::SessionStore;

use crate::error::{AgentError, AgentResult};
use crate::invocation::Invocation;
use crate::launcher::{AgentExit, AgentLauncher};
use crate::output::{fallback_text, is_lock_contention, parse_reply};
use crate::queue::{Admission, ConversationQueues, PendingRequest, Progress, ProgressSink};

/// Serializes agent runs per conversation and manages session continuity.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    config: AgentConfig,
    launcher: Arc<dyn AgentLauncher>,
    sessions: Arc<SessionStore>,
    queues: ConversationQueues,
    workdir: RwLock<Option<PathBuf>>,
}

impl Orchestrator {
    pub fn new(
        config: AgentConfig,
        launcher: Arc<dyn AgentLauncher>,
        sessions: Arc<SessionStore>,
    ) -> Self {
        let workdir = config.workdir.clone();
        Self {
            inner: Arc::new(Inner {
                config,
                launcher,
                sessions,
                queues: ConversationQueues::new(),
                workdir: RwLock::new(workdir),
            }),
        }
    }

    /// Submit `text` for `conversation_id`.
    ///
    /// The request is admitted synchronously, before this returns, so the
    /// order of `submit` calls is the execution order for a conversation.
    /// The returned future resolves with the agent's reply once the request
    /// has run; it may be dropped without cancelling the run.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(
        &self,
        conversation_id: &str,
        text: impl Into<String>,
        progress: Option<ProgressSink>,
    ) -> impl Future<Output = AgentResult> + Send + 'static {
        let (req, rx) = PendingRequest::new(text.into(), progress);

        match self.inner.queues.admit(conversation_id, req) {
            Admission::Run(req) => {
                tracing::debug!(
                    conversation_id,
                    request_id = %req.request_id,
                    "conversation idle, starting worker"
                );
                let inner = self.inner.clone();
                let id = conversation_id.to_owned();
                tokio::spawn(async move { inner.drain(id, req).await });
            }
            Admission::Queued { position } => {
                tracing::debug!(conversation_id, position, "conversation busy, request queued");
            }
        }

        async move { rx.await.unwrap_or(Err(AgentError::Interrupted)) }
    }

    /// Whether an agent process is running for the conversation.
    pub fn is_busy(&self, conversation_id: &str) -> bool {
        self.inner.queues.is_busy(conversation_id)
    }

    /// Requests waiting behind the running one.
    pub fn queue_depth(&self, conversation_id: &str) -> usize {
        self.inner.queues.depth(conversation_id)
    }

    /// Forget the conversation's agent session; the next request starts a
    /// fresh one.  Returns whether a token was on file.
    pub fn reset_session(&self, conversation_id: &str, reason: &str) -> bool {
        match self.inner.sessions.clear(conversation_id, reason) {
            Ok(removed) => removed.is_some(),
            Err(e) => {
                tracing::warn!(conversation_id, error = %e, "failed to persist session reset");
                // The in-memory mapping was already cleared.
                true
            }
        }
    }

    /// The session token on file for a conversation.
    pub fn session_token(&self, conversation_id: &str) -> Option<String> {
        self.inner.sessions.get(conversation_id)
    }

    /// Directory agents are spawned in (`None` = the bridge's own cwd).
    pub fn workdir(&self) -> Option<PathBuf> {
        self.inner.workdir.read().clone()
    }

    /// Change the spawn directory for subsequent runs.
    pub fn set_workdir(&self, dir: &Path) {
        *self.inner.workdir.write() = Some(dir.to_path_buf());
        tracing::info!(workdir = %dir.display(), "agent working directory changed");
    }

    pub fn config(&self) -> &AgentConfig {
        &self.inner.config
    }
}

impl Inner {
    /// Conversation worker: run `first`, then every request queued behind
    /// it, until the queue is empty and the conversation goes idle.
    async fn drain(self: Arc<Self>, conversation_id: String, first: PendingRequest) {
        let mut next = Some(first);
        while let Some(mut req) = next {
            let started = Instant::now();
            let resumed = self.sessions.get(&conversation_id).is_some();
            let outcome = AssertUnwindSafe(self.execute(&conversation_id, &mut req))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    tracing::error!(
                        conversation_id = %conversation_id,
                        request_id = %req.request_id,
                        "agent run panicked"
                    );
                    Err(AgentError::Interrupted)
                });

            TraceEvent::AgentRunCompleted {
                conversation_id: conversation_id.clone(),
                request_id: req.request_id.clone(),
                outcome: match &outcome {
                    Ok(_) => "ok".into(),
                    Err(e) => e.to_string(),
                },
                duration_ms: started.elapsed().as_millis() as u64,
                resumed,
            }
            .emit();

            req.resolve(outcome);
            next = self.queues.next(&conversation_id);
        }
        tracing::debug!(conversation_id = %conversation_id, "conversation idle");
    }

    /// Run one request to a terminal outcome, including the single retry
    /// after session-lock contention.
    async fn execute(&self, conversation_id: &str, req: &mut PendingRequest) -> AgentResult {
        loop {
            let token = self.sessions.get(conversation_id);
            let workdir = self.workdir.read().clone();
            let invocation =
                Invocation::build(&self.config, workdir.as_deref(), token.as_deref(), &req.text);

            tracing::info!(
                conversation_id,
                request_id = %req.request_id,
                resume = invocation.is_resume(),
                retry = req.recovery_attempted,
                "starting agent run"
            );

            let exit = self.run_with_deadline(conversation_id, req, &invocation).await?;

            if !exit.success() {
                let contended = is_lock_contention(&exit.stderr) || is_lock_contention(&exit.stdout);
                if let (true, Some(stale), false) = (contended, &token, req.recovery_attempted) {
                    tracing::warn!(
                        conversation_id,
                        request_id = %req.request_id,
                        stale_token = %stale,
                        "agent session locked by another process; retrying with a fresh session"
                    );
                    if let Err(e) = self.sessions.clear(conversation_id, "session lock contention") {
                        tracing::warn!(conversation_id, error = %e, "failed to persist session reset");
                    }
                    TraceEvent::LockContentionRecovered {
                        conversation_id: conversation_id.to_owned(),
                        request_id: req.request_id.clone(),
                        stale_token: stale.clone(),
                    }
                    .emit();
                    req.recovery_attempted = true;
                    continue;
                }

                tracing::warn!(
                    conversation_id,
                    request_id = %req.request_id,
                    exit_code = exit.code,
                    "agent exited unsuccessfully"
                );
                return Err(AgentError::NonZeroExit {
                    code: exit.code,
                    message: exit.error_text(),
                });
            }

            return self.interpret(conversation_id, &exit);
        }
    }

    /// Turn a successful exit into a reply, storing any new session token.
    fn interpret(&self, conversation_id: &str, exit: &AgentExit) -> AgentResult {
        match parse_reply(&exit.stdout) {
            Some(reply) => {
                if let Some(ref sid) = reply.session_id {
                    if let Err(e) = self.sessions.set(conversation_id, sid) {
                        tracing::warn!(conversation_id, error = %e, "failed to persist session token");
                    }
                }
                Ok(reply.text)
            }
            None => match fallback_text(&exit.stdout, self.config.fallback_max_chars) {
                Some(text) => {
                    tracing::warn!(
                        conversation_id,
                        stdout_bytes = exit.stdout.len(),
                        "no result record in agent output; replying with raw text"
                    );
                    Ok(text)
                }
                None => Err(AgentError::NoResponse),
            },
        }
    }

    /// Launch and wait, enforcing the hard timeout and emitting heartbeats.
    ///
    /// On timeout the launch future is dropped, which kills the process.
    async fn run_with_deadline(
        &self,
        conversation_id: &str,
        req: &PendingRequest,
        invocation: &Invocation,
    ) -> Result<AgentExit, AgentError> {
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let period = Duration::from_secs(self.config.heartbeat_secs.max(1));
        let started = Instant::now();

        let run = self.launcher.launch(invocation);
        tokio::pin!(run);
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let mut heartbeat = tokio::time::interval_at(started + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                result = &mut run => return result.map_err(AgentError::from),
                _ = &mut deadline => {
                    tracing::warn!(
                        conversation_id,
                        request_id = %req.request_id,
                        timeout_secs = timeout.as_secs(),
                        "agent run timed out, killing process"
                    );
                    return Err(AgentError::Timeout(timeout));
                }
                _ = heartbeat.tick() => {
                    let elapsed = started.elapsed();
                    tracing::debug!(
                        conversation_id,
                        request_id = %req.request_id,
                        elapsed_secs = elapsed.as_secs(),
                        "agent still running"
                    );
                    if let Some(ref sink) = req.progress {
                        sink(Progress {
                            conversation_id: conversation_id.to_owned(),
                            request_id: req.request_id.clone(),
                            elapsed,
                        });
                    }
                }
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
