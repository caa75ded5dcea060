//! `cb-orchestrator`: runs the external agent process on behalf of chat
//! conversations.
//!
//! # Guarantees
//!
//! - At most one agent process per conversation id at any instant.
//! - Requests for the same conversation run strictly in submission order.
//! - Different conversations run concurrently, unordered.
//!
//! # Flow per request
//!
//! ```text
//! submit(id, text) ──► ConversationQueues::admit
//!                        │ busy?  ──► queued (FIFO)
//!                        ▼
//!                  worker task: build Invocation (resume token?)
//!                        │
//!                        ▼
//!                  AgentLauncher::launch  ◄── hard timeout + heartbeat
//!                        │
//!           ┌────────────┼───────────────────────────┐
//!       exit 0       exit≠0 + "session id … in use"   exit≠0
//!   parse records     clear token, retry once        NonZeroExit
//!   store new token
//! ```

pub mod error;
pub mod invocation;
pub mod launcher;
pub mod orchestrator;
pub mod output;
pub mod queue;

pub use error::{AgentError, AgentResult, LaunchError};
pub use invocation::Invocation;
pub use launcher::{AgentExit, AgentLauncher, ProcessLauncher};
pub use orchestrator::Orchestrator;
pub use output::AgentReply;
pub use queue::{Progress, ProgressSink};
