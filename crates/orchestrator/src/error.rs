//! Failure taxonomy surfaced to callers of [`Orchestrator::submit`](crate::Orchestrator::submit).

use std::time::Duration;

/// Terminal outcome of a failed request.  None of these crash the bridge;
/// each fails only the request that produced it.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// The agent executable could not be found.
    #[error("agent binary not found: {0}")]
    SpawnNotFound(String),

    /// The hard timeout fired and the process was killed.
    #[error("agent timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// The agent exited unsuccessfully.  `message` is its stderr, or a
    /// generic exit-code message when stderr was empty.
    #[error("{message}")]
    NonZeroExit { code: Option<i32>, message: String },

    /// Exit 0 but nothing usable on stdout.
    #[error("agent produced no response")]
    NoResponse,

    /// Spawning failed for a reason other than a missing binary.
    #[error("failed to launch agent: {0}")]
    Launch(String),

    /// The worker running this request ended without an outcome.
    #[error("request interrupted before completion")]
    Interrupted,
}

pub type AgentResult = Result<String, AgentError>;

/// Errors from [`AgentLauncher::launch`](crate::AgentLauncher::launch).
#[derive(thiserror::Error, Debug)]
pub enum LaunchError {
    #[error("{program}: not found")]
    NotFound { program: String },

    #[error("spawning {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<LaunchError> for AgentError {
    fn from(e: LaunchError) -> Self {
        match e {
            LaunchError::NotFound { program } => AgentError::SpawnNotFound(program),
            other @ LaunchError::Io { .. } => AgentError::Launch(other.to_string()),
        }
    }
}
