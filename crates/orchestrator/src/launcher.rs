//! Spawning the agent process.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use crate::error::LaunchError;
use crate::invocation::Invocation;

/// What a finished agent process left behind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentExit {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl AgentExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Human-readable failure text: stderr if there is any, otherwise a
    /// generic exit-code message.
    pub fn error_text(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_owned();
        }
        match self.code {
            Some(code) => format!("agent exited with code {code}"),
            None => "agent terminated by signal".to_owned(),
        }
    }
}

/// Runs one agent invocation to completion.
///
/// Dropping the returned future must stop the process; the orchestrator
/// relies on this to enforce its hard timeout.
#[async_trait]
pub trait AgentLauncher: Send + Sync + 'static {
    async fn launch(&self, invocation: &Invocation) -> Result<AgentExit, LaunchError>;
}

/// Launches the agent as a real child process.
///
/// stdin is `/dev/null` so the agent can never block on input, and the
/// child is killed if the launch future is dropped.
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher;

#[async_trait]
impl AgentLauncher for ProcessLauncher {
    async fn launch(&self, invocation: &Invocation) -> Result<AgentExit, LaunchError> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref wd) = invocation.workdir {
            cmd.current_dir(wd);
        }

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LaunchError::NotFound {
                    program: invocation.program.clone(),
                }
            } else {
                LaunchError::Io {
                    program: invocation.program.clone(),
                    source: e,
                }
            }
        })?;

        tracing::debug!(
            program = %invocation.program,
            pid = child.id(),
            resume = invocation.is_resume(),
            "agent spawned"
        );

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // Drain both pipes while waiting so a chatty agent never stalls on
        // a full pipe buffer.
        let (stdout, stderr, status) =
            tokio::join!(drain(stdout), drain(stderr), child.wait());

        let status = status.map_err(|e| LaunchError::Io {
            program: invocation.program.clone(),
            source: e,
        })?;

        Ok(AgentExit {
            code: status.code(),
            stdout,
            stderr,
        })
    }
}

async fn drain<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            tracing::debug!(error = %e, "agent pipe read failed");
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}
