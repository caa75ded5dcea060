//! Local commands typed into the authorized conversation.
//!
//! These are answered by the bridge itself and never reach the agent.
//! Matching is case-insensitive on the command words; arguments (paths)
//! keep their case.

use std::path::{Path, PathBuf};

use cb_orchestrator::Orchestrator;
use cb_transport::ConnectionSnapshot;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/clear`: forget the agent session.
    Clear,
    /// `/session new` or `/session reset`.
    NewSession,
    /// `/project` with no argument.
    ShowProject,
    /// `/project <path>`: change directory and start a fresh session.
    SetProject(String),
    Help,
    Status,
}

/// Recognize a command.  `None` means the text goes to the agent.
pub fn parse(text: &str) -> Option<Command> {
    let text = text.trim();
    if !text.starts_with('/') {
        return None;
    }

    let (head, arg) = match text.split_once(char::is_whitespace) {
        Some((head, arg)) => (head, arg.trim()),
        None => (text, ""),
    };

    match head.to_ascii_lowercase().as_str() {
        "/clear" if arg.is_empty() => Some(Command::Clear),
        "/session" => match arg.to_ascii_lowercase().as_str() {
            "new" | "reset" => Some(Command::NewSession),
            _ => Some(Command::Help),
        },
        "/project" if arg.is_empty() => Some(Command::ShowProject),
        "/project" => Some(Command::SetProject(arg.to_owned())),
        "/help" => Some(Command::Help),
        "/status" => Some(Command::Status),
        _ => None,
    }
}

pub const HELP: &str = "\
Commands:
/clear - forget the current agent session
/session new | /session reset - start a fresh agent session
/project - show the agent's working directory
/project <path> - change working directory (starts a fresh session)
/status - connection and queue state
/help - this message

Anything else is sent to the agent.";

/// What a command needs from the running bridge.
pub struct CommandContext<'a> {
    pub conversation_id: &'a str,
    pub orchestrator: &'a Orchestrator,
    /// `None` when there is no transport (one-shot CLI use).
    pub connection: Option<ConnectionSnapshot>,
}

/// Run a command and return the reply text.
pub fn execute(command: &Command, ctx: &CommandContext<'_>) -> String {
    let id = ctx.conversation_id;
    match command {
        Command::Clear => {
            if ctx.orchestrator.reset_session(id, "clear command") {
                "Session cleared. The next message starts a fresh agent session.".into()
            } else {
                "No active session. The next message starts a fresh agent session.".into()
            }
        }
        Command::NewSession => {
            ctx.orchestrator.reset_session(id, "new session command");
            "New session started.".into()
        }
        Command::ShowProject => format!("Working directory: {}", current_dir(ctx.orchestrator).display()),
        Command::SetProject(arg) => {
            let base = current_dir(ctx.orchestrator);
            match resolve_dir(&base, arg) {
                Ok(dir) => {
                    ctx.orchestrator.set_workdir(&dir);
                    ctx.orchestrator.reset_session(id, "project changed");
                    format!("Working directory set to {}. Session reset.", dir.display())
                }
                Err(msg) => format!("Error: {msg}"),
            }
        }
        Command::Help => HELP.into(),
        Command::Status => status(ctx),
    }
}

fn current_dir(orchestrator: &Orchestrator) -> PathBuf {
    orchestrator
        .workdir()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Resolve a `/project` argument: `~` expands to the home directory,
/// relative paths are taken from the current working directory.
fn resolve_dir(base: &Path, arg: &str) -> Result<PathBuf, String> {
    let expanded = match arg.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => {
            let home = dirs::home_dir().ok_or_else(|| "cannot resolve home directory".to_owned())?;
            home.join(rest.trim_start_matches('/'))
        }
        _ => PathBuf::from(arg),
    };
    let path = if expanded.is_absolute() {
        expanded
    } else {
        base.join(expanded)
    };

    match std::fs::canonicalize(&path) {
        Ok(dir) if dir.is_dir() => Ok(dir),
        Ok(_) => Err(format!("{} is not a directory", path.display())),
        Err(_) => Err(format!("{} does not exist", path.display())),
    }
}

fn status(ctx: &CommandContext<'_>) -> String {
    let id = ctx.conversation_id;
    let orch = ctx.orchestrator;
    let mut lines = Vec::new();

    match &ctx.connection {
        Some(c) => {
            let state = if c.shutting_down {
                "shutting down"
            } else if c.is_open {
                "open"
            } else if c.halted {
                "halted (restart required)"
            } else if c.connecting {
                "connecting"
            } else if c.reconnect_pending {
                "waiting to reconnect"
            } else {
                "disconnected"
            };
            lines.push(format!("Connection: {state} (generation {})", c.generation));
            lines.push(format!("Reconnect attempts: {}", c.reconnect_attempts));
            if let Some(at) = c.last_open_at {
                let up = chrono::Utc::now().signed_duration_since(at).num_seconds().max(0);
                lines.push(format!("Last opened: {} ({up}s ago)", at.to_rfc3339()));
            }
        }
        None => lines.push("Connection: none".into()),
    }

    lines.push(format!(
        "Agent: {}",
        if orch.is_busy(id) { "running" } else { "idle" }
    ));
    lines.push(format!("Queued: {}", orch.queue_depth(id)));
    lines.push(format!(
        "Session: {}",
        orch.session_token(id).as_deref().unwrap_or("none")
    ));
    lines.push(format!("Working directory: {}", current_dir(orch).display()));

    lines.join("\n")
}
