//! `chatbridge run`: one-shot execution through the orchestrator.
//!
//! Uses the same session store as `serve`, so `--conversation` can resume
//! the agent session of a chat conversation from the terminal.

use std::sync::Arc;

use cb_domain::config::Config;
use cb_orchestrator::{Progress, ProgressSink};

use crate::bootstrap;
use crate::commands::{self, CommandContext};
use crate::router::render_outcome;

/// Submit `message` for `conversation`, print the reply, exit non-zero on
/// failure.
pub async fn run(config: Arc<Config>, message: String, conversation: String) -> anyhow::Result<()> {
    let state = bootstrap::build_app_state(config)?;

    let (reply, ok) = match commands::parse(&message) {
        Some(command) => {
            let ctx = CommandContext {
                conversation_id: &conversation,
                orchestrator: &state.orchestrator,
                connection: None,
            };
            (commands::execute(&command, &ctx), true)
        }
        None => {
            let progress: ProgressSink = Arc::new(|p: Progress| {
                eprintln!("\x1b[2m[still working, {}s]\x1b[0m", p.elapsed.as_secs());
            });
            let outcome = state
                .orchestrator
                .submit(&conversation, message, Some(progress))
                .await;
            let ok = outcome.is_ok();
            (render_outcome(&outcome), ok)
        }
    };

    println!("{reply}");

    if let Err(e) = state.sessions.flush() {
        tracing::warn!(error = %e, "session store flush on exit failed");
    }

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
