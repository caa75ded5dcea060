pub mod config;
pub mod init;
pub mod pid;
pub mod run;

use clap::{Parser, Subcommand};

/// chatbridge: relays a chat conversation to a local agent process.
#[derive(Debug, Parser)]
#[command(name = "chatbridge", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Connect to the chat transport and relay messages (default when no
    /// subcommand is given).
    Serve,
    /// Send a single message to the agent and print the reply.
    Run {
        /// The message to send.
        message: String,
        /// Conversation id whose agent session is used.
        #[arg(long, default_value = "cli:run")]
        conversation: String,
    },
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Write a default config.toml in the current directory.
    Init {
        /// Overwrite an existing config.toml.
        #[arg(long)]
        force: bool,
    },
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path in `CB_CONFIG` (or `config.toml`
/// by default).  A missing file means all defaults.  Returns the parsed
/// [`Config`](cb_domain::config::Config) and the path that was used.
pub fn load_config() -> anyhow::Result<(cb_domain::config::Config, String)> {
    let config_path = std::env::var("CB_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let config = load_config_from(std::path::Path::new(&config_path))?;
    Ok((config, config_path))
}

pub fn load_config_from(path: &std::path::Path) -> anyhow::Result<cb_domain::config::Config> {
    if !path.exists() {
        return Ok(cb_domain::config::Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
    toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {}: {e}", path.display()))
}
