use std::path::Path;

// ── Public entry point ───────────────────────────────────────────────

/// Write a commented default `config.toml` in the current directory.
pub fn init(force: bool) -> anyhow::Result<()> {
    init_in(Path::new("."), force)
}

// ── Core implementation (directory-parameterised for testability) ─────

fn init_in(base: &Path, force: bool) -> anyhow::Result<()> {
    let config_path = base.join("config.toml");

    if config_path.exists() && !force {
        anyhow::bail!("config.toml already exists. Use --force to overwrite it.");
    }

    std::fs::write(&config_path, render_config())?;

    eprintln!();
    eprintln!("  chatbridge config written to {}", config_path.display());
    eprintln!();
    eprintln!("  Next steps:");
    eprintln!("    1. Set [bridge] self_id to your own chat identity");
    eprintln!("    2. Start the chat sidecar (or set transport.kind = \"console\")");
    eprintln!("    3. chatbridge serve");
    eprintln!();

    Ok(())
}

// ── Template rendering ───────────────────────────────────────────────

fn render_config() -> String {
    r#"# chatbridge configuration
# Every key is optional; the values shown are the defaults.

[agent]
binary = "claude"
# model = "sonnet"
skip_permissions = true
# workdir = "/path/to/project"
timeout_secs = 14400
heartbeat_secs = 30
fallback_max_chars = 4000
extra_args = []

[transport]
kind = "sidecar"          # or "console"
sidecar_url = "ws://127.0.0.1:8765/"
# auth_dir = "~/.chatbridge/auth"

[transport.reconnect]
generic_base_ms = 2000
max_delay_ms = 60000
replaced_step_ms = 10000
replaced_max_attempts = 10
logged_out_delay_ms = 3000
stability_threshold_ms = 20000
connect_timeout_ms = 20000

[bridge]
# The only conversation the bridge acts on: your own chat ("message yourself").
self_id = ""
alt_ids = []
max_message_chars = 4000
progress_notices = true

[state]
# dir = "~/.chatbridge"

[observability]
log_format = "json"       # or "compact"
# otlp_endpoint = "http://localhost:4317"
service_name = "chatbridge"
sample_rate = 1.0
"#
    .to_owned()
}

// ── Tests ────────────────────────────────────────────────────────────
