//! Command line for one agent run.

use std::path::{Path, PathBuf};

use cb_domain::config::AgentConfig;

/// A fully-resolved agent command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub workdir: Option<PathBuf>,
    /// The session token passed via `--resume`, if any.
    pub resume_token: Option<String>,
}

impl Invocation {
    /// Build the invocation for `prompt`.
    ///
    /// Layout: `-p --output-format stream-json --verbose [--resume T]
    /// [--dangerously-skip-permissions] [--model M] [extra…] -- <prompt>`.
    /// The `--` keeps a prompt that starts with `-` from being read as a flag.
    pub fn build(
        config: &AgentConfig,
        workdir: Option<&Path>,
        resume_token: Option<&str>,
        prompt: &str,
    ) -> Self {
        let mut args: Vec<String> = vec![
            "-p".into(),
            "--output-format".into(),
            "stream-json".into(),
            "--verbose".into(),
        ];

        if let Some(token) = resume_token {
            args.push("--resume".into());
            args.push(token.to_owned());
        }
        if config.skip_permissions {
            args.push("--dangerously-skip-permissions".into());
        }
        if let Some(model) = config.model.as_deref().filter(|m| !m.is_empty()) {
            args.push("--model".into());
            args.push(model.to_owned());
        }
        args.extend(config.extra_args.iter().cloned());
        args.push("--".into());
        args.push(prompt.to_owned());

        Self {
            program: config.binary.clone(),
            args,
            workdir: workdir.map(Path::to_path_buf),
            resume_token: resume_token.map(str::to_owned),
        }
    }

    pub fn is_resume(&self) -> bool {
        self.resume_token.is_some()
    }

    /// The prompt text (always the final argument).
    pub fn prompt(&self) -> &str {
        self.args.last().map(String::as_str).unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_session_has_no_resume_flag() {
        let inv = Invocation::build(&AgentConfig::default(), None, None, "hello");
        assert!(!inv.args.iter().any(|a| a == "--resume"));
        assert!(!inv.is_resume());
        assert_eq!(inv.program, "claude");
        assert_eq!(inv.prompt(), "hello");
    }

    #[test]
    fn resume_token_follows_flag() {
        let inv = Invocation::build(&AgentConfig::default(), None, Some("s1"), "again");
        let pos = inv.args.iter().position(|a| a == "--resume").unwrap();
        assert_eq!(inv.args[pos + 1], "s1");
        assert_eq!(inv.resume_token.as_deref(), Some("s1"));
    }

    #[test]
    fn structured_output_requested() {
        let inv = Invocation::build(&AgentConfig::default(), None, None, "x");
        let pos = inv.args.iter().position(|a| a == "--output-format").unwrap();
        assert_eq!(inv.args[pos + 1], "stream-json");
    }

    #[test]
    fn model_and_permission_flags_follow_config() {
        let cfg = AgentConfig {
            model: Some("opus".into()),
            skip_permissions: false,
            extra_args: vec!["--add-dir".into(), "/srv".into()],
            ..Default::default()
        };
        let inv = Invocation::build(&cfg, Some(Path::new("/work")), None, "x");
        assert!(!inv.args.iter().any(|a| a == "--dangerously-skip-permissions"));
        let pos = inv.args.iter().position(|a| a == "--model").unwrap();
        assert_eq!(inv.args[pos + 1], "opus");
        assert!(inv.args.windows(2).any(|w| w == ["--add-dir", "/srv"]));
        assert_eq!(inv.workdir.as_deref(), Some(Path::new("/work")));
    }

    #[test]
    fn dash_prompt_is_separated() {
        let inv = Invocation::build(&AgentConfig::default(), None, None, "--help me");
        let n = inv.args.len();
        assert_eq!(inv.args[n - 2], "--");
        assert_eq!(inv.args[n - 1], "--help me");
    }
}
