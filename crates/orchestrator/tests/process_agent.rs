//! End-to-end runs against a real child process: a shell script standing in
//! for the agent binary.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use cb_domain::config::AgentConfig;
use cb_orchestrator::{AgentError, Orchestrator, ProcessLauncher};
use cb_sessions::SessionStore;

/// Write an executable script to `dir` and return its path.
fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn orchestrator(dir: &Path, binary: &Path, timeout_secs: u64) -> (Orchestrator, Arc<SessionStore>) {
    let config = AgentConfig {
        binary: binary.display().to_string(),
        timeout_secs,
        heartbeat_secs: 1,
        ..Default::default()
    };
    let sessions = Arc::new(SessionStore::open(dir.join("sessions.json")));
    let orch = Orchestrator::new(config, Arc::new(ProcessLauncher), sessions.clone());
    (orch, sessions)
}

#[tokio::test]
async fn stores_and_resumes_session_through_real_process() {
    let dir = tempfile::tempdir().unwrap();
    // Echo back whether --resume was given, and always hand out "s1".
    let agent = script(
        dir.path(),
        "agent",
        r#"resume=none
while [ $# -gt 0 ]; do
  case "$1" in
    --resume) resume="$2"; shift ;;
  esac
  shift
done
echo '{"type":"system","subtype":"init"}'
echo "{\"type\":\"result\",\"result\":\"resume=$resume\",\"session_id\":\"s1\"}""#,
    );
    let (orch, sessions) = orchestrator(dir.path(), &agent, 30);

    assert_eq!(orch.submit("A", "hello", None).await.unwrap(), "resume=none");
    assert_eq!(sessions.get("A").as_deref(), Some("s1"));
    assert_eq!(orch.submit("A", "again", None).await.unwrap(), "resume=s1");

    // The mapping survives a reload.
    let reloaded = SessionStore::open(dir.path().join("sessions.json"));
    assert_eq!(reloaded.get("A").as_deref(), Some("s1"));
}

#[tokio::test]
async fn prompt_is_last_argument() {
    let dir = tempfile::tempdir().unwrap();
    let agent = script(
        dir.path(),
        "agent",
        r#"for last; do :; done
printf '{"type":"result","result":"%s"}\n' "$last""#,
    );
    let (orch, _sessions) = orchestrator(dir.path(), &agent, 30);

    assert_eq!(orch.submit("A", "-v looks like a flag", None).await.unwrap(), "-v looks like a flag");
}

#[tokio::test]
async fn stderr_becomes_error_message() {
    let dir = tempfile::tempdir().unwrap();
    let agent = script(dir.path(), "agent", "echo 'Error: model overloaded' >&2\nexit 1");
    let (orch, _sessions) = orchestrator(dir.path(), &agent, 30);

    assert_eq!(
        orch.submit("A", "x", None).await,
        Err(AgentError::NonZeroExit {
            code: Some(1),
            message: "Error: model overloaded".into()
        })
    );
}

#[tokio::test]
async fn lock_contention_recovers_with_fresh_session() {
    let dir = tempfile::tempdir().unwrap();
    let agent = script(
        dir.path(),
        "agent",
        r#"for a in "$@"; do
  if [ "$a" = "--resume" ]; then
    echo "Error: Session ID stale is already in use" >&2
    exit 1
  fi
done
echo '{"type":"result","result":"fresh","session_id":"s2"}'"#,
    );
    let (orch, sessions) = orchestrator(dir.path(), &agent, 30);
    sessions.set("A", "stale").unwrap();

    assert_eq!(orch.submit("A", "x", None).await.unwrap(), "fresh");
    assert_eq!(sessions.get("A").as_deref(), Some("s2"));
}

#[tokio::test]
async fn hung_agent_is_killed_at_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let agent = script(dir.path(), "agent", "sleep 30");
    let (orch, _sessions) = orchestrator(dir.path(), &agent, 1);

    let started = std::time::Instant::now();
    let result = orch.submit("A", "x", None).await;
    assert_eq!(result, Err(AgentError::Timeout(Duration::from_secs(1))));
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(!orch.is_busy("A"));
}

#[tokio::test]
async fn missing_binary_reports_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("no-such-agent");
    let (orch, _sessions) = orchestrator(dir.path(), &missing, 30);

    match orch.submit("A", "x", None).await {
        Err(AgentError::SpawnNotFound(program)) => assert!(program.ends_with("no-such-agent")),
        other => panic!("expected SpawnNotFound, got {other:?}"),
    }
}

#[tokio::test]
async fn runs_in_configured_workdir() {
    let dir = tempfile::tempdir().unwrap();
    let project = dir.path().join("project");
    std::fs::create_dir(&project).unwrap();
    let agent = script(
        dir.path(),
        "agent",
        r#"printf '{"type":"result","result":"%s"}\n' "$(pwd -P)""#,
    );
    let (orch, _sessions) = orchestrator(dir.path(), &agent, 30);
    orch.set_workdir(&project);

    let reply = orch.submit("A", "x", None).await.unwrap();
    assert_eq!(PathBuf::from(reply), project.canonicalize().unwrap());
}
