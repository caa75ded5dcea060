//! End to end through the real supervisor: console input → router →
//! orchestrator → reply on console output.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};

use cb_domain::config::Config;
use cb_gateway::console::ConsoleConnector;
use cb_gateway::router::Router;
use cb_gateway::state::AppState;
use cb_orchestrator::{AgentExit, AgentLauncher, Invocation, LaunchError, Orchestrator};
use cb_sessions::SessionStore;
use cb_transport::{ReconnectPolicy, Supervisor};

struct EchoAgent;

#[async_trait]
impl AgentLauncher for EchoAgent {
    async fn launch(&self, invocation: &Invocation) -> Result<AgentExit, LaunchError> {
        let session = invocation.resume_token.clone().unwrap_or_else(|| "s1".into());
        let line = serde_json::json!({
            "type": "result",
            "result": format!("**echo:** {}", invocation.prompt()),
            "session_id": session,
        });
        Ok(AgentExit {
            code: Some(0),
            stdout: line.to_string(),
            stderr: String::new(),
        })
    }
}

struct Bridge {
    input: DuplexStream,
    output: Lines<BufReader<DuplexStream>>,
    supervisor: Supervisor,
    state: AppState,
    stop: tokio::sync::oneshot::Sender<()>,
    router: tokio::task::JoinHandle<()>,
    _tmp: tempfile::TempDir,
}

async fn start() -> Bridge {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.bridge.self_id = "console".into();

    let sessions = Arc::new(SessionStore::open(tmp.path().join("sessions.json")));
    let orchestrator = Orchestrator::new(config.agent.clone(), Arc::new(EchoAgent), sessions.clone());
    let state = AppState {
        config: Arc::new(config),
        sessions,
        orchestrator,
    };

    let (input, console_in) = tokio::io::duplex(4096);
    let (console_out, output) = tokio::io::duplex(4096);
    let connector = ConsoleConnector::new("console", BufReader::new(console_in), console_out);

    let (supervisor, events) = Supervisor::new(Arc::new(connector), ReconnectPolicy::default());
    let (stop, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let router = tokio::spawn(Router::new(state.clone(), Arc::new(supervisor.clone())).run(
        events,
        async {
            let _ = stop_rx.await;
        },
    ));

    supervisor.connect().await.unwrap();
    wait_until(|| supervisor.is_open()).await;

    Bridge {
        input,
        output: BufReader::new(output).lines(),
        supervisor,
        state,
        stop,
        router,
        _tmp: tmp,
    }
}

async fn wait_until(cond: impl Fn() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

impl Bridge {
    async fn say(&mut self, line: &str) {
        self.input.write_all(format!("{line}\n").as_bytes()).await.unwrap();
    }

    async fn next_line(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(5), self.output.next_line())
            .await
            .expect("timed out waiting for output")
            .unwrap()
            .expect("output closed")
    }

    async fn stop(self) {
        self.stop.send(()).unwrap();
        self.router.await.unwrap();
        self.supervisor.shutdown().await;
    }
}

#[tokio::test]
async fn console_message_round_trips_through_the_agent() {
    let mut bridge = start().await;

    bridge.say("hello").await;
    assert_eq!(bridge.next_line().await, "*echo:* hello");
    assert_eq!(
        bridge.state.orchestrator.session_token("console").as_deref(),
        Some("s1")
    );

    bridge.say("again").await;
    assert_eq!(bridge.next_line().await, "*echo:* again");

    bridge.stop().await;
}

#[tokio::test]
async fn status_command_reports_the_live_connection() {
    let mut bridge = start().await;

    bridge.say("/status").await;
    assert_eq!(bridge.next_line().await, "Connection: open (generation 1)");
    assert_eq!(bridge.next_line().await, "Reconnect attempts: 0");
    assert!(bridge.next_line().await.starts_with("Last opened: "));
    assert_eq!(bridge.next_line().await, "Agent: idle");

    bridge.stop().await;
}

#[tokio::test]
async fn clear_then_message_starts_fresh() {
    let mut bridge = start().await;

    bridge.say("first").await;
    bridge.next_line().await;
    bridge.say("/CLEAR").await;
    assert!(bridge.next_line().await.starts_with("Session cleared"));
    assert!(bridge.state.orchestrator.session_token("console").is_none());

    bridge.stop().await;
}
