//! Console connector: the operator types into stdin, replies print to
//! stdout.  Runs the full bridge locally without a chat sidecar.
//!
//! Every input line becomes a live, self-authored message in the
//! conversation named by `self_id`.  Input is read by one task for the
//! life of the process and forwarded to whichever connection is current,
//! so superseded generations stop receiving lines as soon as they close.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use cb_transport::{
    ConnectionHandle, Connector, EventKind, EventSink, IncomingMessage, MessageBatch,
    StatusUpdate, TransportError,
};

/// Default conversation identity in console mode.
pub const CONSOLE_ID: &str = "console";

type Input = Box<dyn AsyncBufRead + Send + Unpin>;
type Output = Arc<tokio::sync::Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

pub struct ConsoleConnector {
    self_id: String,
    input: Mutex<Option<Input>>,
    output: Output,
    current: Arc<Mutex<Option<EventSink>>>,
}

impl ConsoleConnector {
    pub fn new(
        self_id: impl Into<String>,
        input: impl AsyncBufRead + Send + Unpin + 'static,
        output: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            self_id: self_id.into(),
            input: Mutex::new(Some(Box::new(input))),
            output: Arc::new(tokio::sync::Mutex::new(Box::new(output))),
            current: Arc::new(Mutex::new(None)),
        }
    }

    pub fn stdio(self_id: impl Into<String>) -> Self {
        Self::new(
            self_id,
            BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
        )
    }
}

#[async_trait]
impl Connector for ConsoleConnector {
    async fn open(
        &self,
        generation: u64,
        events: EventSink,
    ) -> Result<Arc<dyn ConnectionHandle>, TransportError> {
        let input = self.input.lock().take();
        if let Some(input) = input {
            tokio::spawn(read_lines(
                input,
                self.self_id.clone(),
                self.current.clone(),
            ));
        }

        *self.current.lock() = Some(events.clone());
        events.emit(EventKind::Status(StatusUpdate::open()));
        tracing::debug!(generation, "console connection open");

        Ok(Arc::new(ConsoleHandle {
            id: events.handle_id(),
            output: self.output.clone(),
            current: self.current.clone(),
        }))
    }

    async fn persist_credentials(&self, _creds: &serde_json::Value) -> Result<(), TransportError> {
        Ok(())
    }

    async fn clear_credentials(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

async fn read_lines(mut input: Input, self_id: String, current: Arc<Mutex<Option<EventSink>>>) {
    let mut line = String::new();
    loop {
        line.clear();
        match input.read_line(&mut line).await {
            Ok(0) => {
                tracing::info!("console input closed");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "console read failed");
                return;
            }
        }

        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        let Some(sink) = current.lock().clone() else {
            tracing::debug!("no open console connection, dropping input line");
            continue;
        };
        let message = IncomingMessage {
            chat_id: self_id.clone(),
            from_me: true,
            text: Some(text.to_owned()),
            ..Default::default()
        };
        let delivered = sink.emit(EventKind::Messages {
            batch: MessageBatch::Live,
            messages: vec![message],
        });
        if !delivered {
            return;
        }
    }
}

struct ConsoleHandle {
    id: u64,
    output: Output,
    current: Arc<Mutex<Option<EventSink>>>,
}

#[async_trait]
impl ConnectionHandle for ConsoleHandle {
    fn id(&self) -> u64 {
        self.id
    }

    async fn send_text(&self, _chat_id: &str, text: &str) -> Result<(), TransportError> {
        let mut out = self.output.lock().await;
        let write = async {
            out.write_all(text.as_bytes()).await?;
            out.write_all(b"\n").await?;
            out.flush().await
        };
        write.await.map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&self) {
        let mut current = self.current.lock();
        if current.as_ref().map(EventSink::handle_id) == Some(self.id) {
            *current = None;
        }
    }
}
