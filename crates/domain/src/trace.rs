use serde::Serialize;

/// Structured trace events emitted across all chatbridge crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    SessionTokenStored {
        conversation_id: String,
        session_token: String,
        replaced: bool,
    },
    SessionTokenCleared {
        conversation_id: String,
        reason: String,
    },
    AgentRunCompleted {
        conversation_id: String,
        request_id: String,
        outcome: String,
        duration_ms: u64,
        resumed: bool,
    },
    LockContentionRecovered {
        conversation_id: String,
        request_id: String,
        stale_token: String,
    },
    TransportOpened {
        generation: u64,
        handle_id: u64,
    },
    TransportClosed {
        generation: u64,
        code: Option<u16>,
        class: String,
        open_for_ms: Option<u64>,
    },
    ReconnectScheduled {
        generation: u64,
        attempt: u32,
        delay_ms: u64,
        class: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "cb_event");
    }
}
