//! The transport resilience state machine.
//!
//! [`Supervisor`] owns at most one live [`ConnectionHandle`].  Each connect
//! bumps the generation and assigns a fresh handle id; events are processed
//! one at a time by a pump task, and only those stamped with the current
//! generation *and* handle id reach the state.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use cb_domain::trace::TraceEvent;

use crate::connector::{ConnectionHandle, Connector, EventSink};
use crate::error::TransportError;
use crate::reconnect::ReconnectPolicy;
use crate::types::{
    ConnectionEvent, ConnectionStatus, DisconnectClass, EventKind, Generation, HandleId,
    MessageBatch, StatusUpdate, TransportEvent, TransportNotice,
};

type ConnectAttempt = Shared<BoxFuture<'static, Result<(), TransportError>>>;

struct ReconnectTimer {
    seq: u64,
    task: JoinHandle<()>,
}

struct ConnectionState {
    generation: Generation,
    next_handle_id: HandleId,
    /// Id assigned to the connection of the current generation.  Set before
    /// `open` is called so events emitted during the open are accepted.
    current_handle_id: Option<HandleId>,
    handle: Option<Arc<dyn ConnectionHandle>>,
    is_open: bool,
    reconnect_attempts: u32,
    last_open_at: Option<Instant>,
    last_open_wall: Option<DateTime<Utc>>,
    shutting_down: bool,
    /// Replaced-session ceiling hit; nothing is scheduled until an explicit
    /// `connect`.
    halted: bool,
    timer: Option<ReconnectTimer>,
    timer_seq: u64,
}

impl ConnectionState {
    fn new() -> Self {
        Self {
            generation: 0,
            next_handle_id: 0,
            current_handle_id: None,
            handle: None,
            is_open: false,
            reconnect_attempts: 0,
            last_open_at: None,
            last_open_wall: None,
            shutting_down: false,
            halted: false,
            timer: None,
            timer_seq: 0,
        }
    }

    fn is_current(&self, generation: Generation, handle_id: HandleId) -> bool {
        self.generation == generation && self.current_handle_id == Some(handle_id)
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.task.abort();
        }
    }
}

/// Point-in-time view of the connection, for `/status` and logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionSnapshot {
    pub generation: Generation,
    pub is_open: bool,
    pub reconnect_attempts: u32,
    pub last_open_at: Option<DateTime<Utc>>,
    pub shutting_down: bool,
    pub connecting: bool,
    pub reconnect_pending: bool,
    pub halted: bool,
}

/// Keeps one logical connection alive.  Cheap to clone.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

struct Inner {
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    state: Mutex<ConnectionState>,
    in_flight: Mutex<Option<ConnectAttempt>>,
    events_tx: mpsc::UnboundedSender<ConnectionEvent>,
    out: mpsc::UnboundedSender<TransportEvent>,
}

impl Supervisor {
    /// Create the supervisor and start its event pump.  Returns the stream
    /// of live messages and lifecycle notices for the application.
    ///
    /// Does not connect; call [`connect`](Self::connect).  Must be called
    /// from within a tokio runtime.
    pub fn new(
        connector: Arc<dyn Connector>,
        policy: ReconnectPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            connector,
            policy,
            state: Mutex::new(ConnectionState::new()),
            in_flight: Mutex::new(None),
            events_tx,
            out: out_tx,
        });
        tokio::spawn(pump(Arc::downgrade(&inner), events_rx));
        (Self { inner }, out_rx)
    }

    /// Start a new connection, superseding the current one.
    ///
    /// If an attempt is already in flight, waits for that attempt's outcome
    /// instead of starting another.  A failed attempt schedules its own
    /// reconnect; the error is returned for logging only.
    pub async fn connect(&self) -> Result<(), TransportError> {
        let attempt = {
            let mut slot = self.inner.in_flight.lock();
            match slot.as_ref() {
                Some(attempt) => {
                    tracing::debug!("connect already in flight, joining it");
                    attempt.clone()
                }
                None => {
                    if self.inner.state.lock().shutting_down {
                        return Err(TransportError::ShuttingDown);
                    }
                    let inner = self.inner.clone();
                    let attempt = tokio::spawn(async move { inner.establish().await })
                        .map(|joined| {
                            joined.unwrap_or_else(|e| {
                                Err(TransportError::Connect(format!("connect task failed: {e}")))
                            })
                        })
                        .boxed()
                        .shared();
                    *slot = Some(attempt.clone());
                    attempt
                }
            }
        };
        attempt.await
    }

    /// Send text through the current connection.
    pub async fn send_text(&self, chat_id: &str, text: &str) -> Result<(), TransportError> {
        let handle = {
            let st = self.inner.state.lock();
            if st.shutting_down {
                return Err(TransportError::ShuttingDown);
            }
            match (&st.handle, st.is_open) {
                (Some(handle), true) => handle.clone(),
                _ => return Err(TransportError::NotConnected),
            }
        };
        handle.send_text(chat_id, text).await
    }

    /// Stop for good: cancel any pending reconnect and close the current
    /// connection.  Idempotent.  An in-flight connect is left to finish; its
    /// handle is closed as soon as it lands.
    pub async fn shutdown(&self) {
        let handle = {
            let mut st = self.inner.state.lock();
            if st.shutting_down {
                return;
            }
            st.shutting_down = true;
            st.cancel_timer();
            st.is_open = false;
            st.current_handle_id = None;
            st.handle.take()
        };
        tracing::info!("transport shutting down");
        if let Some(handle) = handle {
            handle.close().await;
        }
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        let connecting = self.inner.in_flight.lock().is_some();
        let st = self.inner.state.lock();
        ConnectionSnapshot {
            generation: st.generation,
            is_open: st.is_open,
            reconnect_attempts: st.reconnect_attempts,
            last_open_at: st.last_open_wall,
            shutting_down: st.shutting_down,
            connecting,
            reconnect_pending: st.timer.is_some(),
            halted: st.halted,
        }
    }

    pub fn is_open(&self) -> bool {
        self.inner.state.lock().is_open
    }
}

/// Drain connection events in arrival order.
async fn pump(inner: Weak<Inner>, mut events: mpsc::UnboundedReceiver<ConnectionEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.handle_event(event).await;
    }
}

impl Inner {
    fn notify(&self, notice: TransportNotice) {
        // The application may have stopped listening; that is not our problem.
        let _ = self.out.send(TransportEvent::Notice(notice));
    }

    async fn establish(self: Arc<Self>) -> Result<(), TransportError> {
        let result = self.open_connection().await;
        *self.in_flight.lock() = None;
        result
    }

    async fn open_connection(self: &Arc<Self>) -> Result<(), TransportError> {
        let (generation, handle_id, previous) = {
            let mut st = self.state.lock();
            if st.shutting_down {
                return Err(TransportError::ShuttingDown);
            }
            st.cancel_timer();
            st.generation += 1;
            st.next_handle_id += 1;
            st.current_handle_id = Some(st.next_handle_id);
            st.is_open = false;
            st.halted = false;
            (st.generation, st.next_handle_id, st.handle.take())
        };

        if let Some(old) = previous {
            tracing::debug!(old_handle = old.id(), "tearing down previous connection");
            old.close().await;
        }

        tracing::info!(generation, handle_id, "connecting");
        let sink = EventSink::new(generation, handle_id, self.events_tx.clone());
        let timeout = self.policy.connect_timeout;
        let opened = tokio::time::timeout(timeout, self.connector.open(generation, sink))
            .await
            .unwrap_or_else(|_| Err(TransportError::ConnectTimeout(timeout.as_millis() as u64)));

        // Events are matched on the pre-assigned id, so a handle reporting
        // any other id could never be told apart from a stale one.
        let opened = match opened {
            Ok(handle) if handle.id() != handle_id => {
                let got = handle.id();
                tracing::error!(generation, expected = handle_id, got, "connector returned a mismatched handle id");
                handle.close().await;
                Err(TransportError::Connect(format!(
                    "connector returned handle {got}, expected {handle_id}"
                )))
            }
            other => other,
        };

        match opened {
            Ok(handle) => {
                let rejected = {
                    let mut st = self.state.lock();
                    if st.shutting_down {
                        Some(TransportError::ShuttingDown)
                    } else if st.generation != generation {
                        Some(TransportError::Superseded(st.generation))
                    } else {
                        st.handle = Some(handle.clone());
                        None
                    }
                };
                match rejected {
                    Some(e) => {
                        tracing::debug!(generation, error = %e, "discarding connection opened too late");
                        handle.close().await;
                        Err(e)
                    }
                    None => Ok(()),
                }
            }
            Err(e) => {
                tracing::warn!(generation, error = %e, "connect failed");
                self.on_close(generation, handle_id, None).await;
                {
                    let mut st = self.state.lock();
                    if st.is_current(generation, handle_id) {
                        st.current_handle_id = None;
                    }
                }
                Err(e)
            }
        }
    }

    async fn handle_event(self: &Arc<Self>, event: ConnectionEvent) {
        let ConnectionEvent {
            generation,
            handle_id,
            kind,
        } = event;

        {
            let st = self.state.lock();
            if st.shutting_down || !st.is_current(generation, handle_id) {
                tracing::debug!(generation, handle_id, "dropping event from superseded connection");
                return;
            }
        }

        match kind {
            EventKind::Credentials(creds) => {
                if let Err(e) = self.connector.persist_credentials(&creds).await {
                    tracing::warn!(error = %e, "failed to persist transport credentials");
                }
            }
            EventKind::Status(update) => self.on_status(generation, handle_id, update).await,
            EventKind::Messages { batch, messages } => {
                if batch != MessageBatch::Live {
                    tracing::debug!(count = messages.len(), "ignoring history sync");
                    return;
                }
                for message in messages {
                    let _ = self.out.send(TransportEvent::Message(message));
                }
            }
        }
    }

    async fn on_status(self: &Arc<Self>, generation: Generation, handle_id: HandleId, update: StatusUpdate) {
        if let Some(qr) = update.qr {
            tracing::info!(generation, "authentication code received, scan it to link the account");
            self.notify(TransportNotice::AuthCode(qr));
        }
        match update.connection {
            Some(ConnectionStatus::Open) => self.on_open(generation, handle_id),
            Some(ConnectionStatus::Close) => self.on_close(generation, handle_id, update.code).await,
            Some(ConnectionStatus::Connecting) => {
                tracing::debug!(generation, "protocol handshake in progress");
            }
            None => {}
        }
    }

    fn on_open(&self, generation: Generation, handle_id: HandleId) {
        {
            let mut st = self.state.lock();
            if !st.is_current(generation, handle_id) {
                return;
            }
            st.is_open = true;
            st.last_open_at = Some(Instant::now());
            st.last_open_wall = Some(Utc::now());
        }
        TraceEvent::TransportOpened {
            generation,
            handle_id,
        }
        .emit();
        tracing::info!(generation, handle_id, "transport open");
        self.notify(TransportNotice::Opened { generation });
    }

    async fn on_close(self: &Arc<Self>, generation: Generation, handle_id: HandleId, code: Option<u16>) {
        let class = DisconnectClass::classify(code);

        let attempts = {
            let mut st = self.state.lock();
            if st.shutting_down || !st.is_current(generation, handle_id) {
                return;
            }
            let open_for = if st.is_open {
                st.last_open_at.map(|at| at.elapsed())
            } else {
                None
            };
            st.is_open = false;

            if open_for.is_some_and(|d| d >= self.policy.stability_threshold) && st.reconnect_attempts > 0 {
                tracing::debug!(
                    previous_attempts = st.reconnect_attempts,
                    "connection had been stable, resetting reconnect attempts"
                );
                st.reconnect_attempts = 0;
            }
            match class {
                DisconnectClass::SessionInvalidated => st.reconnect_attempts = 0,
                DisconnectClass::Replaced | DisconnectClass::Generic => {
                    st.reconnect_attempts = st.reconnect_attempts.saturating_add(1);
                }
            }

            TraceEvent::TransportClosed {
                generation,
                code,
                class: class.as_str().into(),
                open_for_ms: open_for.map(|d| d.as_millis() as u64),
            }
            .emit();

            st.reconnect_attempts
        };

        tracing::warn!(generation, code, class = %class, attempts, "transport closed");
        self.notify(TransportNotice::Closed { generation, class });

        if class == DisconnectClass::SessionInvalidated {
            tracing::warn!("session invalidated, clearing credentials; re-authentication required");
            if let Err(e) = self.connector.clear_credentials().await {
                tracing::error!(error = %e, "failed to clear transport credentials");
            }
        }

        let mut st = self.state.lock();
        if st.shutting_down || st.generation != generation {
            return;
        }
        match self.policy.delay_for(class, attempts) {
            Some(delay) => self.schedule_reconnect(&mut st, delay, class),
            None => {
                st.halted = true;
                tracing::error!(
                    attempts,
                    "session replaced too many times, reconnecting stopped; restart required"
                );
                self.notify(TransportNotice::ReconnectCeilingExceeded { attempts });
            }
        }
    }

    /// Arm the single reconnect timer, replacing any pending one.
    ///
    /// Takes the locked state so the timer task cannot observe the slot
    /// before it is filled.
    fn schedule_reconnect(self: &Arc<Self>, st: &mut ConnectionState, delay: Duration, class: DisconnectClass) {
        if st.shutting_down {
            return;
        }
        st.cancel_timer();
        st.timer_seq += 1;
        let seq = st.timer_seq;

        let weak = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            {
                let mut st = inner.state.lock();
                if st.shutting_down || st.timer.as_ref().map(|t| t.seq) != Some(seq) {
                    return;
                }
                st.timer = None;
            }
            if let Err(e) = (Supervisor { inner }).connect().await {
                tracing::debug!(error = %e, "reconnect attempt failed");
            }
        });
        st.timer = Some(ReconnectTimer { seq, task });

        let delay_ms = delay.as_millis() as u64;
        TraceEvent::ReconnectScheduled {
            generation: st.generation,
            attempt: st.reconnect_attempts,
            delay_ms,
            class: class.as_str().into(),
        }
        .emit();
        tracing::info!(
            generation = st.generation,
            attempt = st.reconnect_attempts,
            delay_ms,
            class = %class,
            "reconnect scheduled"
        );
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::types::IncomingMessage;

    struct FakeHandle {
        id: HandleId,
        sent: Mutex<Vec<(String, String)>>,
        closed: AtomicBool,
    }

    #[async_trait]
    impl ConnectionHandle for FakeHandle {
        fn id(&self) -> HandleId {
            self.id
        }

        async fn send_text(&self, chat_id: &str, text: &str) -> Result<(), TransportError> {
            self.sent.lock().push((chat_id.into(), text.into()));
            Ok(())
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct FakeConnector {
        sinks: Mutex<Vec<EventSink>>,
        handles: Mutex<Vec<Arc<FakeHandle>>>,
        gate: Mutex<Option<Arc<Notify>>>,
        fail_next: AtomicUsize,
        wrong_id: AtomicBool,
        persisted: Mutex<Vec<serde_json::Value>>,
        cleared: AtomicUsize,
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn open(
            &self,
            _generation: Generation,
            events: EventSink,
        ) -> Result<Arc<dyn ConnectionHandle>, TransportError> {
            let gate = self.gate.lock().clone();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            self.sinks.lock().push(events.clone());
            if self.fail_next.load(Ordering::SeqCst) > 0 {
                self.fail_next.fetch_sub(1, Ordering::SeqCst);
                return Err(TransportError::Connect("refused".into()));
            }
            let id = if self.wrong_id.swap(false, Ordering::SeqCst) {
                events.handle_id() + 100
            } else {
                events.handle_id()
            };
            let handle = Arc::new(FakeHandle {
                id,
                sent: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            });
            self.handles.lock().push(handle.clone());
            Ok(handle)
        }

        async fn persist_credentials(&self, creds: &serde_json::Value) -> Result<(), TransportError> {
            self.persisted.lock().push(creds.clone());
            Ok(())
        }

        async fn clear_credentials(&self) -> Result<(), TransportError> {
            self.cleared.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl FakeConnector {
        fn opens(&self) -> usize {
            self.sinks.lock().len()
        }

        fn sink(&self, n: usize) -> EventSink {
            self.sinks.lock()[n].clone()
        }

        fn latest(&self) -> EventSink {
            self.sinks.lock().last().cloned().unwrap()
        }
    }

    fn setup() -> (
        Supervisor,
        Arc<FakeConnector>,
        mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        let connector = Arc::new(FakeConnector::default());
        let (sup, rx) = Supervisor::new(connector.clone(), ReconnectPolicy::default());
        (sup, connector, rx)
    }

    /// Let spawned tasks run without advancing the paused clock.
    async fn settle() {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
    }

    async fn advance_ms(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        settle().await;
    }

    fn status(sink: &EventSink, update: StatusUpdate) {
        assert!(sink.emit(EventKind::Status(update)));
    }

    #[tokio::test(start_paused = true)]
    async fn connect_then_open() {
        let (sup, conn, mut rx) = setup();
        sup.connect().await.unwrap();
        assert_eq!(conn.opens(), 1);
        assert_eq!(sup.snapshot().generation, 1);
        assert!(!sup.is_open());

        status(&conn.sink(0), StatusUpdate::open());
        settle().await;

        let snap = sup.snapshot();
        assert!(snap.is_open);
        assert!(snap.last_open_at.is_some());
        assert!(!snap.connecting);
        assert_eq!(
            rx.try_recv().unwrap(),
            TransportEvent::Notice(TransportNotice::Opened { generation: 1 })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_connects_share_one_attempt() {
        let (sup, conn, _rx) = setup();
        let gate = Arc::new(Notify::new());
        *conn.gate.lock() = Some(gate.clone());

        let (a, b, ()) = tokio::join!(sup.connect(), sup.connect(), async {
            settle().await;
            assert!(sup.snapshot().connecting);
            gate.notify_one();
        });
        assert!(a.is_ok());
        assert!(b.is_ok());
        assert_eq!(conn.opens(), 1);
        assert_eq!(sup.snapshot().generation, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn generic_close_backs_off_exponentially() {
        let (sup, conn, _rx) = setup();
        sup.connect().await.unwrap();
        status(&conn.sink(0), StatusUpdate::open());
        status(&conn.sink(0), StatusUpdate::closed(None));
        settle().await;

        let snap = sup.snapshot();
        assert!(!snap.is_open);
        assert_eq!(snap.reconnect_attempts, 1);
        assert!(snap.reconnect_pending);

        advance_ms(1_999).await;
        assert_eq!(conn.opens(), 1);
        advance_ms(2).await;
        assert_eq!(conn.opens(), 2);
        assert_eq!(sup.snapshot().generation, 2);
        assert!(conn.handles.lock()[0].closed.load(Ordering::SeqCst));

        // Second drop before ever opening: 4s.
        status(&conn.sink(1), StatusUpdate::closed(Some(428)));
        settle().await;
        assert_eq!(sup.snapshot().reconnect_attempts, 2);
        advance_ms(3_999).await;
        assert_eq!(conn.opens(), 2);
        advance_ms(2).await;
        assert_eq!(conn.opens(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_events_are_ignored() {
        let (sup, conn, mut rx) = setup();
        sup.connect().await.unwrap();
        let old = conn.sink(0);
        status(&old, StatusUpdate::open());
        status(&old, StatusUpdate::closed(None));
        advance_ms(2_001).await;
        assert_eq!(conn.opens(), 2);

        status(&conn.sink(1), StatusUpdate::open());
        settle().await;
        while rx.try_recv().is_ok() {}
        let before = sup.snapshot();
        assert!(before.is_open);
        assert_eq!(before.reconnect_attempts, 1);

        // Old generation.
        status(&old, StatusUpdate::closed(Some(440)));
        assert!(old.emit(EventKind::Messages {
            batch: MessageBatch::Live,
            messages: vec![IncomingMessage {
                chat_id: "me@s".into(),
                from_me: true,
                text: Some("ghost".into()),
                ..Default::default()
            }],
        }));
        // Current generation, foreign handle.
        let forged = EventSink::new(2, 999, sup.inner.events_tx.clone());
        status(&forged, StatusUpdate::closed(None));
        settle().await;

        let after = sup.snapshot();
        assert_eq!(after, before);
        assert!(!after.reconnect_pending);
        assert!(rx.try_recv().is_err());
        advance_ms(120_000).await;
        assert_eq!(conn.opens(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn replaced_backs_off_linearly_and_stops_at_ceiling() {
        let (sup, conn, mut rx) = setup();
        sup.connect().await.unwrap();

        for n in 1..=10u64 {
            status(&conn.latest(), StatusUpdate::closed(Some(440)));
            settle().await;
            assert_eq!(sup.snapshot().reconnect_attempts as u64, n);
            let delay = (10_000 * n).min(60_000);
            advance_ms(delay - 1).await;
            assert_eq!(conn.opens() as u64, n);
            advance_ms(2).await;
            assert_eq!(conn.opens() as u64, n + 1);
        }

        status(&conn.latest(), StatusUpdate::closed(Some(440)));
        settle().await;
        let snap = sup.snapshot();
        assert_eq!(snap.reconnect_attempts, 11);
        assert!(snap.halted);
        assert!(!snap.reconnect_pending);

        let mut saw_ceiling = false;
        while let Ok(ev) = rx.try_recv() {
            if ev == TransportEvent::Notice(TransportNotice::ReconnectCeilingExceeded { attempts: 11 }) {
                saw_ceiling = true;
            }
        }
        assert!(saw_ceiling);

        advance_ms(600_000).await;
        assert_eq!(conn.opens(), 11);
    }

    #[tokio::test(start_paused = true)]
    async fn logged_out_clears_credentials_and_resets_attempts() {
        let (sup, conn, _rx) = setup();
        sup.connect().await.unwrap();
        status(&conn.sink(0), StatusUpdate::closed(None));
        advance_ms(2_001).await;
        assert_eq!(sup.snapshot().reconnect_attempts, 1);

        status(&conn.sink(1), StatusUpdate::closed(Some(401)));
        settle().await;
        assert_eq!(conn.cleared.load(Ordering::SeqCst), 1);
        assert_eq!(sup.snapshot().reconnect_attempts, 0);

        advance_ms(2_999).await;
        assert_eq!(conn.opens(), 2);
        advance_ms(2).await;
        assert_eq!(conn.opens(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stable_connection_resets_attempts_before_counting() {
        let (sup, conn, _rx) = setup();
        sup.connect().await.unwrap();
        status(&conn.sink(0), StatusUpdate::closed(None));
        advance_ms(2_001).await;
        status(&conn.sink(1), StatusUpdate::closed(None));
        advance_ms(4_001).await;
        assert_eq!(conn.opens(), 3);
        assert_eq!(sup.snapshot().reconnect_attempts, 2);

        status(&conn.sink(2), StatusUpdate::open());
        advance_ms(25_000).await;
        status(&conn.sink(2), StatusUpdate::closed(None));
        settle().await;
        assert_eq!(sup.snapshot().reconnect_attempts, 1);

        // 2s, not 8s.
        advance_ms(2_001).await;
        assert_eq!(conn.opens(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn short_lived_connection_keeps_counting() {
        let (sup, conn, _rx) = setup();
        sup.connect().await.unwrap();
        status(&conn.sink(0), StatusUpdate::closed(None));
        advance_ms(2_001).await;

        status(&conn.sink(1), StatusUpdate::open());
        advance_ms(5_000).await;
        status(&conn.sink(1), StatusUpdate::closed(None));
        settle().await;
        assert_eq!(sup.snapshot().reconnect_attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_open_schedules_reconnect() {
        let (sup, conn, _rx) = setup();
        conn.fail_next.store(1, Ordering::SeqCst);

        let err = sup.connect().await.unwrap_err();
        assert_eq!(err, TransportError::Connect("refused".into()));
        let snap = sup.snapshot();
        assert_eq!(snap.reconnect_attempts, 1);
        assert!(snap.reconnect_pending);

        advance_ms(2_001).await;
        assert_eq!(conn.opens(), 2);
        assert_eq!(conn.handles.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_open_times_out() {
        let (sup, conn, _rx) = setup();
        *conn.gate.lock() = Some(Arc::new(Notify::new()));

        let err = sup.connect().await.unwrap_err();
        assert_eq!(err, TransportError::ConnectTimeout(20_000));
        assert_eq!(sup.snapshot().reconnect_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_reconnect_and_closes_handle() {
        let (sup, conn, _rx) = setup();
        sup.connect().await.unwrap();
        status(&conn.sink(0), StatusUpdate::open());
        status(&conn.sink(0), StatusUpdate::closed(None));
        settle().await;
        assert!(sup.snapshot().reconnect_pending);

        sup.shutdown().await;
        sup.shutdown().await;
        let snap = sup.snapshot();
        assert!(snap.shutting_down);
        assert!(!snap.reconnect_pending);
        assert!(conn.handles.lock()[0].closed.load(Ordering::SeqCst));

        advance_ms(120_000).await;
        assert_eq!(conn.opens(), 1);
        assert_eq!(sup.connect().await, Err(TransportError::ShuttingDown));
        assert_eq!(sup.send_text("c", "x").await, Err(TransportError::ShuttingDown));
    }

    #[tokio::test(start_paused = true)]
    async fn torn_down_handle_cannot_touch_state_after_shutdown() {
        let (sup, conn, mut rx) = setup();
        sup.connect().await.unwrap();
        let sink = conn.sink(0);
        status(&sink, StatusUpdate::open());
        settle().await;
        while rx.try_recv().is_ok() {}

        sup.shutdown().await;
        let before = sup.snapshot();

        status(&sink, StatusUpdate::closed(None));
        assert!(sink.emit(EventKind::Credentials(serde_json::json!({"k": "v"}))));
        assert!(sink.emit(EventKind::Messages {
            batch: MessageBatch::Live,
            messages: vec![IncomingMessage {
                chat_id: "me@s".into(),
                from_me: true,
                text: Some("ghost".into()),
                ..Default::default()
            }],
        }));
        settle().await;

        assert_eq!(sup.snapshot(), before);
        assert_eq!(before.reconnect_attempts, 0);
        assert!(conn.persisted.lock().is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_open_sink_is_dead() {
        let (sup, conn, mut rx) = setup();
        conn.fail_next.store(1, Ordering::SeqCst);
        sup.connect().await.unwrap_err();
        let dead = conn.sink(0);
        settle().await;
        while rx.try_recv().is_ok() {}
        let before = sup.snapshot();

        status(&dead, StatusUpdate::open());
        status(&dead, StatusUpdate::closed(None));
        settle().await;

        assert_eq!(sup.snapshot(), before);
        assert_eq!(before.reconnect_attempts, 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn connect_landing_after_shutdown_is_closed() {
        let (sup, conn, _rx) = setup();
        let gate = Arc::new(Notify::new());
        *conn.gate.lock() = Some(gate.clone());

        let connecting = {
            let sup = sup.clone();
            tokio::spawn(async move { sup.connect().await })
        };
        settle().await;
        assert!(sup.snapshot().connecting);

        sup.shutdown().await;
        gate.notify_one();
        assert_eq!(connecting.await.unwrap(), Err(TransportError::ShuttingDown));

        assert_eq!(conn.handles.lock().len(), 1);
        assert!(conn.handles.lock()[0].closed.load(Ordering::SeqCst));
        let snap = sup.snapshot();
        assert!(!snap.is_open);
        assert!(!snap.connecting);
        assert!(!snap.reconnect_pending);
        assert_eq!(snap.reconnect_attempts, 0);
        assert_eq!(sup.send_text("c", "x").await, Err(TransportError::ShuttingDown));

        advance_ms(120_000).await;
        assert_eq!(conn.opens(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn handle_with_wrong_id_is_rejected() {
        let (sup, conn, _rx) = setup();
        conn.wrong_id.store(true, Ordering::SeqCst);

        let err = sup.connect().await.unwrap_err();
        assert_eq!(err, TransportError::Connect("connector returned handle 101, expected 1".into()));
        assert!(conn.handles.lock()[0].closed.load(Ordering::SeqCst));
        let snap = sup.snapshot();
        assert_eq!(snap.reconnect_attempts, 1);
        assert!(snap.reconnect_pending);

        advance_ms(2_001).await;
        assert_eq!(conn.opens(), 2);
        status(&conn.sink(1), StatusUpdate::open());
        settle().await;
        assert!(sup.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn live_messages_forwarded_history_dropped_credentials_persisted() {
        let (sup, conn, mut rx) = setup();
        sup.connect().await.unwrap();
        let sink = conn.sink(0);

        let creds = serde_json::json!({"noise_key": "abc"});
        assert!(sink.emit(EventKind::Credentials(creds.clone())));
        let live = IncomingMessage {
            chat_id: "me@s".into(),
            from_me: true,
            text: Some("hi".into()),
            ..Default::default()
        };
        let old = IncomingMessage {
            text: Some("from history".into()),
            ..live.clone()
        };
        assert!(sink.emit(EventKind::Messages {
            batch: MessageBatch::Live,
            messages: vec![live.clone()],
        }));
        assert!(sink.emit(EventKind::Messages {
            batch: MessageBatch::Historical,
            messages: vec![old],
        }));
        status(
            &sink,
            StatusUpdate {
                qr: Some("2@QRDATA".into()),
                ..Default::default()
            },
        );
        settle().await;

        assert_eq!(*conn.persisted.lock(), vec![creds]);
        assert_eq!(rx.try_recv().unwrap(), TransportEvent::Message(live));
        assert_eq!(
            rx.try_recv().unwrap(),
            TransportEvent::Notice(TransportNotice::AuthCode("2@QRDATA".into()))
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn send_requires_open_connection() {
        let (sup, conn, _rx) = setup();
        sup.connect().await.unwrap();
        assert_eq!(sup.send_text("c", "x").await, Err(TransportError::NotConnected));

        status(&conn.sink(0), StatusUpdate::open());
        settle().await;
        sup.send_text("c", "hello").await.unwrap();
        assert_eq!(
            *conn.handles.lock()[0].sent.lock(),
            vec![("c".to_string(), "hello".to_string())]
        );
    }
}
