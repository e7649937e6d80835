//! Session lifecycle: connecting → open → closed.
//!
//! A session is single-use. Its driver task connects, sends the run request,
//! then forwards decoded frames to the owner's event channel until either
//! side closes. Sends issued before the transport opens wait in a FIFO queue
//! that is flushed exactly once, right after the run request.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use livecode_core::config::{RetryConfig, SessionConfig};
use livecode_core::protocol::decode_server_message;
use livecode_core::{ClientFrame, LiveCodeError, Result, RunRequest, ServerMessage};

use crate::transport::{Connector, FrameSink, FrameStream};

pub type SessionId = Uuid;

const NORMAL_CLOSURE: u16 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    Connect,
    Idle,
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The owner called [`Session::close`] (or dropped the session).
    ClientClosed,
    /// The backend closed the connection, with its close code if it sent one.
    ServerClosed { code: Option<u16>, reason: String },
    TransportError(String),
    ConnectFailed(String),
    TimedOut(TimeoutKind),
}

impl CloseReason {
    /// True for endings caused by a fault rather than an orderly close.
    /// A server close counts as orderly only without a code or with 1000.
    pub fn is_failure(&self) -> bool {
        match self {
            Self::ClientClosed => false,
            Self::ServerClosed { code, .. } => code.is_some_and(|c| c != NORMAL_CLOSURE),
            Self::TransportError(_) | Self::ConnectFailed(_) | Self::TimedOut(_) => true,
        }
    }
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    Opened {
        session_id: SessionId,
    },
    Message {
        session_id: SessionId,
        message: ServerMessage,
    },
    /// Always the last event of a session.
    Closed {
        session_id: SessionId,
        reason: CloseReason,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> SessionId {
        match self {
            Self::Opened { session_id }
            | Self::Message { session_id, .. }
            | Self::Closed { session_id, .. } => *session_id,
        }
    }
}

/// Where a session reports its events.
pub type EventSender = mpsc::UnboundedSender<SessionEvent>;

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub connect_timeout: Option<Duration>,
    pub idle_timeout: Option<Duration>,
    pub retry: RetryConfig,
}

impl From<&SessionConfig> for SessionOptions {
    fn from(config: &SessionConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            idle_timeout: config.idle_timeout(),
            retry: config.retry.clone(),
        }
    }
}

/// Handle to one run's transport connection.
///
/// Dropping the handle closes the session.
pub struct Session {
    id: SessionId,
    target: String,
    runtime: String,
    state: watch::Receiver<TransportState>,
    opened: Arc<AtomicBool>,
    ended: Arc<OnceLock<CloseReason>>,
    outgoing: mpsc::UnboundedSender<ClientFrame>,
    cancel: CancellationToken,
    close_requested: AtomicBool,
    task: JoinHandle<()>,
}

impl Session {
    /// Start a session. Must be called within a Tokio runtime.
    ///
    /// Returns immediately in the `Connecting` state; every outcome,
    /// including connect failure, is reported on `events`.
    pub fn open(
        connector: Arc<dyn Connector>,
        target: impl Into<String>,
        request: RunRequest,
        options: SessionOptions,
        events: EventSender,
    ) -> Self {
        let id = Uuid::new_v4();
        let target = target.into();
        let runtime = request.runtime.clone();
        let (state_tx, state) = watch::channel(TransportState::Connecting);
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let opened = Arc::new(AtomicBool::new(false));
        let ended = Arc::new(OnceLock::new());

        let driver = Driver {
            id,
            target: target.clone(),
            request,
            options,
            connector,
            outgoing_rx,
            cancel: cancel.clone(),
            state_tx,
            opened: opened.clone(),
            ended: ended.clone(),
            events,
        };

        let task = tokio::spawn(driver.drive());
        info!(session_id = %id, url = %target, runtime = %runtime, "Session started");

        Self {
            id,
            target,
            runtime,
            state,
            opened,
            ended,
            outgoing,
            cancel,
            close_requested: AtomicBool::new(false),
            task,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn runtime(&self) -> &str {
        &self.runtime
    }

    pub fn state(&self) -> TransportState {
        *self.state.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == TransportState::Closed
    }

    /// Resolves once the transport is open, or fails if it closed first.
    pub async fn ready(&self) -> Result<()> {
        let mut state = self.state.clone();
        // The driver only drops its sender after publishing `Closed`.
        let _ = state.wait_for(|s| *s != TransportState::Connecting).await;
        if self.opened.load(Ordering::SeqCst) {
            return Ok(());
        }
        Err(match self.close_reason() {
            Some(CloseReason::TimedOut(_)) => {
                LiveCodeError::Timeout(format!("connecting to {}", self.target))
            }
            Some(CloseReason::ConnectFailed(e)) => LiveCodeError::Transport(e),
            _ => LiveCodeError::Session("session closed before opening".into()),
        })
    }

    /// Why the session ended, once it has.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.ended.get().cloned()
    }

    /// Resolves once the session has reached `Closed`.
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        let _ = state.wait_for(|s| *s == TransportState::Closed).await;
    }

    /// Queue an extra frame. Frames sent before the transport opens are
    /// delivered after the run request, in call order.
    pub fn send(&self, frame: ClientFrame) -> Result<()> {
        if self.is_closed() || self.close_requested.load(Ordering::SeqCst) {
            return Err(LiveCodeError::Session("session is closed".into()));
        }
        self.outgoing
            .send(frame)
            .map_err(|_| LiveCodeError::Session("session is closed".into()))
    }

    /// Close the session with a normal-closure status. Idempotent.
    pub fn close(&self) {
        if self.close_requested.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.is_closed() {
            return;
        }
        debug!(session_id = %self.id, "Closing session");
        self.cancel.cancel();
    }

    /// Close and wait up to `grace` for the driver to finish, aborting it
    /// if it does not.
    pub async fn shutdown(self, grace: Duration) {
        self.close();
        if tokio::time::timeout(grace, self.closed()).await.is_err() {
            warn!(session_id = %self.id, "Session did not close in time, aborting");
            self.task.abort();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("runtime", &self.runtime)
            .field("state", &self.state())
            .finish()
    }
}

struct Driver {
    id: SessionId,
    target: String,
    request: RunRequest,
    options: SessionOptions,
    connector: Arc<dyn Connector>,
    outgoing_rx: mpsc::UnboundedReceiver<ClientFrame>,
    cancel: CancellationToken,
    state_tx: watch::Sender<TransportState>,
    opened: Arc<AtomicBool>,
    ended: Arc<OnceLock<CloseReason>>,
    events: EventSender,
}

impl Driver {
    async fn drive(mut self) {
        let reason = self.run().await;
        if reason.is_failure() {
            warn!(session_id = %self.id, ?reason, "Session ended");
        } else {
            info!(session_id = %self.id, ?reason, "Session ended");
        }
        let _ = self.ended.set(reason.clone());
        // Publish the event first so anyone woken by `closed()` can see it.
        let _ = self.events.send(SessionEvent::Closed {
            session_id: self.id,
            reason,
        });
        self.state_tx.send_replace(TransportState::Closed);
    }

    async fn run(&mut self) -> CloseReason {
        let (mut sink, mut stream) = match self.connect().await {
            Ok(transport) => transport,
            Err(reason) => return reason,
        };

        self.opened.store(true, Ordering::SeqCst);
        self.state_tx.send_replace(TransportState::Open);
        let _ = self.events.send(SessionEvent::Opened { session_id: self.id });

        if let Err(reason) = send_frame(&mut sink, &ClientFrame::Exec(self.request.clone())).await {
            return reason;
        }
        debug!(session_id = %self.id, runtime = %self.request.runtime, "Run request sent");

        let mut deadline = self.options.idle_timeout.map(|d| Instant::now() + d);

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    close_sink(&mut sink).await;
                    return CloseReason::ClientClosed;
                }

                Some(frame) = self.outgoing_rx.recv() => {
                    if let Err(reason) = send_frame(&mut sink, &frame).await {
                        return reason;
                    }
                }

                _ = idle(deadline) => {
                    warn!(session_id = %self.id, "No frames within idle timeout");
                    close_sink(&mut sink).await;
                    return CloseReason::TimedOut(TimeoutKind::Idle);
                }

                frame = stream.next() => {
                    deadline = self.options.idle_timeout.map(|d| Instant::now() + d);
                    match frame {
                        Some(Ok(Message::Text(text))) => self.deliver(text.as_str()),
                        Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                            Ok(text) => self.deliver(text),
                            Err(e) => warn!(session_id = %self.id, %e, "Dropping non-UTF-8 binary frame"),
                        },
                        Some(Ok(Message::Close(frame))) => {
                            return CloseReason::ServerClosed {
                                code: frame.as_ref().map(|f| u16::from(f.code)),
                                reason: frame.map(|f| f.reason.to_string()).unwrap_or_default(),
                            };
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return CloseReason::TransportError(e.to_string()),
                        None => {
                            return CloseReason::ServerClosed {
                                code: None,
                                reason: String::new(),
                            };
                        }
                    }
                }
            }
        }
    }

    /// Connect, honouring the connect timeout and the retry policy.
    async fn connect(&mut self) -> std::result::Result<(FrameSink, FrameStream), CloseReason> {
        let mut attempt = 0u32;
        loop {
            let connecting = with_timeout(
                self.options.connect_timeout,
                self.connector.connect(&self.target),
            );
            let result = tokio::select! {
                _ = self.cancel.cancelled() => return Err(CloseReason::ClientClosed),
                result = connecting => result,
            };

            let error = match result {
                Some(Ok(transport)) => return Ok(transport),
                Some(Err(e)) => e,
                None => return Err(CloseReason::TimedOut(TimeoutKind::Connect)),
            };

            if attempt >= self.options.retry.max_attempts {
                return Err(CloseReason::ConnectFailed(error.to_string()));
            }
            attempt += 1;
            let delay = self.options.retry.backoff(attempt);
            warn!(
                session_id = %self.id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                %error,
                "Connect failed, retrying"
            );
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(CloseReason::ClientClosed),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn deliver(&self, text: &str) {
        match decode_server_message(text) {
            Ok(message) => {
                trace!(session_id = %self.id, kind = message.kind(), "Frame received");
                let _ = self.events.send(SessionEvent::Message {
                    session_id: self.id,
                    message,
                });
            }
            Err(e) => {
                warn!(session_id = %self.id, %e, "Dropping undecodable frame");
            }
        }
    }
}

async fn send_frame(sink: &mut FrameSink, frame: &ClientFrame) -> std::result::Result<(), CloseReason> {
    let text = frame
        .encode()
        .map_err(|e| CloseReason::TransportError(e.to_string()))?;
    sink.send(Message::Text(text.into()))
        .await
        .map_err(|e| CloseReason::TransportError(e.to_string()))
}

async fn close_sink(sink: &mut FrameSink) {
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: "".into(),
    };
    if let Err(e) = sink.send(Message::Close(Some(frame))).await {
        debug!(%e, "Close frame not delivered");
    }
    let _ = sink.close().await;
}

async fn with_timeout<F: Future>(limit: Option<Duration>, fut: F) -> Option<F::Output> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await.ok(),
        None => Some(fut.await),
    }
}

async fn idle(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryConnector;
    use serde_json::json;

    fn request() -> RunRequest {
        RunRequest::new("python", "print('hello')")
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for session event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_sends_exec_on_open_and_delivers_in_order() {
        let (connector, mut peers) = MemoryConnector::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = Session::open(connector, "mem://test", request(), SessionOptions::default(), tx);

        let mut peer = peers.recv().await.unwrap();
        assert_eq!(peer.target, "mem://test");
        let exec = peer.recv_json().await.unwrap();
        assert_eq!(
            exec,
            json!({"msgtype": "exec", "runtime": "python", "code": "print('hello')"})
        );

        session.ready().await.unwrap();
        assert_eq!(session.state(), TransportState::Open);

        peer.send_json(&json!({"msgtype": "write", "data": "a"}));
        peer.send_json(&json!({"msgtype": "draw", "cmd": {"function": "clear"}}));
        peer.send_json(&json!({"msgtype": "write", "data": "b"}));
        peer.close(1000);

        assert!(matches!(next_event(&mut rx).await, SessionEvent::Opened { .. }));
        let kinds: Vec<String> = {
            let mut kinds = Vec::new();
            for _ in 0..3 {
                match next_event(&mut rx).await {
                    SessionEvent::Message { message, .. } => kinds.push(message.kind().to_string()),
                    other => panic!("unexpected event: {other:?}"),
                }
            }
            kinds
        };
        assert_eq!(kinds, vec!["write", "draw", "write"]);

        match next_event(&mut rx).await {
            SessionEvent::Closed { session_id, reason } => {
                assert_eq!(session_id, session.id());
                assert_eq!(
                    reason,
                    CloseReason::ServerClosed {
                        code: Some(1000),
                        reason: String::new()
                    }
                );
            }
            other => panic!("unexpected event: {other:?}"),
        }
        session.closed().await;
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_malformed_frame_does_not_end_session() {
        let (connector, mut peers) = MemoryConnector::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _session = Session::open(connector, "mem://test", request(), SessionOptions::default(), tx);

        let mut peer = peers.recv().await.unwrap();
        let _ = peer.recv_text().await;
        peer.send_text(r#"{"msgtype": "wri"#);
        peer.send_text(r#"{"no_kind": true}"#);
        peer.send_json(&json!({"msgtype": "write", "data": "still here"}));

        assert!(matches!(next_event(&mut rx).await, SessionEvent::Opened { .. }));
        match next_event(&mut rx).await {
            SessionEvent::Message {
                message: ServerMessage::Write { data, .. },
                ..
            } => assert_eq!(data, "still here"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_sends_before_open_are_buffered_in_order() {
        let (connector, mut peers) = MemoryConnector::gated();
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = Session::open(
            connector.clone(),
            "mem://test",
            request(),
            SessionOptions::default(),
            tx,
        );

        assert_eq!(session.state(), TransportState::Connecting);
        session.send(ClientFrame::Ping).unwrap();
        session.send(ClientFrame::Quit).unwrap();

        connector.open_one();
        let mut peer = peers.recv().await.unwrap();

        let first = peer.recv_json().await.unwrap();
        let second = peer.recv_json().await.unwrap();
        let third = peer.recv_json().await.unwrap();
        assert_eq!(first["msgtype"], "exec");
        assert_eq!(second["msgtype"], "ping");
        assert_eq!(third["msgtype"], "quit");
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (connector, mut peers) = MemoryConnector::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = Session::open(connector, "mem://test", request(), SessionOptions::default(), tx);

        let mut peer = peers.recv().await.unwrap();
        let _ = peer.recv_text().await;
        session.ready().await.unwrap();

        session.close();
        session.close();
        session.closed().await;
        session.close();

        let frames = peer.collect_remaining().await;
        let closes: Vec<&Message> = frames
            .iter()
            .filter(|m| matches!(m, Message::Close(_)))
            .collect();
        assert_eq!(closes.len(), 1);
        match closes[0] {
            Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Normal),
            other => panic!("unexpected close frame: {other:?}"),
        }

        let mut closed_events = 0;
        while let Ok(event) = rx.try_recv() {
            if let SessionEvent::Closed { reason, .. } = event {
                assert_eq!(reason, CloseReason::ClientClosed);
                closed_events += 1;
            }
        }
        assert_eq!(closed_events, 1);
        assert!(session.send(ClientFrame::Ping).is_err());
    }

    #[tokio::test]
    async fn test_close_while_connecting() {
        let (connector, _peers) = MemoryConnector::gated();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = Session::open(connector, "mem://test", request(), SessionOptions::default(), tx);

        session.close();
        match next_event(&mut rx).await {
            SessionEvent::Closed { reason, .. } => assert_eq!(reason, CloseReason::ClientClosed),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(matches!(session.ready().await, Err(LiveCodeError::Session(_))));
        assert_eq!(session.close_reason(), Some(CloseReason::ClientClosed));
    }

    #[tokio::test]
    async fn test_connect_failure_is_terminal_event() {
        let (connector, _peers) = MemoryConnector::failing(1);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = Session::open(
            connector.clone(),
            "mem://test",
            request(),
            SessionOptions::default(),
            tx,
        );

        match next_event(&mut rx).await {
            SessionEvent::Closed { reason, .. } => {
                assert!(matches!(reason, CloseReason::ConnectFailed(_)));
                assert!(reason.is_failure());
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(connector.attempts(), 1);
        assert!(matches!(session.ready().await, Err(LiveCodeError::Transport(_))));
    }

    #[tokio::test]
    async fn test_bounded_retry() {
        let (connector, mut peers) = MemoryConnector::failing(2);
        let (tx, _rx) = mpsc::unbounded_channel();
        let options = SessionOptions {
            retry: RetryConfig {
                max_attempts: 3,
                initial_backoff_ms: 1,
                max_backoff_ms: 5,
            },
            ..Default::default()
        };
        let session = Session::open(connector.clone(), "mem://test", request(), options, tx);

        let mut peer = peers.recv().await.unwrap();
        assert_eq!(peer.recv_json().await.unwrap()["msgtype"], "exec");
        session.ready().await.unwrap();
        assert_eq!(connector.attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout() {
        let (connector, _peers) = MemoryConnector::gated();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let options = SessionOptions {
            connect_timeout: Some(Duration::from_secs(3)),
            ..Default::default()
        };
        let session = Session::open(connector, "mem://test", request(), options, tx);

        match next_event(&mut rx).await {
            SessionEvent::Closed { reason, .. } => {
                assert_eq!(reason, CloseReason::TimedOut(TimeoutKind::Connect));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(matches!(session.ready().await, Err(LiveCodeError::Timeout(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout() {
        let (connector, mut peers) = MemoryConnector::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let options = SessionOptions {
            idle_timeout: Some(Duration::from_secs(2)),
            ..Default::default()
        };
        let _session = Session::open(connector, "mem://test", request(), options, tx);

        let mut peer = peers.recv().await.unwrap();
        let _ = peer.recv_text().await;

        assert!(matches!(next_event(&mut rx).await, SessionEvent::Opened { .. }));
        match next_event(&mut rx).await {
            SessionEvent::Closed { reason, .. } => {
                assert_eq!(reason, CloseReason::TimedOut(TimeoutKind::Idle));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        let frames = peer.collect_remaining().await;
        assert!(frames.iter().any(|m| matches!(m, Message::Close(_))));
    }

    #[tokio::test]
    async fn test_transport_error_ends_session() {
        let (connector, mut peers) = MemoryConnector::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _session = Session::open(connector, "mem://test", request(), SessionOptions::default(), tx);

        let peer = peers.recv().await.unwrap();
        peer.fail();

        assert!(matches!(next_event(&mut rx).await, SessionEvent::Opened { .. }));
        match next_event(&mut rx).await {
            SessionEvent::Closed { reason, .. } => {
                assert!(matches!(reason, CloseReason::TransportError(_)));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_abnormal_server_close_is_failure() {
        let (connector, mut peers) = MemoryConnector::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _session = Session::open(connector, "mem://test", request(), SessionOptions::default(), tx);

        let mut peer = peers.recv().await.unwrap();
        let _ = peer.recv_text().await;
        peer.close(1011);

        loop {
            if let SessionEvent::Closed { reason, .. } = next_event(&mut rx).await {
                assert_eq!(
                    reason,
                    CloseReason::ServerClosed {
                        code: Some(1011),
                        reason: String::new()
                    }
                );
                assert!(reason.is_failure());
                break;
            }
        }
    }

    #[test]
    fn test_close_reason_failure_classification() {
        let normal = CloseReason::ServerClosed {
            code: Some(1000),
            reason: String::new(),
        };
        let dropped = CloseReason::ServerClosed {
            code: None,
            reason: String::new(),
        };
        assert!(!normal.is_failure());
        assert!(!dropped.is_failure());
        assert!(!CloseReason::ClientClosed.is_failure());
        assert!(CloseReason::TimedOut(TimeoutKind::Idle).is_failure());
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_close() {
        let (connector, mut peers) = MemoryConnector::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = Session::open(connector, "mem://test", request(), SessionOptions::default(), tx);

        let mut peer = peers.recv().await.unwrap();
        let _ = peer.recv_text().await;
        session.ready().await.unwrap();
        session.shutdown(Duration::from_secs(1)).await;

        // The close frame is already queued by the time shutdown returns.
        let mut saw_closed = false;
        while let Ok(event) = rx.try_recv() {
            saw_closed |= matches!(event, SessionEvent::Closed { .. });
        }
        assert!(saw_closed);
        let frames = peer.collect_remaining().await;
        assert!(frames.iter().any(|m| matches!(m, Message::Close(_))));
    }

    #[tokio::test]
    async fn test_drop_closes_session() {
        let (connector, mut peers) = MemoryConnector::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = Session::open(connector, "mem://test", request(), SessionOptions::default(), tx);

        let mut peer = peers.recv().await.unwrap();
        let _ = peer.recv_text().await;
        session.ready().await.unwrap();
        drop(session);

        loop {
            if let SessionEvent::Closed { reason, .. } = next_event(&mut rx).await {
                assert_eq!(reason, CloseReason::ClientClosed);
                break;
            }
        }
    }
}
