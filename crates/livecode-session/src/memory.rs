//! In-memory transport for tests and embedders.
//!
//! Every successful `connect` hands a [`MemoryPeer`] to whoever holds the
//! peer receiver; the peer plays the server side of that connection.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Semaphore};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use livecode_core::{LiveCodeError, Result};

use crate::transport::{Connector, FrameSink, FrameStream};

/// Server side of one in-memory connection.
pub struct MemoryPeer {
    pub target: String,
    from_client: fmpsc::UnboundedReceiver<Message>,
    to_client: fmpsc::UnboundedSender<std::result::Result<Message, WsError>>,
}

impl MemoryPeer {
    /// Next frame the client sent, or `None` once the client hung up.
    pub async fn recv(&mut self) -> Option<Message> {
        self.from_client.next().await
    }

    /// Next text frame, skipping anything else.
    pub async fn recv_text(&mut self) -> Option<String> {
        while let Some(msg) = self.recv().await {
            if let Message::Text(text) = msg {
                return Some(text.to_string());
            }
        }
        None
    }

    /// Next text frame parsed as JSON.
    pub async fn recv_json(&mut self) -> Option<serde_json::Value> {
        let text = self.recv_text().await?;
        serde_json::from_str(&text).ok()
    }

    /// Drain the client's frames until it hangs up.
    pub async fn collect_remaining(&mut self) -> Vec<Message> {
        let mut frames = Vec::new();
        while let Some(msg) = self.recv().await {
            frames.push(msg);
        }
        frames
    }

    pub fn send_text(&self, text: &str) -> bool {
        self.to_client
            .unbounded_send(Ok(Message::Text(text.to_string().into())))
            .is_ok()
    }

    pub fn send_json(&self, value: &serde_json::Value) -> bool {
        self.send_text(&value.to_string())
    }

    /// Send a close frame with `code` and stop sending.
    pub fn close(&self, code: u16) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: "".into(),
        };
        let _ = self.to_client.unbounded_send(Ok(Message::Close(Some(frame))));
        self.to_client.close_channel();
    }

    /// Inject a transport-level error.
    pub fn fail(&self) {
        let _ = self
            .to_client
            .unbounded_send(Err(WsError::ConnectionClosed));
        self.to_client.close_channel();
    }
}

/// A [`Connector`] whose connections are served by [`MemoryPeer`]s.
pub struct MemoryConnector {
    peers: mpsc::UnboundedSender<MemoryPeer>,
    gate: Option<Semaphore>,
    failures_left: AtomicU32,
    attempts: AtomicUsize,
}

impl MemoryConnector {
    /// Connections open immediately.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MemoryPeer>) {
        Self::build(None, 0)
    }

    /// Connections stay pending until [`MemoryConnector::open_one`] is called.
    pub fn gated() -> (Arc<Self>, mpsc::UnboundedReceiver<MemoryPeer>) {
        Self::build(Some(Semaphore::new(0)), 0)
    }

    /// The first `failures` connect attempts are refused.
    pub fn failing(failures: u32) -> (Arc<Self>, mpsc::UnboundedReceiver<MemoryPeer>) {
        Self::build(None, failures)
    }

    fn build(
        gate: Option<Semaphore>,
        failures: u32,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            peers,
            gate,
            failures_left: AtomicU32::new(failures),
            attempts: AtomicUsize::new(0),
        });
        (connector, rx)
    }

    /// Let one pending gated connection open.
    pub fn open_one(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    /// Number of connect attempts so far, including refused ones.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, target: &str) -> Result<(FrameSink, FrameStream)> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let refused = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(LiveCodeError::Transport("connection refused".into()));
        }

        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| LiveCodeError::Transport(e.to_string()))?
                .forget();
        }

        let (client_tx, from_client) = fmpsc::unbounded();
        let (to_client, client_rx) = fmpsc::unbounded();

        self.peers
            .send(MemoryPeer {
                target: target.to_string(),
                from_client,
                to_client,
            })
            .map_err(|_| LiveCodeError::Transport("no server listening".into()))?;

        let sink = client_tx.sink_map_err(|_| WsError::ConnectionClosed);
        Ok((Box::pin(sink), Box::pin(client_rx)))
    }
}
