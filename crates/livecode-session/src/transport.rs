//! Transport seam between a session and the network.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, Stream, StreamExt};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::debug;

use livecode_core::{LiveCodeError, Result};

/// Outbound half of a connected transport.
pub type FrameSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;

/// Inbound half of a connected transport.
pub type FrameStream = Pin<Box<dyn Stream<Item = std::result::Result<Message, WsError>> + Send>>;

/// Opens transport connections. Resolving `connect` means the transport is open.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, target: &str) -> Result<(FrameSink, FrameStream)>;
}

/// WebSocket transport backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, target: &str) -> Result<(FrameSink, FrameStream)> {
        debug!(url = target, "Opening WebSocket");
        let (ws, _response) = tokio_tungstenite::connect_async(target)
            .await
            .map_err(|e| LiveCodeError::Transport(e.to_string()))?;
        let (sink, stream) = ws.split();
        Ok((Box::pin(sink), Box::pin(stream)))
    }
}
