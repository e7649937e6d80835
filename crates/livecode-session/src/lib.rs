//! LiveCode sessions.
//!
//! A [`Session`] owns one transport connection for the duration of one run:
//! it sends a single `exec` frame once the transport opens, decodes every
//! inbound frame, and reports [`SessionEvent`]s to its owner in arrival order.

pub mod http;
pub mod memory;
pub mod session;
pub mod transport;

pub use http::{ExecClient, RuntimeOptions, RuntimeOutput, TextStream};
pub use memory::{MemoryConnector, MemoryPeer};
pub use session::{
    CloseReason, EventSender, Session, SessionEvent, SessionId, SessionOptions, TimeoutKind,
    TransportState,
};
pub use transport::{Connector, FrameSink, FrameStream, WsConnector};
