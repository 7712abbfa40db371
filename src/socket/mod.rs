//! Transport for protocol frames.
//!
//! The connection layer talks to a [`Connector`], which opens a transport
//! and hands back a pair of channels. [`WebSocketConnector`] is the real
//! network; [`MemoryConnector`] stands in for it in tests and demos.

mod frame;
mod memory;
mod websocket;

use futures::future::BoxFuture;
use tokio::sync::mpsc;

pub use frame::{encode_frame, FrameBuffer, MAX_FRAME_LEN};
pub use memory::{ConnectOutcome, MemoryConnector, MemoryListener, MemoryPeer};
pub use websocket::WebSocketConnector;

use crate::error::ConnectionError;

/// WebSocket close code for a deliberate close.
pub const NORMAL_CLOSURE: u16 = 1000;
/// Close code reported when the peer's close frame carried no status.
pub const NO_STATUS_RECEIVED: u16 = 1005;
/// Close code reported when the peer vanished without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Instruction to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Frame(Vec<u8>),
    /// Close with the given code.
    Close(u16),
}

/// Something that happened on the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Frame(Vec<u8>),
    Closed { code: u16, reason: String },
}

/// An open transport. Dropping `outgoing` closes it.
#[derive(Debug)]
pub struct TransportHandle {
    pub outgoing: mpsc::UnboundedSender<Outbound>,
    pub incoming: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Where and how to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub endpoint: String,
    pub origin: String,
    pub user_agent: String,
}

/// Opens transports.
pub trait Connector: Send + Sync {
    fn connect(&self, request: ConnectRequest) -> BoxFuture<'static, Result<TransportHandle, ConnectionError>>;
}
