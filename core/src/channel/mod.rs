//! Transport channel abstraction — a duplex, message-oriented link to the relay
//!
//! Opening a channel returns immediately; readiness, inbound frames and
//! failures arrive later as [`ChannelEvent`]s on the paired receiver.

pub mod memory;
#[cfg(not(target_arch = "wasm32"))]
pub mod websocket;

use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;

pub use memory::{MemoryChannel, MemoryConnector, RelaySide};
#[cfg(not(target_arch = "wasm32"))]
pub use websocket::{WebSocketChannel, WebSocketConnector};

/// Events emitted by a transport channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The channel is connected and accepts sends
    Open,
    /// A text frame arrived
    Message(String),
    /// The remote end closed the channel
    Close,
    /// The channel failed; no further events follow
    Error(String),
}

/// Transport channel error types
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Channel closed")]
    Closed,
    #[error("Send failed: {0}")]
    SendFailed(String),
}

/// Sending half of a channel to the relay
#[cfg_attr(test, mockall::automock)]
pub trait TransportChannel: Send {
    /// Queue a text frame for the relay
    fn send(&mut self, frame: String) -> Result<(), ChannelError>;

    /// Release the channel. Safe to call any number of times.
    fn destroy(&mut self);

    fn is_destroyed(&self) -> bool;
}

/// A channel together with its event stream
pub type ChannelPair = (Box<dyn TransportChannel>, UnboundedReceiver<ChannelEvent>);

/// Opens channels to relay endpoints
pub trait ChannelConnector: Send + Sync {
    fn open(&self, url: &str) -> ChannelPair;
}
