//! In-process transport channels
//!
//! Every channel opened through a [`MemoryConnector`] hands its relay-facing
//! end to the embedding code as a [`RelaySide`]. The relay side decides when
//! the channel opens, what arrives, and observes every frame the client sends.

use super::{ChannelConnector, ChannelError, ChannelEvent, ChannelPair, TransportChannel};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

#[derive(Debug, Default)]
struct ReleaseState {
    destroyed: AtomicBool,
    releases: AtomicUsize,
}

/// Client end of an in-process channel
#[derive(Debug)]
pub struct MemoryChannel {
    frames: UnboundedSender<String>,
    state: Arc<ReleaseState>,
}

impl TransportChannel for MemoryChannel {
    fn send(&mut self, frame: String) -> Result<(), ChannelError> {
        if self.state.destroyed.load(Ordering::SeqCst) {
            return Err(ChannelError::Closed);
        }
        self.frames
            .send(frame)
            .map_err(|_| ChannelError::SendFailed("relay side dropped".to_string()))
    }

    fn destroy(&mut self) {
        if !self.state.destroyed.swap(true, Ordering::SeqCst) {
            self.state.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_destroyed(&self) -> bool {
        self.state.destroyed.load(Ordering::SeqCst)
    }
}

/// Relay end of an in-process channel
#[derive(Debug)]
pub struct RelaySide {
    url: String,
    events: UnboundedSender<ChannelEvent>,
    frames: UnboundedReceiver<String>,
    state: Arc<ReleaseState>,
}

impl RelaySide {
    /// URL the client asked for
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Report the channel as connected
    pub fn open(&self) {
        self.emit(ChannelEvent::Open);
    }

    /// Deliver a text frame to the client
    pub fn deliver(&self, frame: impl Into<String>) {
        self.emit(ChannelEvent::Message(frame.into()));
    }

    /// Close the channel from the relay side
    pub fn close(&self) {
        self.emit(ChannelEvent::Close);
    }

    /// Fail the channel
    pub fn fail(&self, reason: impl Into<String>) {
        self.emit(ChannelEvent::Error(reason.into()));
    }

    /// Next frame sent by the client; `None` once the client end is gone
    pub async fn recv_frame(&mut self) -> Option<String> {
        self.frames.recv().await
    }

    /// A frame already sent by the client, without waiting
    pub fn try_recv_frame(&mut self) -> Option<String> {
        self.frames.try_recv().ok()
    }

    /// Whether the client released its end
    pub fn is_destroyed(&self) -> bool {
        self.state.destroyed.load(Ordering::SeqCst)
    }

    /// How many times the client end was actually released (0 or 1)
    pub fn releases(&self) -> usize {
        self.state.releases.load(Ordering::SeqCst)
    }

    fn emit(&self, event: ChannelEvent) {
        if self.events.send(event).is_err() {
            debug!("memory channel {}: client stopped listening", self.url);
        }
    }
}

/// Connector producing in-process channels
#[derive(Debug)]
pub struct MemoryConnector {
    accepted: UnboundedSender<RelaySide>,
}

impl MemoryConnector {
    /// Create a connector and the stream of relay sides it opens
    pub fn new() -> (Self, UnboundedReceiver<RelaySide>) {
        let (accepted, relay_sides) = mpsc::unbounded_channel();
        (Self { accepted }, relay_sides)
    }
}

impl ChannelConnector for MemoryConnector {
    fn open(&self, url: &str) -> ChannelPair {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let state = Arc::new(ReleaseState::default());

        let relay = RelaySide {
            url: url.to_string(),
            events: event_tx,
            frames: frame_rx,
            state: Arc::clone(&state),
        };
        if self.accepted.send(relay).is_err() {
            debug!("memory connector: nobody accepts channels for {}", url);
        }

        let channel = MemoryChannel {
            frames: frame_tx,
            state,
        };
        (Box::new(channel), event_rx)
    }
}
