// RTC Bootstrap — signaling client
//
// Relays negotiation signals between two peers through a bootstrap relay
// until their direct transport is live, then gets out of the way.

pub mod attempt;
pub mod channel;
pub mod client;
pub mod config;
pub mod negotiator;
pub mod protocol;
pub mod root;
pub mod signal_buffer;

use std::time::Duration;
use thiserror::Error;

pub use attempt::{AttemptId, AttemptState, CompletionCallback, ConnectionOptions};
pub use channel::{ChannelConnector, ChannelError, ChannelEvent, TransportChannel};
pub use client::BootstrapClient;
pub use config::{BootstrapConfig, HostEndpoint};
pub use negotiator::{
    NegotiatorConfig, NegotiatorError, NegotiatorEvent, NegotiatorFactory, PeerNegotiator, Role,
};
pub use protocol::{ConnectionRequest, PeerId, RootFrame, SignalingMessage, HEARTBEAT};
pub use root::{RequestHandler, RootEvent};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Errors surfaced by the bootstrap client.
///
/// Attempt-fatal errors reach the caller exactly once, through the attempt's
/// completion callback. Root registration errors reach the request handler
/// as [`RootEvent::Error`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BootstrapError {
    #[error("Bootstrap timeout after {0:?}")]
    Timeout(Duration),
    #[error("Channel error: {0}")]
    Channel(String),
    #[error("Malformed message: {0}")]
    MalformedMessage(String),
    #[error("Negotiator error: {0}")]
    Negotiator(String),
    #[error("Invalid options: {0}")]
    InvalidOptions(String),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Root registration already active")]
    AlreadyRegistered,
    #[error("Bootstrap client closed")]
    Closed,
}

impl BootstrapError {
    /// True when the attempt ran out of time rather than failing outright
    pub fn is_timeout(&self) -> bool {
        matches!(self, BootstrapError::Timeout(_))
    }
}

impl From<ChannelError> for BootstrapError {
    fn from(err: ChannelError) -> Self {
        BootstrapError::Channel(err.to_string())
    }
}

impl From<NegotiatorError> for BootstrapError {
    fn from(err: NegotiatorError) -> Self {
        BootstrapError::Negotiator(err.to_string())
    }
}

impl From<serde_json::Error> for BootstrapError {
    fn from(err: serde_json::Error) -> Self {
        BootstrapError::MalformedMessage(err.to_string())
    }
}

// ============================================================================
// LOGGING
// ============================================================================

/// Install a `tracing` fmt subscriber filtered by `RUST_LOG` (default `info`).
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}
