//! Signaling wire protocol — messages and JSON framing

use crate::BootstrapError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Relay-assigned peer identifier
pub type PeerId = String;

/// Keepalive marker exchanged on the root channel (JSON-encoded string)
pub const HEARTBEAT: &str = "heartbeat";

/// A negotiation signal in transit through the relay.
///
/// `origin: None` asks the relay to fill in our id; `destination: None`
/// routes through the relay's default path (the root / tree overlay).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalingMessage {
    pub origin: Option<PeerId>,
    pub destination: Option<PeerId>,
    /// Opaque negotiation payload
    pub signal: Value,
    /// Per-attempt sequence number, starting at 0
    pub rank: u64,
}

impl SignalingMessage {
    /// Build an outbound message; the relay assigns the origin
    pub fn outbound(destination: Option<PeerId>, signal: Value, rank: u64) -> Self {
        Self {
            origin: None,
            destination,
            signal,
            rank,
        }
    }

    /// Encode as a JSON text frame
    pub fn to_json(&self) -> Result<String, BootstrapError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a JSON text frame
    pub fn from_json(text: &str) -> Result<Self, BootstrapError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// A request to connect, either fresh (initiator) or relayed from a remote
/// peer through the root channel (responder).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRequest {
    /// Remote peer that asked for the connection; `None` for initiators
    #[serde(default)]
    pub origin: Option<PeerId>,
    /// First signal from the remote peer, delivered as soon as we start
    #[serde(default)]
    pub signal: Option<Value>,
}

impl ConnectionRequest {
    /// Request for an outbound connection through the default route
    pub fn initiator() -> Self {
        Self::default()
    }

    /// Request answering a remote peer's offer
    pub fn responder(origin: impl Into<PeerId>, signal: Value) -> Self {
        Self {
            origin: Some(origin.into()),
            signal: Some(signal),
        }
    }

    pub fn is_initiator(&self) -> bool {
        self.origin.is_none()
    }
}

impl From<SignalingMessage> for ConnectionRequest {
    fn from(message: SignalingMessage) -> Self {
        Self {
            origin: message.origin,
            signal: Some(message.signal),
        }
    }
}

/// A decoded frame received on the root channel
#[derive(Debug, Clone, PartialEq)]
pub enum RootFrame {
    /// Keepalive
    Heartbeat,
    /// A peer asking to connect through us
    Request(SignalingMessage),
}

impl RootFrame {
    /// Decode a root channel frame
    pub fn decode(text: &str) -> Result<Self, BootstrapError> {
        let value: Value = serde_json::from_str(text)?;
        match value {
            Value::String(marker) if marker == HEARTBEAT => Ok(RootFrame::Heartbeat),
            other => Ok(RootFrame::Request(serde_json::from_value(other)?)),
        }
    }

    /// Encoded keepalive frame
    pub fn heartbeat() -> String {
        Value::String(HEARTBEAT.to_string()).to_string()
    }
}

// ============================================================================
// TESTS
// ============================================================================
