//! Peer negotiator abstraction — the engine that produces and consumes
//! negotiation signals (offers, answers, candidates) for one direct transport.
//!
//! The engine is shared as `Arc<N>`: the bootstrap client hands the same
//! handle to the caller immediately and to the completion callback later.

use crate::BootstrapError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;

/// Which side of the negotiation we are
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Opens the negotiation (no remote peer known yet)
    Initiator,
    /// Answers a remote peer's request
    Responder,
}

impl Role {
    pub fn is_initiator(&self) -> bool {
        *self == Role::Initiator
    }
}

/// Configuration for one negotiator instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegotiatorConfig {
    pub role: Role,
    /// Engine-specific settings, passed through untouched
    pub settings: Value,
}

impl NegotiatorConfig {
    /// Derive a fresh configuration from caller-owned settings
    pub fn derive(role: Role, settings: &Value) -> Self {
        Self {
            role,
            settings: settings.clone(),
        }
    }
}

/// Events emitted by a negotiator
#[derive(Debug, Clone, PartialEq)]
pub enum NegotiatorEvent {
    /// A signal to forward to the remote peer
    Signal(Value),
    /// The direct transport is established
    Connected,
    /// The engine failed
    Error(String),
}

/// Negotiator error types
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NegotiatorError {
    #[error("Negotiator not ready for signals")]
    NotReady,
    #[error("Signal rejected: {0}")]
    Rejected(String),
}

/// Negotiation engine driven by a connection attempt
#[cfg_attr(test, mockall::automock)]
pub trait PeerNegotiator: Send + Sync + 'static {
    /// Whether the engine can accept an inbound signal right now
    fn is_ready(&self) -> bool;

    /// Apply one inbound signal from the remote peer
    fn signal(&self, signal: Value) -> Result<(), NegotiatorError>;

    /// Told when the bootstrap of this peer failed. The handle must be
    /// treated as unusable afterwards.
    fn fail(&self, _error: &BootstrapError) {}
}

/// Creates negotiators for connection attempts
pub trait NegotiatorFactory: Send + Sync + 'static {
    type Negotiator: PeerNegotiator;

    fn create(
        &self,
        config: NegotiatorConfig,
    ) -> Result<(Arc<Self::Negotiator>, UnboundedReceiver<NegotiatorEvent>), NegotiatorError>;
}
