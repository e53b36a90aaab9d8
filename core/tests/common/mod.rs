//! Shared fixtures: a scripted negotiation engine and an in-process relay.

#![allow(dead_code)]

use parking_lot::Mutex;
use rtc_bootstrap_core::channel::{MemoryConnector, RelaySide};
use rtc_bootstrap_core::{
    BootstrapClient, BootstrapConfig, BootstrapError, ConnectionOptions, NegotiatorConfig,
    NegotiatorError, NegotiatorEvent, NegotiatorFactory, PeerNegotiator, SignalingMessage,
};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Negotiator whose outbound behaviour is driven by the test through [`Engine`]
pub struct ScriptedPeer {
    pub config: NegotiatorConfig,
    ready: AtomicBool,
    received: Mutex<Vec<Value>>,
    failures: Mutex<Vec<BootstrapError>>,
}

impl ScriptedPeer {
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn received(&self) -> Vec<Value> {
        self.received.lock().clone()
    }

    pub fn failures(&self) -> Vec<BootstrapError> {
        self.failures.lock().clone()
    }
}

impl PeerNegotiator for ScriptedPeer {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn signal(&self, signal: Value) -> Result<(), NegotiatorError> {
        self.received.lock().push(signal);
        Ok(())
    }

    fn fail(&self, error: &BootstrapError) {
        self.failures.lock().push(error.clone());
    }
}

/// Test-side handle on one created negotiator
pub struct Engine {
    pub peer: Arc<ScriptedPeer>,
    events: UnboundedSender<NegotiatorEvent>,
}

impl Engine {
    pub fn emit(&self, signal: Value) {
        let _ = self.events.send(NegotiatorEvent::Signal(signal));
    }

    pub fn connected(&self) {
        let _ = self.events.send(NegotiatorEvent::Connected);
    }

    pub fn error(&self, reason: &str) {
        let _ = self.events.send(NegotiatorEvent::Error(reason.to_string()));
    }
}

pub struct ScriptedFactory {
    engines: UnboundedSender<Engine>,
    start_ready: bool,
}

impl NegotiatorFactory for ScriptedFactory {
    type Negotiator = ScriptedPeer;

    fn create(
        &self,
        config: NegotiatorConfig,
    ) -> Result<(Arc<ScriptedPeer>, UnboundedReceiver<NegotiatorEvent>), NegotiatorError> {
        let (events, rx) = mpsc::unbounded_channel();
        let peer = Arc::new(ScriptedPeer {
            config,
            ready: AtomicBool::new(self.start_ready),
            received: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
        });
        let _ = self.engines.send(Engine {
            peer: Arc::clone(&peer),
            events,
        });
        Ok((peer, rx))
    }
}

/// A client wired to an in-process relay
pub struct Node {
    pub client: BootstrapClient<ScriptedFactory>,
    pub relays: UnboundedReceiver<RelaySide>,
    pub engines: UnboundedReceiver<Engine>,
}

impl Node {
    pub async fn next_relay(&mut self) -> RelaySide {
        self.relays.recv().await.expect("connector dropped")
    }

    pub async fn next_engine(&mut self) -> Engine {
        self.engines.recv().await.expect("factory dropped")
    }
}

pub fn node(start_ready: bool) -> Node {
    let (connector, relays) = MemoryConnector::new();
    let (engines_tx, engines) = mpsc::unbounded_channel();
    let factory = ScriptedFactory {
        engines: engines_tx,
        start_ready,
    };
    let config = BootstrapConfig::new("relay.test:5000", false);
    let client = BootstrapClient::new(config, factory, Arc::new(connector))
        .expect("valid config");
    Node {
        client,
        relays,
        engines,
    }
}

pub type Outcomes = Arc<Mutex<Vec<Result<(), BootstrapError>>>>;

pub fn outcomes() -> Outcomes {
    Arc::new(Mutex::new(Vec::new()))
}

/// Options whose callback records every outcome
pub fn recording(outcomes: &Outcomes) -> ConnectionOptions<ScriptedPeer> {
    let outcomes = Arc::clone(outcomes);
    ConnectionOptions::new().on_complete(move |result, _peer| outcomes.lock().push(result))
}

pub fn decode(frame: &str) -> SignalingMessage {
    SignalingMessage::from_json(frame).expect("client sent malformed frame")
}

pub fn encode(origin: Option<&str>, destination: Option<&str>, signal: Value, rank: u64) -> String {
    SignalingMessage {
        origin: origin.map(str::to_string),
        destination: destination.map(str::to_string),
        signal,
        rank,
    }
    .to_json()
    .expect("serializable message")
}

/// Let spawned tasks run until they block
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
