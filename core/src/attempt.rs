//! Connection attempt — drives one negotiation through the relay until the
//! direct transport is up, the deadline passes, or something fails.
//!
//! State machine:
//!
//! ```text
//! Init -> AwaitingChannel -> Exchanging -> { Connected | TimedOut | Failed }
//! ```
//!
//! The attempt task owns its channel and negotiator end to end; the first
//! terminal event ends the loop, so completion happens exactly once.

use crate::channel::{ChannelConnector, ChannelEvent, ChannelPair, TransportChannel};
use crate::negotiator::{
    NegotiatorConfig, NegotiatorEvent, NegotiatorFactory, PeerNegotiator, Role,
};
use crate::protocol::{ConnectionRequest, PeerId, SignalingMessage};
use crate::signal_buffer::{InboundBuffer, OutboundBuffer};
use crate::BootstrapError;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Identifier of a connection attempt, unique per bootstrap client
pub type AttemptId = u64;

/// Called once when an attempt ends, with the peer handle
pub type CompletionCallback<N> = Box<dyn FnOnce(Result<(), BootstrapError>, Arc<N>) + Send>;

/// Attempt lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    /// Created, nothing started yet
    Init,
    /// Relay channel opening
    AwaitingChannel,
    /// Relay channel open, signals flowing
    Exchanging,
    /// Direct transport established
    Connected,
    /// Deadline passed first
    TimedOut,
    /// Channel, negotiator or protocol failure, or client closed
    Failed,
}

impl AttemptState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AttemptState::Connected | AttemptState::TimedOut | AttemptState::Failed
        )
    }
}

/// Per-connect options
pub struct ConnectionOptions<N> {
    /// Deadline for the whole negotiation; the client default when `None`
    pub timeout: Option<Duration>,
    /// Completion callback; failures are reported to the peer when `None`
    pub on_complete: Option<CompletionCallback<N>>,
    /// Engine settings, copied before use
    pub peer_config: Value,
}

impl<N> Default for ConnectionOptions<N> {
    fn default() -> Self {
        Self {
            timeout: None,
            on_complete: None,
            peer_config: Value::Null,
        }
    }
}

impl<N> fmt::Debug for ConnectionOptions<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionOptions")
            .field("timeout", &self.timeout)
            .field("has_on_complete", &self.on_complete.is_some())
            .field("peer_config", &self.peer_config)
            .finish()
    }
}

impl<N: PeerNegotiator> ConnectionOptions<N> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_peer_config(mut self, peer_config: Value) -> Self {
        self.peer_config = peer_config;
        self
    }

    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(Result<(), BootstrapError>, Arc<N>) + Send + 'static,
    {
        self.on_complete = Some(Box::new(callback));
        self
    }

    pub(crate) fn resolve_timeout(&self, default: Duration) -> Result<Duration, BootstrapError> {
        let timeout = self.timeout.unwrap_or(default);
        if timeout.is_zero() {
            return Err(BootstrapError::InvalidOptions(
                "timeout must be greater than zero".to_string(),
            ));
        }
        Ok(timeout)
    }

    pub(crate) fn take_callback(&mut self) -> CompletionCallback<N> {
        match self.on_complete.take() {
            Some(callback) => callback,
            None => Box::new(|result: Result<(), BootstrapError>, peer: Arc<N>| {
                if let Err(e) = result {
                    peer.fail(&e);
                }
            }),
        }
    }
}

/// One in-flight negotiation
pub(crate) struct Attempt<N: PeerNegotiator> {
    id: AttemptId,
    state: AttemptState,
    /// Where outbound messages go; `None` routes through the relay default
    remote: Option<PeerId>,
    /// Our id as assigned by the relay
    local_id: Option<PeerId>,
    initial_signal: Option<Value>,
    timeout: Duration,
    next_rank: u64,
    channel_closed: bool,
    negotiator: Arc<N>,
    negotiator_events: UnboundedReceiver<NegotiatorEvent>,
    channel: Box<dyn TransportChannel>,
    channel_events: UnboundedReceiver<ChannelEvent>,
    outbound: OutboundBuffer,
    inbound: InboundBuffer,
}

impl<N: PeerNegotiator> Attempt<N> {
    /// Build the negotiator and open the join channel for a request
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn prepare<F>(
        id: AttemptId,
        request: ConnectionRequest,
        peer_config: &Value,
        factory: &F,
        connector: &dyn ChannelConnector,
        join_url: &str,
        timeout: Duration,
        retry_interval: Duration,
    ) -> Result<Self, BootstrapError>
    where
        F: NegotiatorFactory<Negotiator = N>,
    {
        let role = if request.is_initiator() {
            Role::Initiator
        } else {
            Role::Responder
        };
        let config = NegotiatorConfig::derive(role, peer_config);
        debug!("attempt {}: creating negotiator as {:?}", id, role);
        let (negotiator, negotiator_events) = factory.create(config)?;

        let channel = connector.open(join_url);
        Ok(Self::new(
            id,
            request,
            timeout,
            retry_interval,
            negotiator,
            negotiator_events,
            channel,
        ))
    }

    pub(crate) fn new(
        id: AttemptId,
        request: ConnectionRequest,
        timeout: Duration,
        retry_interval: Duration,
        negotiator: Arc<N>,
        negotiator_events: UnboundedReceiver<NegotiatorEvent>,
        (channel, channel_events): ChannelPair,
    ) -> Self {
        Self {
            id,
            state: AttemptState::Init,
            remote: request.origin,
            local_id: None,
            initial_signal: request.signal,
            timeout,
            next_rank: 0,
            channel_closed: false,
            negotiator,
            negotiator_events,
            channel,
            channel_events,
            outbound: OutboundBuffer::new(),
            inbound: InboundBuffer::new(retry_interval),
        }
    }

    pub(crate) fn negotiator(&self) -> Arc<N> {
        Arc::clone(&self.negotiator)
    }

    /// Drive the attempt to a terminal state, releasing the channel on every path
    pub(crate) async fn run(
        mut self,
        mut shutdown: oneshot::Receiver<()>,
    ) -> (AttemptState, Result<(), BootstrapError>) {
        let result = self.exchange(&mut shutdown).await;
        self.channel.destroy();

        self.state = match &result {
            Ok(()) => AttemptState::Connected,
            Err(BootstrapError::Timeout(_)) => AttemptState::TimedOut,
            Err(_) => AttemptState::Failed,
        };
        match &result {
            Ok(()) => info!("bootstrap succeeded, closed signaling channel"),
            Err(e) => info!("bootstrap failed ({}), closed signaling channel", e),
        }
        (self.state, result)
    }

    async fn exchange(&mut self, shutdown: &mut oneshot::Receiver<()>) -> Result<(), BootstrapError> {
        self.state = AttemptState::AwaitingChannel;

        if let Some(signal) = self.initial_signal.take() {
            debug!("delivering initial signal from request");
            self.inbound.deliver(signal, &*self.negotiator)?;
        }

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);
        let mut negotiator_live = true;
        let mut channel_live = true;

        loop {
            let retry_at = self.inbound.retry_at();
            // Channel events before negotiator events: a queued Close must
            // be seen before any signal produced after it is sent
            tokio::select! {
                biased;
                _ = &mut *shutdown => return Err(BootstrapError::Closed),
                _ = &mut deadline => {
                    warn!("bootstrap timeout after {:?}", self.timeout);
                    return Err(BootstrapError::Timeout(self.timeout));
                }
                event = self.channel_events.recv(), if channel_live => match event {
                    Some(ChannelEvent::Open) => self.on_channel_open()?,
                    Some(ChannelEvent::Message(text)) => self.on_channel_message(&text)?,
                    Some(ChannelEvent::Error(reason)) => {
                        warn!("signaling channel error: {}", reason);
                        return Err(BootstrapError::Channel(reason));
                    }
                    Some(ChannelEvent::Close) | None => {
                        info!("signaling channel closed by relay");
                        channel_live = false;
                        self.channel_closed = true;
                    }
                },
                event = self.negotiator_events.recv(), if negotiator_live => match event {
                    Some(NegotiatorEvent::Signal(signal)) => self.send_signal(signal)?,
                    Some(NegotiatorEvent::Connected) => return Ok(()),
                    Some(NegotiatorEvent::Error(reason)) => {
                        return Err(BootstrapError::Negotiator(reason));
                    }
                    None => {
                        debug!("negotiator event stream ended");
                        negotiator_live = false;
                    }
                },
                _ = tokio::time::sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                    self.inbound.retry(&*self.negotiator)?;
                }
            }
        }
    }

    fn send_signal(&mut self, signal: Value) -> Result<(), BootstrapError> {
        let rank = self.next_rank;
        self.next_rank += 1;

        if self.channel_closed {
            warn!("signal rank {} produced after channel closed; dropped", rank);
            return Ok(());
        }

        let message = SignalingMessage::outbound(self.remote.clone(), signal, rank);
        debug!(
            "sending signal rank {} to {}",
            rank,
            message.destination.as_deref().unwrap_or("<default route>")
        );
        self.outbound.send(message, &mut *self.channel)
    }

    fn on_channel_open(&mut self) -> Result<(), BootstrapError> {
        self.state = AttemptState::Exchanging;
        let flushed = self.outbound.open(&mut *self.channel)?;
        info!("signaling channel connected, flushed {} queued signals", flushed);
        Ok(())
    }

    fn on_channel_message(&mut self, text: &str) -> Result<(), BootstrapError> {
        let message = SignalingMessage::from_json(text)?;
        debug!("signal received, rank {}", message.rank);

        // Address the remote peer directly from now on instead of
        // going through the relay's default route
        if self.remote.is_none() {
            if let Some(origin) = &message.origin {
                info!("learned remote peer {}", origin);
                self.remote = Some(origin.clone());
            }
        }
        if message.destination.is_some() && self.local_id != message.destination {
            debug!("relay assigned local id {:?}", message.destination);
            self.local_id = message.destination.clone();
        }

        self.inbound.deliver(message.signal, &*self.negotiator)?;
        Ok(())
    }

    pub(crate) fn id(&self) -> AttemptId {
        self.id
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> AttemptState {
        self.state
    }
}

// ============================================================================
// TESTS
// ============================================================================
