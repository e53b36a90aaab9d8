//! Signal buffers — decouple signal timing from endpoint readiness
//!
//! Outbound: signals produced before the relay channel opens are held in
//! production order and flushed in one pass when it opens.
//!
//! Inbound: the negotiator may not accept signals right after creation.
//! Signals are held until it reports ready, polled on a fixed interval,
//! then delivered in receipt order; after that delivery is direct.

use crate::channel::TransportChannel;
use crate::negotiator::{NegotiatorError, PeerNegotiator};
use crate::protocol::SignalingMessage;
use crate::BootstrapError;
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Queue of outbound messages waiting for the relay channel
#[derive(Debug, Default)]
pub struct OutboundBuffer {
    open: bool,
    pending: VecDeque<SignalingMessage>,
}

impl OutboundBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send now if the channel is open, otherwise queue
    pub fn send(
        &mut self,
        message: SignalingMessage,
        channel: &mut dyn TransportChannel,
    ) -> Result<(), BootstrapError> {
        if self.open {
            channel.send(message.to_json()?)?;
        } else {
            debug!("channel not open, queueing signal rank {}", message.rank);
            self.pending.push_back(message);
        }
        Ok(())
    }

    /// Mark the channel open and flush everything queued, in order.
    /// Returns how many messages were flushed.
    pub fn open(&mut self, channel: &mut dyn TransportChannel) -> Result<usize, BootstrapError> {
        self.open = true;
        let mut flushed = 0;
        while let Some(message) = self.pending.pop_front() {
            channel.send(message.to_json()?)?;
            flushed += 1;
        }
        Ok(flushed)
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Negotiator readiness as seen by the inbound buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    NotReady,
    Ready,
}

/// Queue of inbound signals waiting for the negotiator
#[derive(Debug)]
pub struct InboundBuffer {
    readiness: Readiness,
    pending: VecDeque<Value>,
    retry_interval: Duration,
    retry_at: Option<Instant>,
}

impl InboundBuffer {
    pub fn new(retry_interval: Duration) -> Self {
        Self {
            readiness: Readiness::NotReady,
            pending: VecDeque::new(),
            retry_interval,
            retry_at: None,
        }
    }

    /// Deliver one inbound signal, queueing it while the negotiator is not ready
    pub fn deliver<N: PeerNegotiator + ?Sized>(
        &mut self,
        signal: Value,
        negotiator: &N,
    ) -> Result<(), NegotiatorError> {
        match self.readiness {
            Readiness::Ready => negotiator.signal(signal),
            Readiness::NotReady => {
                self.pending.push_back(signal);
                self.drain(negotiator)
            }
        }
    }

    /// Retry timer fired: check readiness again
    pub fn retry<N: PeerNegotiator + ?Sized>(&mut self, negotiator: &N) -> Result<(), NegotiatorError> {
        self.retry_at = None;
        if self.readiness == Readiness::Ready {
            return Ok(());
        }
        self.drain(negotiator)
    }

    /// When the pending retry should fire, if one is scheduled
    pub fn retry_at(&self) -> Option<Instant> {
        self.retry_at
    }

    pub fn readiness(&self) -> Readiness {
        self.readiness
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn drain<N: PeerNegotiator + ?Sized>(&mut self, negotiator: &N) -> Result<(), NegotiatorError> {
        if !negotiator.is_ready() {
            self.schedule_retry();
            return Ok(());
        }

        while let Some(signal) = self.pending.pop_front() {
            match negotiator.signal(signal.clone()) {
                Ok(()) => {}
                Err(NegotiatorError::NotReady) => {
                    // Engine reported ready but still refused; keep order and wait
                    self.pending.push_front(signal);
                    self.schedule_retry();
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }

        debug!("negotiator ready, switching to direct delivery");
        self.readiness = Readiness::Ready;
        self.retry_at = None;
        Ok(())
    }

    fn schedule_retry(&mut self) {
        if self.retry_at.is_none() {
            self.retry_at = Some(Instant::now() + self.retry_interval);
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
