//! Root registration — a long-lived relay channel, identified by a shared
//! secret, through which other peers' connection requests arrive.
//!
//! The keepalive runs only while the channel is open. Channel failures are
//! reported to the request handler; the registration then ends and the
//! owner may register again.

use crate::channel::{ChannelEvent, ChannelPair, TransportChannel};
use crate::protocol::{RootFrame, SignalingMessage};
use crate::BootstrapError;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn, Instrument};

/// Something the root channel reports to its owner
#[derive(Debug, Clone, PartialEq)]
pub enum RootEvent {
    /// A peer wants to connect; answer with `BootstrapClient::connect`
    Request(SignalingMessage),
    /// The registration hit an error
    Error(BootstrapError),
}

/// Receives root events
pub type RequestHandler = Arc<dyn Fn(RootEvent) + Send + Sync>;

/// Short stable tag identifying a secret in logs without revealing it
pub(crate) fn secret_tag(secret: &str) -> String {
    let mut hasher = DefaultHasher::new();
    secret.hash(&mut hasher);
    format!("{:08x}", hasher.finish() as u32)
}

/// Handle to a running root registration
pub(crate) struct RootRegistration {
    tag: String,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl RootRegistration {
    pub(crate) fn start(
        secret: &str,
        channel: ChannelPair,
        heartbeat_interval: Duration,
        handler: RequestHandler,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (channel, events) = channel;
        let session = RootSession {
            channel,
            events,
            heartbeat_interval,
            heartbeat: None,
            handler,
        };

        let tag = secret_tag(secret);
        let span = tracing::info_span!("root", secret = %tag);
        let task = tokio::spawn(session.run(shutdown_rx).instrument(span));
        Self {
            tag,
            shutdown: Some(shutdown_tx),
            task,
        }
    }

    /// Whether the registration is still running
    pub(crate) fn is_active(&self) -> bool {
        self.shutdown.is_some() && !self.task.is_finished()
    }

    /// Stop the registration and release its channel. Idempotent.
    pub(crate) fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            info!("root({}) closing", self.tag);
            let _ = shutdown.send(());
        }
    }
}

struct RootSession {
    channel: Box<dyn TransportChannel>,
    events: UnboundedReceiver<ChannelEvent>,
    heartbeat_interval: Duration,
    /// Present exactly while the channel is open
    heartbeat: Option<Interval>,
    handler: RequestHandler,
}

impl RootSession {
    async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                event = self.events.recv() => match event {
                    Some(ChannelEvent::Open) => self.on_open(),
                    Some(ChannelEvent::Message(text)) => self.on_message(&text),
                    Some(ChannelEvent::Close) | None => {
                        info!("root channel closed");
                        break;
                    }
                    Some(ChannelEvent::Error(reason)) => {
                        warn!("root channel error: {}", reason);
                        (self.handler)(RootEvent::Error(BootstrapError::Channel(reason)));
                        break;
                    }
                },
                _ = next_heartbeat(&mut self.heartbeat) => {
                    if let Err(e) = self.channel.send(RootFrame::heartbeat()) {
                        warn!("root heartbeat failed: {}", e);
                        (self.handler)(RootEvent::Error(e.into()));
                        break;
                    }
                    debug!("root heartbeat sent");
                }
            }
        }

        self.heartbeat = None;
        self.channel.destroy();
    }

    fn on_open(&mut self) {
        info!("root connected");
        let mut heartbeat = time::interval_at(
            Instant::now() + self.heartbeat_interval,
            self.heartbeat_interval,
        );
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.heartbeat = Some(heartbeat);
    }

    fn on_message(&mut self, text: &str) {
        match RootFrame::decode(text) {
            Ok(RootFrame::Heartbeat) => debug!("root heartbeat received"),
            Ok(RootFrame::Request(message)) => {
                info!(
                    "root offer received from {}",
                    message.origin.as_deref().unwrap_or("<unknown>")
                );
                (self.handler)(RootEvent::Request(message));
            }
            Err(e) => {
                warn!("root received malformed payload: {}", e);
                (self.handler)(RootEvent::Error(e));
            }
        }
    }
}

async fn next_heartbeat(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

// ============================================================================
// TESTS
// ============================================================================
