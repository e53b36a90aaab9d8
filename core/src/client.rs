//! Bootstrap client — entry point for root registration and connection
//! attempts against one relay service.

use crate::attempt::{Attempt, AttemptId, ConnectionOptions};
use crate::channel::ChannelConnector;
use crate::config::BootstrapConfig;
use crate::negotiator::NegotiatorFactory;
use crate::protocol::ConnectionRequest;
use crate::root::{secret_tag, RequestHandler, RootRegistration};
use crate::BootstrapError;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, Instrument};

/// Signaling client for one relay service.
///
/// Must be used from within a Tokio runtime: every root registration and
/// connection attempt runs as its own task.
pub struct BootstrapClient<F: NegotiatorFactory> {
    config: BootstrapConfig,
    connector: Arc<dyn ChannelConnector>,
    factory: Arc<F>,
    root: Mutex<Option<RootRegistration>>,
    /// Shutdown handles of in-flight attempts
    attempts: Arc<RwLock<HashMap<AttemptId, oneshot::Sender<()>>>>,
    next_attempt_id: AtomicU64,
    closed: AtomicBool,
}

impl<F: NegotiatorFactory> BootstrapClient<F> {
    /// Create a client over any channel connector
    pub fn new(
        config: BootstrapConfig,
        factory: F,
        connector: Arc<dyn ChannelConnector>,
    ) -> Result<Self, BootstrapError> {
        config.validate()?;
        info!("bootstrap client for {}", config.host.join_url());
        Ok(Self {
            config,
            connector,
            factory: Arc::new(factory),
            root: Mutex::new(None),
            attempts: Arc::new(RwLock::new(HashMap::new())),
            next_attempt_id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Create a client that reaches the relay over WebSocket
    #[cfg(not(target_arch = "wasm32"))]
    pub fn with_websocket(config: BootstrapConfig, factory: F) -> Result<Self, BootstrapError> {
        Self::new(
            config,
            factory,
            Arc::new(crate::channel::WebSocketConnector::new()),
        )
    }

    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    /// Register as the root for `secret`. Connection requests from other
    /// peers reach `handler` as [`RootEvent::Request`](crate::RootEvent).
    ///
    /// A registration that ended (relay closed it, or it failed) may be
    /// replaced by registering again.
    pub fn register_as_root(
        &self,
        secret: &str,
        handler: RequestHandler,
    ) -> Result<(), BootstrapError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BootstrapError::Closed);
        }
        if secret.is_empty() || secret.contains('/') {
            return Err(BootstrapError::InvalidOptions(
                "root secret must be a non-empty path segment".to_string(),
            ));
        }

        let mut root = self.root.lock();
        if root.as_ref().map_or(false, RootRegistration::is_active) {
            return Err(BootstrapError::AlreadyRegistered);
        }

        info!(
            "registering as root on {} (secret {})",
            self.config.host.address,
            secret_tag(secret)
        );
        let channel = self.connector.open(&self.config.host.root_url(secret));
        *root = Some(RootRegistration::start(
            secret,
            channel,
            self.config.heartbeat_interval(),
            handler,
        ));
        Ok(())
    }

    /// Start a connection attempt.
    ///
    /// Returns the peer handle right away; the outcome arrives later,
    /// exactly once, through the options' completion callback.
    pub fn connect(
        &self,
        request: ConnectionRequest,
        mut options: ConnectionOptions<F::Negotiator>,
    ) -> Result<Arc<F::Negotiator>, BootstrapError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BootstrapError::Closed);
        }
        let timeout = options.resolve_timeout(self.config.default_timeout())?;
        let on_complete = options.take_callback();
        let id = self.next_attempt_id.fetch_add(1, Ordering::SeqCst);

        let attempt = Attempt::prepare(
            id,
            request,
            &options.peer_config,
            &*self.factory,
            &*self.connector,
            &self.config.host.join_url(),
            timeout,
            self.config.readiness_retry(),
        )?;
        let peer = attempt.negotiator();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.attempts.write().insert(attempt.id(), shutdown_tx);

        let attempts = Arc::clone(&self.attempts);
        let callback_peer = Arc::clone(&peer);
        let span = tracing::info_span!("connect", attempt = attempt.id());
        tokio::spawn(
            async move {
                let (state, result) = attempt.run(shutdown_rx).await;
                attempts.write().remove(&id);
                debug!("attempt ended in {:?}", state);
                on_complete(result, callback_peer);
            }
            .instrument(span),
        );

        Ok(peer)
    }

    /// Stop the root registration and every in-flight attempt.
    ///
    /// Each stopped attempt reports [`BootstrapError::Closed`] through its
    /// callback. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(mut root) = self.root.lock().take() {
            root.close();
        }

        let attempts: Vec<_> = self.attempts.write().drain().collect();
        info!("bootstrap client closing, {} attempts in flight", attempts.len());
        for (id, shutdown) in attempts {
            if shutdown.send(()).is_err() {
                debug!("attempt {} already finished", id);
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of attempts still running
    pub fn in_flight(&self) -> usize {
        self.attempts.read().len()
    }

    /// Ids of attempts still running, ascending
    pub fn attempt_ids(&self) -> Vec<AttemptId> {
        let mut ids: Vec<_> = self.attempts.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_root_registered(&self) -> bool {
        self.root
            .lock()
            .as_ref()
            .map_or(false, RootRegistration::is_active)
    }
}

impl<F: NegotiatorFactory> Drop for BootstrapClient<F> {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================================================
// TESTS
// ============================================================================
