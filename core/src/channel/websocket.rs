//! WebSocket transport channel over `tokio-tungstenite`
//!
//! Each channel is driven by one task that owns the socket. Frames sent
//! before the handshake finishes wait in the task's queue.

use super::{ChannelConnector, ChannelError, ChannelEvent, ChannelPair, TransportChannel};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn, Instrument};

/// Client end of a WebSocket channel
#[derive(Debug)]
pub struct WebSocketChannel {
    frames: Option<UnboundedSender<String>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TransportChannel for WebSocketChannel {
    fn send(&mut self, frame: String) -> Result<(), ChannelError> {
        let frames = self.frames.as_ref().ok_or(ChannelError::Closed)?;
        frames
            .send(frame)
            .map_err(|_| ChannelError::SendFailed("WebSocket task stopped".to_string()))
    }

    fn destroy(&mut self) {
        self.frames = None;
        if let Some(shutdown) = self.shutdown.take() {
            // Receiver is gone when the socket already ended on its own
            let _ = shutdown.send(());
        }
    }

    fn is_destroyed(&self) -> bool {
        self.shutdown.is_none()
    }
}

impl Drop for WebSocketChannel {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Opens WebSocket channels to the relay
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

impl ChannelConnector for WebSocketConnector {
    fn open(&self, url: &str) -> ChannelPair {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let span = tracing::debug_span!("websocket", relay = %relay_host(url));
        tokio::spawn(drive(url.to_string(), frame_rx, shutdown_rx, event_tx).instrument(span));

        let channel = WebSocketChannel {
            frames: Some(frame_tx),
            shutdown: Some(shutdown_tx),
        };
        (Box::new(channel), event_rx)
    }
}

/// Scheme and host of a relay URL; paths may carry a root secret
fn relay_host(url: &str) -> &str {
    let host_start = url.find("://").map_or(0, |i| i + 3);
    match url[host_start..].find('/') {
        Some(i) => &url[..host_start + i],
        None => url,
    }
}

async fn drive(
    url: String,
    mut frames: UnboundedReceiver<String>,
    mut shutdown: oneshot::Receiver<()>,
    events: UnboundedSender<ChannelEvent>,
) {
    let stream = tokio::select! {
        result = tokio_tungstenite::connect_async(url.as_str()) => match result {
            Ok((stream, _response)) => stream,
            Err(e) => {
                warn!("WebSocket connect to {} failed: {}", relay_host(&url), e);
                let _ = events.send(ChannelEvent::Error(e.to_string()));
                return;
            }
        },
        _ = &mut shutdown => {
            debug!("WebSocket released before connecting");
            return;
        }
    };

    info!("WebSocket connected to {}", relay_host(&url));
    if events.send(ChannelEvent::Open).is_err() {
        return;
    }

    let (mut sink, mut stream) = stream.split();
    let mut frames_open = true;
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                debug!("WebSocket released, closing");
                if let Err(e) = sink.send(Message::Close(None)).await {
                    debug!("WebSocket close frame failed: {}", e);
                }
                break;
            }
            frame = frames.recv(), if frames_open => match frame {
                Some(frame) => {
                    if let Err(e) = sink.send(Message::Text(frame)).await {
                        let _ = events.send(ChannelEvent::Error(e.to_string()));
                        break;
                    }
                }
                // Client end dropped; shutdown fires next
                None => frames_open = false,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(ChannelEvent::Message(text));
                }
                Some(Ok(Message::Binary(data))) => {
                    // Invalid UTF-8 is passed on lossily so decoding fails downstream
                    let text = match String::from_utf8(data) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("WebSocket received non-UTF-8 binary frame");
                            String::from_utf8_lossy(e.as_bytes()).into_owned()
                        }
                    };
                    let _ = events.send(ChannelEvent::Message(text));
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!("WebSocket closed by relay");
                    let _ = events.send(ChannelEvent::Close);
                    break;
                }
                // Ping/pong handled by tungstenite
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("WebSocket read error: {}", e);
                    let _ = events.send(ChannelEvent::Error(e.to_string()));
                    break;
                }
            },
        }
    }
}
