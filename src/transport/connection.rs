use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use super::link::{CloseInfo, Connector, ControlMessage, Inbound};
use crate::audio::{PcmFrame, PLAYBACK_SAMPLE_RATE};
use crate::capture::FrameSink;
use crate::error::TransportError;

/// Close code reported when the client ends the connection itself
pub const NORMAL_CLOSURE: u16 = 1000;

/// Lifecycle of the single transport connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

/// Lifecycle notifications (open / close / error)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    Closed(CloseInfo),
    Error(String),
}

/// Item yielded by a `FrameStream`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    Audio(PcmFrame),
    Control(ControlMessage),
}

/// Inbound side of one connection
///
/// Yields frames in arrival order until the connection closes, then `None`
/// forever. A terminated stream is a closure event; `close_info` says why.
pub struct FrameStream {
    inbound: mpsc::Receiver<Inbound>,
    sequence: Arc<AtomicU64>,
    sample_rate: u32,
    close: Option<CloseInfo>,
}

impl FrameStream {
    pub async fn next(&mut self) -> Option<Received> {
        if self.close.is_some() {
            return None;
        }

        match self.inbound.recv().await {
            Some(Inbound::Audio(bytes)) => {
                let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
                let frame = PcmFrame::from_le_bytes(&bytes, self.sample_rate, sequence);
                Some(Received::Audio(frame))
            }
            Some(Inbound::Control(message)) => Some(Received::Control(message)),
            Some(Inbound::Closed(info)) => {
                self.inbound.close();
                self.close = Some(info);
                None
            }
            None => {
                self.close = Some(CloseInfo::default());
                None
            }
        }
    }

    /// Why the stream terminated, once it has
    pub fn close_info(&self) -> Option<&CloseInfo> {
        self.close.as_ref()
    }
}

/// Single bidirectional binary-frame connection to a fixed endpoint
///
/// At most one link is live at a time; connecting again tears down the old
/// one first. Sending never blocks: frames go into a bounded queue drained by
/// the socket owner, and a full queue rejects the frame.
pub struct Transport {
    endpoint: String,
    connector: Arc<dyn Connector>,
    state: watch::Sender<ConnectionState>,
    outbound: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    events: broadcast::Sender<TransportEvent>,
    inbound_sequence: Arc<AtomicU64>,
    closed_deliberately: AtomicBool,
}

impl Transport {
    pub fn new(endpoint: impl Into<String>, connector: Arc<dyn Connector>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(32);

        Self {
            endpoint: endpoint.into(),
            connector,
            state,
            outbound: Mutex::new(None),
            events,
            inbound_sequence: Arc::new(AtomicU64::new(0)),
            closed_deliberately: AtomicBool::new(false),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Subscribe to open / close / error events
    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    /// Whether the last closure came from `close()`
    pub fn closed_deliberately(&self) -> bool {
        self.closed_deliberately.load(Ordering::SeqCst)
    }

    fn emit(&self, event: TransportEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Open a connection and return its inbound frame stream
    pub async fn connect(&self) -> Result<FrameStream, TransportError> {
        if self.outbound.lock().take().is_some() {
            debug!("Replacing existing connection to {}", self.endpoint);
        }

        self.closed_deliberately.store(false, Ordering::SeqCst);
        self.state.send_replace(ConnectionState::Connecting);
        info!("Connecting to {}", self.endpoint);

        match self.connector.connect(&self.endpoint).await {
            Ok(link) => {
                *self.outbound.lock() = Some(link.outbound);
                self.state.send_replace(ConnectionState::Connected);
                info!("Connected to {}", self.endpoint);
                self.emit(TransportEvent::Open);

                Ok(FrameStream {
                    inbound: link.inbound,
                    sequence: Arc::clone(&self.inbound_sequence),
                    sample_rate: PLAYBACK_SAMPLE_RATE,
                    close: None,
                })
            }
            Err(e) => {
                self.state.send_replace(ConnectionState::Disconnected);
                warn!("Connection to {} failed: {}", self.endpoint, e);
                self.emit(TransportEvent::Error(e.to_string()));
                Err(e)
            }
        }
    }

    /// Transmit one frame as a single binary message
    pub fn send(&self, frame: PcmFrame) -> Result<(), TransportError> {
        if self.state() != ConnectionState::Connected {
            return Err(TransportError::NotConnected);
        }

        let sequence = frame.sequence();
        let payload = frame.to_le_bytes();

        let outbound = self.outbound.lock();
        let Some(sender) = outbound.as_ref() else {
            return Err(TransportError::NotConnected);
        };

        match sender.try_send(payload) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(TransportError::QueueFull { sequence }),
            Err(TrySendError::Closed(_)) => Err(TransportError::NotConnected),
        }
    }

    /// Record that the remote side ended the connection
    pub fn mark_closed(&self, info: CloseInfo) -> TransportError {
        self.outbound.lock().take();
        self.state.send_replace(ConnectionState::Disconnected);

        let error = TransportError::UnexpectedClosure {
            code: info.code,
            reason: info.reason.clone(),
        };
        warn!("Connection to {} lost: {}", self.endpoint, error);
        self.emit(TransportEvent::Closed(info));
        error
    }

    /// Deliberately close the connection
    ///
    /// Dropping the outbound queue makes the socket owner send a close frame
    /// and release the socket. Safe to call in any state.
    pub fn close(&self) {
        self.closed_deliberately.store(true, Ordering::SeqCst);

        let Some(sender) = self.outbound.lock().take() else {
            self.state.send_replace(ConnectionState::Disconnected);
            return;
        };

        self.state.send_replace(ConnectionState::Closing);
        info!("Closing connection to {}", self.endpoint);
        drop(sender);

        self.state.send_replace(ConnectionState::Disconnected);
        self.emit(TransportEvent::Closed(CloseInfo {
            code: Some(NORMAL_CLOSURE),
            reason: "closed by client".to_string(),
        }));
    }
}

impl FrameSink for Transport {
    fn send_frame(&self, frame: PcmFrame) -> Result<(), TransportError> {
        self.send(frame)
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}
