use thiserror::Error;

/// Errors raised by the transport and its reconnect supervisor
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("failed to connect to {endpoint}: {reason}")]
    ConnectFailure { endpoint: String, reason: String },

    #[error("connection closed unexpectedly (code={code:?}): {reason}")]
    UnexpectedClosure { code: Option<u16>, reason: String },

    #[error("transport is not connected")]
    NotConnected,

    #[error("outbound queue full, frame {sequence} dropped")]
    QueueFull { sequence: u64 },
}

/// Errors raised by capture devices and the capture engine
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// Permission denied, no device, or unreadable source
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("capture stream failed: {0}")]
    StreamFailed(String),
}

/// Errors raised by playback devices
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("playback device failure: {0}")]
    DeviceFailure(String),
}

/// Errors surfaced at the session boundary
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Playback(#[from] PlaybackError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },
}
