pub mod audio;
pub mod capture;
pub mod config;
pub mod error;
pub mod playback;
pub mod session;
pub mod transport;

pub use audio::{
    AudioFile, CaptureDevice, CaptureSource, DeviceFactory, PcmFrame, PlaybackDevice,
    PlaybackSink, WavCaptureDevice, WavPlaybackDevice,
};
pub use capture::{CaptureEngine, CaptureSettings, CaptureStats, FrameSink};
pub use config::Config;
pub use error::{CaptureError, PlaybackError, SessionError, TransportError};
pub use playback::{PlaybackScheduler, PlaybackStats, ScheduledFrame};
pub use session::{SessionConfig, SessionState, SessionStats, VoiceSession};
pub use transport::{
    ConnectionState, Connector, ControlMessage, ReconnectPolicy, ReconnectSupervisor, Transport,
    WebSocketConnector,
};
