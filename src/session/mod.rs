//! Voice session management
//!
//! `VoiceSession` is the composition root. It owns:
//! - the transport, kept alive by a reconnect supervisor task
//! - the capture engine (microphone to transport)
//! - the playback scheduler (transport to speaker)
//! - the derived, observable `SessionState`

mod config;
mod session;
mod state;
mod stats;

pub use config::{SessionConfig, DEFAULT_ENDPOINT};
pub use session::VoiceSession;
pub use state::SessionState;
pub use stats::SessionStats;
