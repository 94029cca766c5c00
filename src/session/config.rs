use std::time::Duration;

use crate::capture::CaptureSettings;
use crate::transport::ReconnectPolicy;

/// Default remote endpoint
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8000/ws/audio";

/// Configuration for a voice session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Unique session identifier (e.g., "voice-6f1c...")
    pub session_id: String,

    /// Remote endpoint carrying both audio directions
    pub endpoint: String,

    /// Outbound capture format
    pub capture: CaptureSettings,

    /// Backoff for unexpected closures
    pub reconnect: ReconnectPolicy,

    /// How often the derived state is re-evaluated while audio plays
    pub state_poll_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: format!("voice-{}", uuid::Uuid::new_v4()),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            capture: CaptureSettings::default(),
            reconnect: ReconnectPolicy::default(),
            state_poll_interval: Duration::from_millis(50),
        }
    }
}
