use chrono::{DateTime, Utc};
use serde::Serialize;

use super::state::SessionState;

/// Statistics about a voice session
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub session_id: String,

    /// When the session started
    pub started_at: DateTime<Utc>,

    /// Total duration in seconds
    pub duration_secs: f64,

    pub state: SessionState,

    /// Capture frames accepted by the transport
    pub frames_sent: u64,

    /// Capture frames dropped while disconnected or backed up
    pub frames_dropped: u64,

    /// Inbound audio frames received
    pub frames_received: u64,

    /// Inbound frames handed to the playback device
    pub frames_scheduled: u64,

    /// Frames the playback device failed to accept
    pub playback_failures: u64,

    /// Times playback restarted at "now" after running dry
    pub gap_resets: u64,

    /// Barge-in interrupts from the remote side
    pub interrupts: u64,

    /// Successful connections, including reconnects
    pub connections_opened: u64,

    /// Current consecutive reconnect attempt
    pub reconnect_attempts: u32,
}
