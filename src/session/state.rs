use serde::{Deserialize, Serialize};

use crate::transport::{ConnectionState, SupervisorState};

/// UI-facing session state
///
/// A projection of the transport, the reconnect supervisor, the capture
/// engine and the playback scheduler. Never stored as a source of truth;
/// recomputed whenever one of them changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Connecting or waiting out a backoff
    Connecting,
    /// Connected, not capturing, nothing playing
    Idle,
    /// Connected and capturing
    Listening,
    /// Inbound speech is playing
    Speaking,
    /// Not connected and not retrying (exhausted or disposed)
    Disconnected,
}

impl SessionState {
    pub fn derive(
        connection: ConnectionState,
        supervisor: SupervisorState,
        capturing: bool,
        playing: bool,
    ) -> Self {
        if matches!(
            supervisor,
            SupervisorState::Exhausted | SupervisorState::Stopped
        ) {
            return SessionState::Disconnected;
        }

        if connection != ConnectionState::Connected {
            return SessionState::Connecting;
        }

        if playing {
            SessionState::Speaking
        } else if capturing {
            SessionState::Listening
        } else {
            SessionState::Idle
        }
    }

    /// Whether the session has ended for good
    pub fn is_terminal(self) -> bool {
        self == SessionState::Disconnected
    }
}
