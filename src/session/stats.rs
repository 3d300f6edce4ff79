use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Externally observable connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the session lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub state: ConnectionState,

    /// Id of the current or most recent session attempt
    pub session_id: Option<Uuid>,

    /// User-visible message for the last acquisition or transport failure
    pub error: Option<String>,

    /// When the current state was entered
    pub since: DateTime<Utc>,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            session_id: None,
            error: None,
            since: Utc::now(),
        }
    }
}
