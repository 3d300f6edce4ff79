//! Session-level error taxonomy.
//!
//! Only acquisition and transport failures reach the connection state; decode
//! and tool failures are absorbed where they happen.

use thiserror::Error;

/// Errors surfaced to the user through the session status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Microphone could not be opened or started.
    #[error("Could not access microphone: {0}")]
    Microphone(String),

    /// Output device could not be opened.
    #[error("Could not open audio output: {0}")]
    Output(String),

    /// The live link failed to open or broke mid-session.
    #[error("Connection error: {0}")]
    Transport(String),

    /// The capture device stopped delivering audio mid-session.
    #[error("Microphone stopped: {0}")]
    CaptureLost(String),
}

impl SessionError {
    /// Whether this error happened while acquiring devices at connect time.
    pub fn is_acquisition(&self) -> bool {
        matches!(self, Self::Microphone(_) | Self::Output(_))
    }
}
