//! Live session management
//!
//! This module provides the `LiveSession` abstraction that manages:
//! - Device acquisition (microphone and speaker)
//! - The connect/disconnect state machine
//! - Transcript assembly into the conversation log
//! - Wiring between capture, transport, routing and playback tasks

mod config;
mod log;
mod session;
mod stats;
mod transcript;

pub use config::{SessionConfig, DEFAULT_MODEL, DEFAULT_SYSTEM_INSTRUCTION};
pub use log::{ConversationLog, LogEntry, Role};
pub use session::LiveSession;
pub use stats::{ConnectionState, SessionStatus};
pub use transcript::TranscriptAssembler;
