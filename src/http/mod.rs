//! HTTP API for presentation clients
//!
//! This module exposes the session's presentation boundary over REST:
//! - POST /session/connect - Open a live session
//! - POST /session/disconnect - End the live session
//! - GET /session/status - Connection state, volume and error message
//! - GET /session/log - Conversation log so far
//! - GET /device - Device state snapshot
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
