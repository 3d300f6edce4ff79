use super::state::AppState;
use crate::device::DeviceState;
use crate::session::{ConnectionState, LiveSession, LogEntry};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Serialize;
use tracing::{error, info};
use uuid::Uuid;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub state: ConnectionState,
    pub session_id: Option<Uuid>,
    /// Microphone level in [0, 1]
    pub volume: f32,
    pub error: Option<String>,
}

impl StatusResponse {
    fn from_session(session: &LiveSession) -> Self {
        let status = session.status();
        Self {
            state: status.state,
            session_id: status.session_id,
            volume: session.volume(),
            error: status.error,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /session/connect
/// Open a live session
pub async fn connect(State(state): State<AppState>) -> impl IntoResponse {
    info!("Connect requested over HTTP");

    match state.session.connect().await {
        Ok(()) => (StatusCode::OK, Json(StatusResponse::from_session(&state.session))).into_response(),
        Err(e) => {
            error!("Failed to connect: {}", e);
            let code = if e.is_acquisition() {
                StatusCode::SERVICE_UNAVAILABLE
            } else {
                StatusCode::BAD_GATEWAY
            };
            (code, Json(ErrorResponse { error: e.to_string() })).into_response()
        }
    }
}

/// POST /session/disconnect
/// End the live session (idempotent)
pub async fn disconnect(State(state): State<AppState>) -> impl IntoResponse {
    info!("Disconnect requested over HTTP");
    state.session.disconnect().await;
    (StatusCode::OK, Json(StatusResponse::from_session(&state.session)))
}

/// GET /session/status
pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(StatusResponse::from_session(&state.session)))
}

/// GET /session/log
/// Conversation log in append order
pub async fn get_log(State(state): State<AppState>) -> impl IntoResponse {
    let entries: Vec<LogEntry> = state.session.log().entries();
    (StatusCode::OK, Json(entries))
}

/// GET /device
pub async fn get_device_state(State(state): State<AppState>) -> impl IntoResponse {
    let device: DeviceState = state.session.device_state().snapshot();
    (StatusCode::OK, Json(device))
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
