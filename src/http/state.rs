use crate::session::LiveSession;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub session: LiveSession,
}

impl AppState {
    pub fn new(session: LiveSession) -> Self {
        Self { session }
    }
}
