use super::log::{LogEntry, Role};

/// Collects streamed transcription fragments into per-turn log entries
///
/// The user and model buffers are independent; ordering is only kept within
/// each buffer.
#[derive(Debug, Default)]
pub struct TranscriptAssembler {
    user: String,
    model: String,
}

impl TranscriptAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an input (user speech) transcription fragment
    pub fn push_input(&mut self, fragment: &str) {
        self.user.push_str(fragment);
    }

    /// Append an output (model speech) transcription fragment
    pub fn push_output(&mut self, fragment: &str) {
        self.model.push_str(fragment);
    }

    /// Flush both buffers at turn end, user first
    ///
    /// Empty buffers produce no entry.
    pub fn complete_turn(&mut self) -> Vec<LogEntry> {
        let mut entries = Vec::with_capacity(2);

        if !self.user.is_empty() {
            entries.push(LogEntry::new(Role::User, std::mem::take(&mut self.user)));
        }
        if !self.model.is_empty() {
            entries.push(LogEntry::new(Role::Model, std::mem::take(&mut self.model)));
        }

        entries
    }

    pub fn pending_input(&self) -> &str {
        &self.user
    }

    pub fn pending_output(&self) -> &str {
        &self.model
    }
}
