use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tracing::info;

/// Who produced a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
    System,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Role::User => "user",
            Role::Model => "model",
            Role::System => "system",
        })
    }
}

/// A single conversation log line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub role: Role,

    pub text: String,

    /// When the entry was created
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }
}

/// Append-only conversation log shared by the session components
///
/// Cloning yields another handle to the same log.
#[derive(Debug, Clone)]
pub struct ConversationLog {
    entries: Arc<Mutex<Vec<LogEntry>>>,
    feed: broadcast::Sender<LogEntry>,
}

impl ConversationLog {
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(256);
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            feed,
        }
    }

    pub fn push(&self, entry: LogEntry) {
        info!(role = ?entry.role, "{}", entry.text);

        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.clone());

        // Nobody listening is fine
        let _ = self.feed.send(entry);
    }

    pub fn system(&self, text: impl Into<String>) {
        self.push(LogEntry::system(text));
    }

    /// Copy of every entry so far, in append order
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live feed of entries appended after this call
    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.feed.subscribe()
    }
}

impl Default for ConversationLog {
    fn default() -> Self {
        Self::new()
    }
}
