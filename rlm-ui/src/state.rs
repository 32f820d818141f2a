//! Shared application state for the UI server.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use rlm::io::config::config_path;
use rlm::io::trace_log::traces_dir;
use tokio::sync::broadcast;

use crate::sessions::LiveSession;

/// Events broadcast to `/events` clients when the trace directory changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// A session directory got its `meta.json`.
    TraceAdded { session_id: String },
    ConfigChanged,
}

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Root directory of the project (contains .rlm/).
    pub project_dir: PathBuf,
    /// Broadcast sender for file change events.
    pub event_tx: Arc<broadcast::Sender<ChangeEvent>>,
    /// Sessions started through the API, by session id.
    pub sessions: Arc<Mutex<HashMap<String, Arc<LiveSession>>>>,
}

impl AppState {
    pub fn new(project_dir: PathBuf) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            project_dir,
            event_tx: Arc::new(event_tx),
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Path to .rlm/traces/ directory.
    pub fn traces_dir(&self) -> PathBuf {
        traces_dir(&self.project_dir)
    }

    /// Path to .rlm/config.toml.
    pub fn config_path(&self) -> PathBuf {
        config_path(&self.project_dir)
    }

    pub fn session(&self, session_id: &str) -> Option<Arc<LiveSession>> {
        self.sessions
            .lock()
            .ok()
            .and_then(|sessions| sessions.get(session_id).cloned())
    }

    pub fn insert_session(&self, session_id: String, session: Arc<LiveSession>) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.insert(session_id, session);
        }
    }
}
