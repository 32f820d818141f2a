//! Sessions started from the UI.
//!
//! Each session runs on a blocking task. Its events are kept in order so a
//! client that connects late can replay them before following new ones.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context as _, Result, bail};
use rlm::core::context::{Context, ContextStats};
use rlm::core::types::Turn;
use rlm::io::backend::{Backend, HttpBackend};
use rlm::io::config::{RlmConfig, load_config};
use rlm::io::corpus::{CorpusOptions, load_context};
use rlm::io::sandbox::{PythonSandbox, Sandbox};
use rlm::io::trace_log::write_trace;
use rlm::session::{SessionRequest, new_session_id, run_session};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::state::AppState;

/// Body of `POST /api/sessions`.
#[derive(Debug, Clone, Deserialize)]
pub struct StartSession {
    pub question: String,
    /// File or directory, relative to the project directory.
    #[serde(default)]
    pub context_path: Option<PathBuf>,
    /// Inline context, used instead of `context_path`.
    #[serde(default)]
    pub context_text: Option<String>,
    #[serde(default)]
    pub max_iterations: Option<u32>,
}

/// One entry of a session's event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Started {
        session_id: String,
        question: String,
        context: ContextStats,
        max_iterations: u32,
    },
    Turn {
        turn: Turn,
    },
    Finished {
        /// `answered`, `exhausted`, `fatal`, or `error` when the session could not run.
        status: String,
        answer: Option<String>,
        error: Option<String>,
    },
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Started { .. } => "started",
            SessionEvent::Turn { .. } => "turn",
            SessionEvent::Finished { .. } => "finished",
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, SessionEvent::Finished { .. })
    }
}

/// Event log of one session plus a channel for followers.
pub struct LiveSession {
    events: Mutex<Vec<SessionEvent>>,
    tx: broadcast::Sender<SessionEvent>,
}

impl LiveSession {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            events: Mutex::new(Vec::new()),
            tx,
        }
    }

    pub fn publish(&self, event: SessionEvent) {
        let Ok(mut events) = self.events.lock() else {
            return;
        };
        events.push(event.clone());
        // No receivers is fine: late subscribers replay from `events`.
        let _ = self.tx.send(event);
    }

    /// Events so far plus a receiver for everything published after them.
    pub fn subscribe(&self) -> (Vec<SessionEvent>, broadcast::Receiver<SessionEvent>) {
        match self.events.lock() {
            Ok(events) => (events.clone(), self.tx.subscribe()),
            Err(_) => (Vec::new(), self.tx.subscribe()),
        }
    }

    pub fn snapshot(&self) -> Vec<SessionEvent> {
        self.subscribe().0
    }

    pub fn is_finished(&self) -> bool {
        self.snapshot().last().is_some_and(SessionEvent::is_final)
    }
}

impl Default for LiveSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a session needs, resolved before it is spawned.
pub struct PreparedSession {
    pub session_id: String,
    pub question: String,
    pub context: Context,
    pub config: RlmConfig,
    pub max_iterations: u32,
}

/// Validate the request and load config and context.
pub fn prepare(project_dir: &Path, request: &StartSession) -> Result<PreparedSession> {
    if request.question.trim().is_empty() {
        bail!("question must be non-empty");
    }
    if request.max_iterations == Some(0) {
        bail!("max_iterations must be > 0");
    }
    let config = load_config(&rlm::io::config::config_path(project_dir))?;
    let context = match (&request.context_path, &request.context_text) {
        (Some(_), Some(_)) => bail!("give either context_path or context_text, not both"),
        (None, None) => bail!("context_path or context_text is required"),
        (None, Some(text)) => Context::new(text.clone()),
        (Some(path), None) => {
            let path = resolve_in_project(project_dir, path)?;
            load_context(&path, &CorpusOptions::default())
                .with_context(|| format!("load context {}", path.display()))?
        }
    };
    let max_iterations = request.max_iterations.unwrap_or(config.max_iterations);
    Ok(PreparedSession {
        session_id: new_session_id(),
        question: request.question.trim().to_string(),
        context,
        config,
        max_iterations,
    })
}

/// Resolve `path` against the project directory, refusing anything that lands outside it.
fn resolve_in_project(project_dir: &Path, path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        bail!("context_path must be relative to the project directory");
    }
    let root = project_dir
        .canonicalize()
        .with_context(|| format!("resolve {}", project_dir.display()))?;
    let joined = root.join(path);
    let resolved = joined
        .canonicalize()
        .with_context(|| format!("resolve context {}", joined.display()))?;
    if !resolved.starts_with(&root) {
        bail!(
            "context_path {} is outside the project directory",
            path.display()
        );
    }
    Ok(resolved)
}

/// Register the session and run it with the configured backend on a blocking task.
pub fn spawn(state: &AppState, prepared: PreparedSession) -> String {
    let session_id = prepared.session_id.clone();
    let live = Arc::new(LiveSession::new());
    state.insert_session(session_id.clone(), live.clone());
    let project_dir = state.project_dir.clone();

    tokio::task::spawn_blocking(move || {
        let sandbox = PythonSandbox::new(prepared.config.sandbox.clone());
        match HttpBackend::from_config(&prepared.config.backend) {
            Ok(backend) => drive(&live, &project_dir, &prepared, &backend, &sandbox),
            Err(err) => {
                warn!(session_id = %prepared.session_id, error = %format!("{err:#}"), "backend setup failed");
                live.publish(SessionEvent::Finished {
                    status: "error".to_string(),
                    answer: None,
                    error: Some(format!("{err:#}")),
                });
            }
        }
    });
    session_id
}

/// Run a prepared session to completion, publishing its events and saving the trace.
pub fn drive<B: Backend, S: Sandbox>(
    live: &LiveSession,
    project_dir: &Path,
    prepared: &PreparedSession,
    backend: &B,
    sandbox: &S,
) {
    live.publish(SessionEvent::Started {
        session_id: prepared.session_id.clone(),
        question: prepared.question.clone(),
        context: prepared.context.stats(),
        max_iterations: prepared.max_iterations,
    });

    let mut request = SessionRequest::new(&prepared.question, &prepared.context, &prepared.config);
    request.session_id = prepared.session_id.clone();
    request.max_iterations = prepared.max_iterations;

    let finished = match run_session(&request, backend, sandbox, |turn| {
        live.publish(SessionEvent::Turn { turn: turn.clone() });
    }) {
        Ok(outcome) => {
            let error = write_trace(project_dir, &outcome)
                .err()
                .map(|err| format!("save trace: {err:#}"));
            info!(
                session_id = %outcome.session_id,
                status = outcome.stop.label(),
                turns = outcome.turns.len(),
                "ui session finished"
            );
            SessionEvent::Finished {
                status: outcome.stop.label().to_string(),
                answer: Some(outcome.answer_or_sentinel()),
                error,
            }
        }
        Err(err) => SessionEvent::Finished {
            status: "error".to_string(),
            answer: None,
            error: Some(format!("{err:#}")),
        },
    };
    live.publish(finished);
}
