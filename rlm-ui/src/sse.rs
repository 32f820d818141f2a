//! Server-Sent Events streams and the trace directory watcher.

use std::collections::HashSet;
use std::convert::Infallible;
use std::path::Path;
use std::time::Duration;

use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use notify::{Event as NotifyEvent, EventKind, PollWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::state::{AppState, ChangeEvent};

#[derive(Serialize)]
struct SsePayload {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
}

impl From<&ChangeEvent> for SsePayload {
    fn from(event: &ChangeEvent) -> Self {
        match event {
            ChangeEvent::TraceAdded { session_id } => SsePayload {
                event_type: "trace_added".to_string(),
                session_id: Some(session_id.clone()),
            },
            ChangeEvent::ConfigChanged => SsePayload {
                event_type: "config_changed".to_string(),
                session_id: None,
            },
        }
    }
}

fn keep_alive() -> KeepAlive {
    KeepAlive::new()
        .interval(Duration::from_secs(15))
        .text("ping")
}

/// `GET /events`: trace directory changes.
pub async fn events_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.event_tx.subscribe();

    let stream = async_stream::stream! {
        yield Ok(Event::default().event("connected").data("{}"));

        loop {
            match rx.recv().await {
                Ok(change_event) => {
                    let payload = SsePayload::from(&change_event);
                    if let Ok(json) = serde_json::to_string(&payload) {
                        yield Ok(Event::default().event("change").data(json));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "SSE client lagged, some events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(keep_alive())
}

/// `GET /api/sessions/{id}/events`: past events, then live ones until `finished`.
pub async fn session_events_handler(
    State(state): State<AppState>,
    UrlPath(session_id): UrlPath<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    let live = state.session(&session_id).ok_or(StatusCode::NOT_FOUND)?;
    let (past, mut rx) = live.subscribe();

    let stream = async_stream::stream! {
        let mut done = false;
        for event in past {
            done = event.is_final();
            if let Ok(json) = serde_json::to_string(&event) {
                yield Ok(Event::default().event(event.name()).data(json));
            }
        }

        while !done {
            match rx.recv().await {
                Ok(event) => {
                    done = event.is_final();
                    if let Ok(json) = serde_json::to_string(&event) {
                        yield Ok(Event::default().event(event.name()).data(json));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, session_id = %session_id, "session SSE client lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    break;
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(keep_alive()))
}

/// Start the file watcher in a background task.
pub fn start_file_watcher(state: AppState) {
    tokio::spawn(async move {
        if let Err(e) = run_file_watcher(state).await {
            warn!(error = %e, "file watcher failed");
        }
    });
}

async fn run_file_watcher(state: AppState) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::channel::<NotifyEvent>(100);

    let tx_clone = tx.clone();
    let mut watcher = PollWatcher::new(
        move |res: Result<NotifyEvent, notify::Error>| {
            if let Ok(event) = res {
                let _ = tx_clone.try_send(event);
            }
        },
        notify::Config::default().with_poll_interval(Duration::from_millis(250)),
    )?;

    let traces_dir = state.traces_dir();
    std::fs::create_dir_all(&traces_dir)?;
    watcher.watch(&traces_dir, RecursiveMode::Recursive)?;
    info!(path = %traces_dir.display(), "watching traces directory");

    let config_path = state.config_path();
    if config_path.exists() {
        watcher.watch(&config_path, RecursiveMode::NonRecursive)?;
    }

    let mut known_sessions = collect_known_sessions(&traces_dir);

    // Batch at a fixed interval so a burst of writes for one session yields one event.
    let mut pending_events: Vec<NotifyEvent> = Vec::new();
    let mut flush_tick = tokio::time::interval(Duration::from_millis(250));
    flush_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            Some(event) = rx.recv() => {
                pending_events.push(event);
            }
            _ = flush_tick.tick() => {
                if pending_events.is_empty() {
                    continue;
                }
                process_events(&state, &pending_events, &mut known_sessions);
                pending_events.clear();
            }
        }
    }
}

fn process_events(state: &AppState, events: &[NotifyEvent], known_sessions: &mut HashSet<String>) {
    let mut config_changed = false;
    let mut added: Vec<String> = Vec::new();

    let config_path = state.config_path();
    let traces_dir = state.traces_dir();

    for event in events {
        if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
            continue;
        }

        for path in &event.paths {
            if path == &config_path {
                config_changed = true;
                continue;
            }
            // meta.json is written last, so trace.json is already in place.
            if path.file_name().and_then(|n| n.to_str()) != Some("meta.json") {
                continue;
            }
            let Some(session_id) = parse_session_path(&traces_dir, path) else {
                continue;
            };
            if known_sessions.insert(session_id.clone()) {
                added.push(session_id);
            }
        }
    }

    if config_changed {
        debug!("broadcasting config change");
        let _ = state.event_tx.send(ChangeEvent::ConfigChanged);
    }

    added.sort();
    for session_id in added {
        debug!(session_id = %session_id, "broadcasting new trace");
        let _ = state.event_tx.send(ChangeEvent::TraceAdded { session_id });
    }
}

fn collect_known_sessions(traces_dir: &Path) -> HashSet<String> {
    let mut known = HashSet::new();
    let Ok(entries) = std::fs::read_dir(traces_dir) else {
        return known;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.join("meta.json").is_file()
            && let Some(name) = path.file_name().and_then(|n| n.to_str())
        {
            known.insert(name.to_string());
        }
    }
    known
}

/// Session id of `<traces_dir>/<session_id>/meta.json`.
fn parse_session_path(traces_dir: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(traces_dir).ok()?;
    let mut components = rel.components();
    let session_id = components.next()?.as_os_str().to_str()?.to_string();
    let file = components.next()?;
    if components.next().is_some() || file.as_os_str() != "meta.json" {
        return None;
    }
    Some(session_id)
}
