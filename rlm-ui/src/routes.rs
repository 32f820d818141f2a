//! HTTP route handlers for the UI API.

use std::fs;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use rlm::io::trace_log::{SessionMeta, TracePaths, list_traces};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::sessions::{self, SessionEvent, StartSession};
use crate::sse::session_events_handler;
use crate::state::AppState;

/// Build the API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/traces", get(get_traces))
        .route("/traces/{session_id}", get(get_trace))
        .route("/sessions", post(start_session))
        .route("/sessions/{session_id}", get(get_session))
        .route("/sessions/{session_id}/events", get(session_events_handler))
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Serialize)]
struct TracesResponse {
    traces: Vec<SessionMeta>,
}

/// GET /api/traces - stored sessions, newest first.
async fn get_traces(State(state): State<AppState>) -> Result<Json<TracesResponse>, StatusCode> {
    let traces = list_traces(&state.project_dir).map_err(|err| {
        warn!(error = %format!("{err:#}"), "list traces failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(Json(TracesResponse { traces }))
}

/// GET /api/traces/:id - the stored trace.json.
async fn get_trace(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    if !is_safe_id(&session_id) {
        return Err(StatusCode::BAD_REQUEST);
    }
    let path = TracePaths::new(&state.project_dir, &session_id).trace_path;
    read_json_value(&path).map(Json)
}

#[derive(Debug, Serialize)]
struct StartedResponse {
    session_id: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// POST /api/sessions - start a session on a blocking task.
async fn start_session(
    State(state): State<AppState>,
    Json(request): Json<StartSession>,
) -> Result<Json<StartedResponse>, (StatusCode, Json<ErrorResponse>)> {
    let project_dir = state.project_dir.clone();
    let prepared =
        tokio::task::spawn_blocking(move || sessions::prepare(&project_dir, &request))
            .await
            .map_err(|err| error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?
            .map_err(|err| error_response(StatusCode::BAD_REQUEST, format!("{err:#}")))?;
    let session_id = sessions::spawn(&state, prepared);
    Ok(Json(StartedResponse { session_id }))
}

#[derive(Debug, Serialize)]
struct SessionSnapshot {
    session_id: String,
    finished: bool,
    events: Vec<SessionEvent>,
}

/// GET /api/sessions/:id - events of a session started by this server.
async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionSnapshot>, StatusCode> {
    let live = state.session(&session_id).ok_or(StatusCode::NOT_FOUND)?;
    let events = live.snapshot();
    Ok(Json(SessionSnapshot {
        session_id,
        finished: events.last().is_some_and(SessionEvent::is_final),
        events,
    }))
}

fn error_response(status: StatusCode, error: String) -> (StatusCode, Json<ErrorResponse>) {
    (status, Json(ErrorResponse { error }))
}

fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
}

fn read_json_value(path: &std::path::Path) -> Result<Value, StatusCode> {
    if !path.exists() {
        return Err(StatusCode::NOT_FOUND);
    }
    let contents = fs::read_to_string(path).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let value: Value =
        serde_json::from_str(&contents).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;

    use rlm::core::context::Context;
    use rlm::io::config::RlmConfig;
    use rlm::io::trace_log::write_trace;
    use rlm::session::{SessionRequest, run_session};
    use rlm::test_support::{ScriptedBackend, ScriptedSandbox};

    use crate::sessions::LiveSession;

    fn state_with_trace() -> (tempfile::TempDir, AppState, String) {
        let temp = tempfile::tempdir().expect("tempdir");
        let context = Context::new("alpha\nbeta");
        let cfg = RlmConfig::default();
        let outcome = run_session(
            &SessionRequest::new("Which line has beta?", &context, &cfg),
            &ScriptedBackend::new(["FINAL_ANSWER: line 1"]),
            &ScriptedSandbox::default(),
            |_| {},
        )
        .expect("session");
        write_trace(temp.path(), &outcome).expect("write trace");
        let state = AppState::new(temp.path().to_path_buf());
        (temp, state, outcome.session_id)
    }

    #[tokio::test]
    async fn lists_and_serves_stored_traces() {
        let (_temp, state, session_id) = state_with_trace();

        let Json(listing) = get_traces(State(state.clone())).await.expect("list");
        assert_eq!(listing.traces.len(), 1);
        assert_eq!(listing.traces[0].session_id, session_id);
        assert_eq!(listing.traces[0].status, "answered");

        let Json(trace) = get_trace(State(state), Path(session_id.clone()))
            .await
            .expect("trace");
        assert_eq!(trace["session_id"], session_id.as_str());
        assert_eq!(trace["stop"]["answer"], "line 1");
    }

    #[tokio::test]
    async fn unknown_or_unsafe_trace_ids_are_rejected() {
        let (_temp, state, _) = state_with_trace();
        let missing = get_trace(State(state.clone()), Path("rlm-missing".to_string())).await;
        assert_eq!(missing.err(), Some(StatusCode::NOT_FOUND));
        let unsafe_id = get_trace(State(state), Path("..".to_string())).await;
        assert_eq!(unsafe_id.err(), Some(StatusCode::BAD_REQUEST));
    }

    #[tokio::test]
    async fn session_snapshot_reports_events() {
        let temp = tempfile::tempdir().expect("tempdir");
        let state = AppState::new(temp.path().to_path_buf());
        let live = Arc::new(LiveSession::new());
        live.publish(SessionEvent::Finished {
            status: "exhausted".to_string(),
            answer: None,
            error: None,
        });
        state.insert_session("rlm-x".to_string(), live);

        let Json(snapshot) = get_session(State(state.clone()), Path("rlm-x".to_string()))
            .await
            .expect("snapshot");
        assert!(snapshot.finished);
        assert_eq!(snapshot.events.len(), 1);

        let missing = get_session(State(state), Path("rlm-y".to_string())).await;
        assert_eq!(missing.err(), Some(StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn invalid_session_requests_are_bad_requests() {
        let temp = tempfile::tempdir().expect("tempdir");
        let state = AppState::new(temp.path().to_path_buf());
        let request = StartSession {
            question: "Anything?".to_string(),
            context_path: Some(PathBuf::from("missing.txt")),
            context_text: None,
            max_iterations: None,
        };

        let err = start_session(State(state), Json(request))
            .await
            .expect_err("missing context");
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
        assert!(err.1.error.contains("missing.txt"));
    }
}
