//! Persisted session traces under `.rlm/traces/<session_id>/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::context::ContextStats;
use crate::session::SessionOutcome;

/// Summary written next to the full trace for cheap listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMeta {
    pub session_id: String,
    pub question: String,
    pub status: String,
    pub turns: usize,
    pub sub_call_count: u32,
    pub context: ContextStats,
    pub root_model: String,
    pub sub_model: String,
    pub started_at: String,
    pub duration_ms: u64,
}

impl SessionMeta {
    pub fn from_outcome(outcome: &SessionOutcome) -> Self {
        Self {
            session_id: outcome.session_id.clone(),
            question: outcome.question.clone(),
            status: outcome.stop.label().to_string(),
            turns: outcome.turns.len(),
            sub_call_count: outcome.sub_call_count,
            context: outcome.context,
            root_model: outcome.root_model.clone(),
            sub_model: outcome.sub_model.clone(),
            started_at: outcome.started_at.clone(),
            duration_ms: outcome.duration_ms,
        }
    }
}

/// `.rlm/traces` under `root`.
pub fn traces_dir(root: &Path) -> PathBuf {
    root.join(".rlm").join("traces")
}

#[derive(Debug, Clone)]
pub struct TracePaths {
    pub dir: PathBuf,
    pub meta_path: PathBuf,
    pub trace_path: PathBuf,
    pub answer_path: PathBuf,
}

impl TracePaths {
    pub fn new(root: &Path, session_id: &str) -> Self {
        let dir = traces_dir(root).join(session_id);
        Self {
            dir: dir.clone(),
            meta_path: dir.join("meta.json"),
            trace_path: dir.join("trace.json"),
            answer_path: dir.join("answer.md"),
        }
    }
}

/// Write `trace.json`, `answer.md` and `meta.json` for a finished session.
///
/// `meta.json` goes last: a session directory counts as stored once it exists.
pub fn write_trace(root: &Path, outcome: &SessionOutcome) -> Result<TracePaths> {
    let paths = TracePaths::new(root, &outcome.session_id);
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create trace dir {}", paths.dir.display()))?;

    write_json(&paths.trace_path, outcome)?;
    let mut answer = outcome.answer_or_sentinel();
    answer.push('\n');
    write_text(&paths.answer_path, &answer)?;
    write_json(&paths.meta_path, &SessionMeta::from_outcome(outcome))?;

    Ok(paths)
}

pub fn load_trace(root: &Path, session_id: &str) -> Result<SessionOutcome> {
    let path = TracePaths::new(root, session_id).trace_path;
    let contents =
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

/// Metadata of every stored session, newest first.
///
/// Directories without a readable `meta.json` are skipped.
pub fn list_traces(root: &Path) -> Result<Vec<SessionMeta>> {
    let dir = traces_dir(root);
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut metas = Vec::new();
    for entry in fs::read_dir(&dir).with_context(|| format!("read {}", dir.display()))? {
        let entry = entry.with_context(|| format!("read entry in {}", dir.display()))?;
        let meta_path = entry.path().join("meta.json");
        if !meta_path.is_file() {
            continue;
        }
        let parsed = fs::read_to_string(&meta_path)
            .map_err(anyhow::Error::from)
            .and_then(|text| Ok(serde_json::from_str::<SessionMeta>(&text)?));
        match parsed {
            Ok(meta) => metas.push(meta),
            Err(err) => warn!(path = %meta_path.display(), err = %err, "skipping unreadable trace meta"),
        }
    }
    metas.sort_by(|a, b| {
        b.started_at
            .cmp(&a.started_at)
            .then_with(|| b.session_id.cmp(&a.session_id))
    });
    Ok(metas)
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    write_text(path, &buf)
}
