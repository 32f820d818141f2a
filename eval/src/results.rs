//! Result capture and persistence.
//!
//! Copies the session trace written by `rlm ask` out of the run workspace and
//! records run metadata in the results directory for later analysis.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use rlm::io::trace_log::{TracePaths, list_traces, load_trace};
use rlm::session::SessionOutcome;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};

use crate::harness::AskStatus;
use crate::outcome::Outcome;

/// Input for capturing results from a completed run.
#[derive(Debug)]
pub struct CaptureInput<'a> {
    pub case_id: &'a str,
    pub case_path: &'a Path,
    pub eval_run_id: &'a str,
    pub rlm_binary: &'a Path,
    pub ask: AskStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub workspace_root: &'a Path,
    pub repo_root: &'a Path,
}

/// Metadata for an eval run, persisted to `meta.json`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EvalMeta {
    pub case_id: String,
    pub eval_run_id: String,
    /// SHA-256 hash of the case file for reproducibility tracking.
    pub case_hash: String,
    /// Git SHA of the repo at time of run.
    pub rlm_git_sha: Option<String>,
    pub rlm_binary: String,
    /// Session id from the captured trace.
    pub session_id: Option<String>,
    /// How the session stopped (`answered`, `exhausted`, `fatal`).
    pub stop_status: Option<String>,
    pub turns: Option<usize>,
    pub sub_call_count: Option<u32>,
    pub outcome: Option<Outcome>,
    pub start_time: String,
    pub end_time: String,
    pub duration_secs: f64,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub workspace: String,
    /// Non-fatal errors encountered during capture.
    pub errors: Vec<String>,
}

/// Artifacts captured from one run.
#[derive(Debug)]
pub struct CapturedRun {
    pub results_dir: PathBuf,
    /// The session trace, when `rlm ask` got far enough to write one.
    pub session: Option<SessionOutcome>,
}

/// Capture results from a completed run to the results directory.
///
/// Copies the session's `trace.json` and `answer.md`. Writes metadata.
#[instrument(skip_all, fields(case_id = %input.case_id, eval_run_id = %input.eval_run_id))]
pub fn capture_results(base_dir: &Path, input: &CaptureInput<'_>) -> Result<CapturedRun> {
    let results_dir = results_dir(base_dir, input.case_id, input.eval_run_id);
    fs::create_dir_all(&results_dir)
        .with_context(|| format!("create results dir {}", results_dir.display()))?;

    let mut errors = Vec::new();

    let case_hash = match file_sha256(input.case_path) {
        Ok(hash) => hash,
        Err(err) => {
            errors.push(format!("case hash: {err}"));
            String::new()
        }
    };

    let rlm_git_sha = match git_rev_parse(input.repo_root) {
        Ok(sha) => Some(sha),
        Err(err) => {
            errors.push(format!("rlm git sha: {err}"));
            None
        }
    };

    let session = match find_session(input.workspace_root) {
        Ok(session) => {
            let paths = TracePaths::new(input.workspace_root, &session.session_id);
            copy_if_exists(
                &paths.trace_path,
                &results_dir.join("trace.json"),
                "trace.json",
                &mut errors,
            );
            copy_if_exists(
                &paths.answer_path,
                &results_dir.join("answer.md"),
                "answer.md",
                &mut errors,
            );
            Some(session)
        }
        Err(err) => {
            errors.push(format!("session trace: {err:#}"));
            None
        }
    };

    if !errors.is_empty() {
        warn!(errors = ?errors, "artifact capture had errors");
    }

    let duration = input.finished_at - input.started_at;
    let meta = EvalMeta {
        case_id: input.case_id.to_string(),
        eval_run_id: input.eval_run_id.to_string(),
        case_hash,
        rlm_git_sha,
        rlm_binary: input.rlm_binary.display().to_string(),
        session_id: session.as_ref().map(|s| s.session_id.clone()),
        stop_status: session.as_ref().map(|s| s.stop.label().to_string()),
        turns: session.as_ref().map(|s| s.turns.len()),
        sub_call_count: session.as_ref().map(|s| s.sub_call_count),
        outcome: None,
        start_time: input.started_at.to_rfc3339(),
        end_time: input.finished_at.to_rfc3339(),
        duration_secs: duration.num_milliseconds() as f64 / 1000.0,
        exit_code: input.ask.exit_code,
        timed_out: input.ask.timed_out,
        workspace: input.workspace_root.display().to_string(),
        errors,
    };

    write_meta(&results_dir.join("meta.json"), &meta)?;
    debug!(results_dir = %results_dir.display(), "results captured");
    Ok(CapturedRun {
        results_dir,
        session,
    })
}

pub fn update_outcome(results_dir: &Path, outcome: Outcome) -> Result<()> {
    let meta_path = results_dir.join("meta.json");
    let mut meta: EvalMeta = serde_json::from_str(
        &fs::read_to_string(&meta_path).with_context(|| format!("read {}", meta_path.display()))?,
    )
    .context("parse meta")?;
    meta.outcome = Some(outcome);
    write_meta(&meta_path, &meta)?;
    Ok(())
}

pub fn results_dir(base_dir: &Path, case_id: &str, eval_run_id: &str) -> PathBuf {
    base_dir.join(case_id).join(eval_run_id)
}

/// The newest session stored in the workspace.
fn find_session(workspace_root: &Path) -> Result<SessionOutcome> {
    let metas = list_traces(workspace_root)?;
    let newest = metas
        .first()
        .ok_or_else(|| anyhow!("no trace under {}", workspace_root.display()))?;
    load_trace(workspace_root, &newest.session_id)
}

fn write_meta(path: &Path, meta: &EvalMeta) -> Result<()> {
    let contents = serde_json::to_string_pretty(meta).context("serialize meta")?;
    fs::write(path, format!("{contents}\n"))
        .with_context(|| format!("write meta {}", path.display()))?;
    Ok(())
}

fn file_sha256(path: &Path) -> Result<String> {
    let contents = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(contents);
    let digest = hasher.finalize();
    Ok(hex::encode(digest))
}

fn git_rev_parse(repo_root: &Path) -> Result<String> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(repo_root)
        .output()
        .context("git rev-parse")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("git rev-parse failed: {}", stderr.trim()));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn copy_if_exists(src: &Path, dst: &Path, label: &str, errors: &mut Vec<String>) {
    if !src.exists() {
        errors.push(format!("{label}: missing {}", src.display()));
        return;
    }
    if let Some(parent) = dst.parent()
        && let Err(err) = fs::create_dir_all(parent)
    {
        errors.push(format!("{label}: create dir failed: {err}"));
        return;
    }
    if let Err(err) = fs::copy(src, dst) {
        errors.push(format!("{label}: copy failed: {err}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rlm::core::context::Context as RlmContext;
    use rlm::io::config::RlmConfig;
    use rlm::io::trace_log::write_trace;
    use rlm::session::{SessionRequest, run_session};
    use rlm::test_support::{ScriptedBackend, ScriptedSandbox};
    use tempfile::tempdir;

    fn capture_input<'a>(
        case_path: &'a Path,
        workspace: &'a Path,
        repo_root: &'a Path,
        exit_code: Option<i32>,
    ) -> CaptureInput<'a> {
        CaptureInput {
            case_id: "case",
            case_path,
            eval_run_id: "eval-1",
            rlm_binary: Path::new("/bin/rlm"),
            ask: AskStatus {
                exit_code,
                timed_out: false,
            },
            started_at: Utc::now(),
            finished_at: Utc::now(),
            workspace_root: workspace,
            repo_root,
        }
    }

    #[test]
    fn results_dir_is_stable() {
        let base = Path::new("/tmp/results");
        let dir = results_dir(base, "case", "run-1");
        assert_eq!(dir, PathBuf::from("/tmp/results/case/run-1"));
    }

    #[test]
    fn copies_session_trace_when_present() {
        let temp = tempdir().expect("tempdir");
        let workspace = temp.path().join("workspace");
        let results = temp.path().join("results");
        fs::create_dir_all(&workspace).expect("workspace");

        let context = RlmContext::new("alpha\nbeta");
        let cfg = RlmConfig::default();
        let outcome = run_session(
            &SessionRequest::new("Which line holds beta?", &context, &cfg),
            &ScriptedBackend::new(["FINAL_ANSWER: line 1"]),
            &ScriptedSandbox::default(),
            |_| {},
        )
        .expect("session");
        write_trace(&workspace, &outcome).expect("write trace");

        let case_path = temp.path().join("case.toml");
        fs::write(&case_path, "[case]\nid='case'\n").expect("case");

        let captured = capture_results(
            &results,
            &capture_input(&case_path, &workspace, temp.path(), Some(0)),
        )
        .expect("capture");

        assert!(captured.results_dir.join("trace.json").exists());
        assert!(captured.results_dir.join("answer.md").exists());
        let session = captured.session.expect("session captured");
        assert_eq!(session.session_id, outcome.session_id);

        let meta: EvalMeta = serde_json::from_str(
            &fs::read_to_string(captured.results_dir.join("meta.json")).expect("meta"),
        )
        .expect("parse meta");
        assert_eq!(meta.stop_status.as_deref(), Some("answered"));
        assert_eq!(meta.turns, Some(1));
        assert_eq!(meta.case_hash.len(), 64);
    }

    #[test]
    fn missing_trace_is_recorded_as_an_error() {
        let temp = tempdir().expect("tempdir");
        let workspace = temp.path().join("workspace");
        fs::create_dir_all(&workspace).expect("workspace");
        let case_path = temp.path().join("case.toml");
        fs::write(&case_path, "x").expect("case");

        let captured = capture_results(
            &temp.path().join("results"),
            &capture_input(&case_path, &workspace, temp.path(), Some(1)),
        )
        .expect("capture");

        assert!(captured.session.is_none());
        update_outcome(&captured.results_dir, Outcome::Fatal).expect("update");
        let meta: EvalMeta = serde_json::from_str(
            &fs::read_to_string(captured.results_dir.join("meta.json")).expect("meta"),
        )
        .expect("parse meta");
        assert_eq!(meta.outcome, Some(Outcome::Fatal));
        assert!(meta.errors.iter().any(|e| e.starts_with("session trace:")));
    }
}
