//! Case execution orchestration.
//!
//! Coordinates workspace creation, the `rlm ask` run, checks, and result capture.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use rlm::io::config::{RlmConfig, load_config};
use tracing::{debug, info, instrument};

use crate::case::CaseFile;
use crate::config::apply_case_config;
use crate::harness::{DEFAULT_ASK_TIMEOUT, build_rlm_binary, run_rlm_ask};
use crate::judge::{run_checks, write_judgment};
use crate::outcome::{Outcome, classify_outcome};
use crate::results::{CaptureInput, capture_results, update_outcome};
use crate::workspace::create_workspace;

/// Result of running a single case.
#[derive(Debug)]
pub struct RunOutcome {
    /// Unique identifier for this eval run.
    pub eval_run_id: String,
    /// Path to the results directory.
    pub results_dir: PathBuf,
    /// Classified outcome.
    pub outcome: Outcome,
    /// How the session stopped, when a trace was captured.
    pub stop_status: Option<String>,
    pub turns: Option<usize>,
}

/// Run a case end-to-end: workspace creation, `rlm ask`, checks, result capture.
#[instrument(skip_all, fields(case_id = %case.case.id))]
pub fn run_case(repo_root: &Path, case_path: &Path, case: &CaseFile) -> Result<RunOutcome> {
    info!("case run started");

    let context_path = case.context_path(case_path);
    if !context_path.exists() {
        bail!("case context not found at {}", context_path.display());
    }
    let context_path = context_path
        .canonicalize()
        .with_context(|| format!("resolve {}", context_path.display()))?;

    debug!("building rlm binary");
    let rlm_binary = build_rlm_binary(repo_root)?;
    if !rlm_binary.exists() {
        bail!("rlm binary not found at {}", rlm_binary.display());
    }

    debug!("creating workspace");
    let config = apply_case_config(load_base_config(repo_root)?, &case.config)?;
    let workspace_base = repo_root.join("eval").join("workspaces");
    let workspace =
        create_workspace(&workspace_base, &case.case.id, &config).context("create workspace")?;

    let started_at = Utc::now();
    let eval_run_id = eval_run_id(started_at);
    let results_base = repo_root.join("eval").join("results");
    let logs_dir = results_base.join(&case.case.id).join(&eval_run_id);

    debug!("running rlm ask");
    let timeout = case
        .config
        .timeout_secs
        .map_or(DEFAULT_ASK_TIMEOUT, Duration::from_secs);
    let ask = run_rlm_ask(
        &rlm_binary,
        &workspace.root,
        &context_path,
        &case.case.question,
        &logs_dir,
        &case.env,
        timeout,
    )
    .context("run rlm ask")?;
    let finished_at = Utc::now();

    let duration = finished_at - started_at;
    info!(
        exit_code = ?ask.exit_code,
        timed_out = ask.timed_out,
        duration_secs = duration.num_milliseconds() as f64 / 1000.0,
        "rlm ask finished"
    );

    debug!("capturing results");
    let capture_input = CaptureInput {
        case_id: &case.case.id,
        case_path,
        eval_run_id: &eval_run_id,
        rlm_binary: &rlm_binary,
        ask,
        started_at,
        finished_at,
        workspace_root: &workspace.root,
        repo_root,
    };
    let captured = capture_results(&results_base, &capture_input).context("capture results")?;

    debug!("running checks");
    let judgment = run_checks(&case.checks, captured.session.as_ref());
    write_judgment(&captured.results_dir.join("checks.json"), &judgment)
        .context("write checks")?;

    let outcome = classify_outcome(ask.exit_code, &judgment);
    update_outcome(&captured.results_dir, outcome).context("update outcome")?;

    info!(outcome = ?outcome, results_dir = %captured.results_dir.display(), "case run complete");

    let stop_status = captured
        .session
        .as_ref()
        .map(|session| session.stop.label().to_string());
    let turns = captured.session.as_ref().map(|session| session.turns.len());
    Ok(RunOutcome {
        eval_run_id,
        results_dir: captured.results_dir,
        outcome,
        stop_status,
        turns,
    })
}

/// `eval/rlm.toml` when present (backend and model settings shared by every
/// case), otherwise the defaults.
fn load_base_config(repo_root: &Path) -> Result<RlmConfig> {
    load_config(&base_config_path(repo_root))
}

/// `eval-<UTC timestamp with milliseconds>`, so back-to-back runs get distinct ids.
fn eval_run_id(started_at: DateTime<Utc>) -> String {
    format!("eval-{}", started_at.format("%Y%m%d_%H%M%S_%3f"))
}

fn base_config_path(repo_root: &Path) -> PathBuf {
    repo_root.join("eval").join("rlm.toml")
}
