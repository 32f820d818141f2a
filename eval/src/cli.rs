//! CLI command implementations.

use std::path::Path;

use anyhow::{Context, Result, bail};
use tracing::{debug, info};

use crate::case::{CaseFile, discover_cases};
use crate::report::aggregate;
use crate::run::run_case;

/// List all available cases.
pub fn list_cases(repo_root: &Path) -> Result<()> {
    let cases_dir = repo_root.join("eval").join("cases");
    let cases = discover_cases(&cases_dir)?;
    for case in cases {
        println!(
            "{}\tchecks={}\t{}",
            case.case.id,
            case.checks.len(),
            case.case.question
        );
    }
    Ok(())
}

/// Run a case by id (optionally multiple times).
pub fn run_case_by_id(repo_root: &Path, case_id: &str, runs: u32) -> Result<()> {
    let cases_dir = repo_root.join("eval").join("cases");
    let case_path = cases_dir.join(format!("{case_id}.toml"));
    if !case_path.exists() {
        bail!("case {} not found at {}", case_id, case_path.display());
    }
    let case = CaseFile::load(&case_path).context("load case")?;
    debug!(case_id, runs, "case loaded");

    info!(case_id, runs, "starting runs");
    for run_num in 1..=runs {
        debug!(case_id, run_num, runs, "starting run");
        let outcome = run_case(repo_root, &case_path, &case).context("run case")?;
        println!(
            "run: case={} eval_run_id={} outcome={:?} stop={} turns={} results={}",
            case_id,
            outcome.eval_run_id,
            outcome.outcome,
            outcome.stop_status.as_deref().unwrap_or("none"),
            outcome.turns.map_or_else(|| "-".to_string(), |t| t.to_string()),
            outcome.results_dir.display()
        );
    }
    Ok(())
}

/// Show aggregated results for a case.
pub fn report_case(repo_root: &Path, case_id: &str) -> Result<()> {
    let results_dir = repo_root.join("eval").join("results").join(case_id);
    let (summary, warnings) = aggregate(&results_dir)?;
    for line in summary.lines(case_id) {
        println!("{line}");
    }
    for warning in warnings {
        eprintln!("warning: {}", warning);
    }
    Ok(())
}

/// Remove workspaces and results for a case.
pub fn clean_case(repo_root: &Path, case_id: &str) -> Result<()> {
    let workspaces_dir = repo_root.join("eval").join("workspaces");
    let results_dir = repo_root.join("eval").join("results");

    if workspaces_dir.exists() {
        for entry in std::fs::read_dir(&workspaces_dir)
            .with_context(|| format!("read {}", workspaces_dir.display()))?
        {
            let entry = entry.context("read entry")?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(&format!("{case_id}_")) {
                std::fs::remove_dir_all(entry.path())
                    .with_context(|| format!("remove {}", entry.path().display()))?;
            }
        }
    }

    let case_results = results_dir.join(case_id);
    if case_results.exists() {
        std::fs::remove_dir_all(&case_results)
            .with_context(|| format!("remove {}", case_results.display()))?;
    }

    println!(
        "clean: case={} workspaces={} results={}",
        case_id,
        workspaces_dir.display(),
        case_results.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn clean_only_removes_the_cases_own_runs() {
        let temp = tempdir().expect("tempdir");
        let workspaces = temp.path().join("eval").join("workspaces");
        let results = temp.path().join("eval").join("results");
        for name in [
            "release-notes_20260101_000000_abc123",
            "release-notes-v2_20260101_000000_def456",
        ] {
            fs::create_dir_all(workspaces.join(name)).expect("workspace");
        }
        fs::create_dir_all(results.join("release-notes").join("eval-1")).expect("results");
        fs::create_dir_all(results.join("release-notes-v2").join("eval-1")).expect("results");

        clean_case(temp.path(), "release-notes").expect("clean");

        assert!(!workspaces.join("release-notes_20260101_000000_abc123").exists());
        assert!(workspaces.join("release-notes-v2_20260101_000000_def456").exists());
        assert!(!results.join("release-notes").exists());
        assert!(results.join("release-notes-v2").exists());
    }
}
