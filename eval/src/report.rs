use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::judge::Judgment;
use crate::outcome::Outcome;
use crate::results::EvalMeta;

#[derive(Debug, Default)]
pub struct ReportSummary {
    pub runs: usize,
    pub success: usize,
    pub fail: usize,
    pub exhausted: usize,
    pub fatal: usize,
    pub avg_duration_secs: Option<f64>,
    /// Averaged over runs that produced a session trace.
    pub avg_turns: Option<f64>,
    pub avg_sub_calls: Option<f64>,
    /// Session stop status (`answered`, `exhausted`, `fatal`, or `none`) by count.
    pub stop_statuses: BTreeMap<String, usize>,
    pub check_pass_rates: BTreeMap<String, (usize, usize)>,
}

impl ReportSummary {
    /// Report lines printed by `eval report`.
    pub fn lines(&self, case_id: &str) -> Vec<String> {
        let mut lines = vec![
            format!("report: case={case_id} runs={}", self.runs),
            format!(
                "report: success={} fail={} exhausted={} fatal={}",
                self.success, self.fail, self.exhausted, self.fatal
            ),
        ];
        if let Some(avg) = self.avg_duration_secs {
            lines.push(format!("report: avg_duration_secs={avg:.2}"));
        }
        if let (Some(turns), Some(sub_calls)) = (self.avg_turns, self.avg_sub_calls) {
            lines.push(format!(
                "report: avg_turns={turns:.1} avg_sub_calls={sub_calls:.1}"
            ));
        }
        if !self.stop_statuses.is_empty() {
            let statuses: Vec<String> = self
                .stop_statuses
                .iter()
                .map(|(status, count)| format!("{status}={count}"))
                .collect();
            lines.push(format!("report: stop {}", statuses.join(" ")));
        }
        for (label, (passed, total)) in &self.check_pass_rates {
            let rate = if *total == 0 {
                0.0
            } else {
                *passed as f64 * 100.0 / *total as f64
            };
            lines.push(format!("report: check {label} {passed}/{total} ({rate:.0}%)"));
        }
        lines
    }
}

/// Running mean without keeping every sample.
#[derive(Debug, Default)]
struct Mean {
    total: f64,
    count: usize,
}

impl Mean {
    fn add(&mut self, value: f64) {
        self.total += value;
        self.count += 1;
    }

    fn value(&self) -> Option<f64> {
        (self.count > 0).then(|| self.total / self.count as f64)
    }
}

pub fn load_run_dirs(case_results_dir: &Path) -> Result<Vec<PathBuf>> {
    if !case_results_dir.exists() {
        return Ok(Vec::new());
    }
    let mut dirs = Vec::new();
    for entry in fs::read_dir(case_results_dir)
        .with_context(|| format!("read {}", case_results_dir.display()))?
    {
        let entry = entry.context("read entry")?;
        if entry.path().is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

pub fn aggregate(case_results_dir: &Path) -> Result<(ReportSummary, Vec<String>)> {
    let mut summary = ReportSummary::default();
    let mut warnings = Vec::new();
    let mut duration = Mean::default();
    let mut turns = Mean::default();
    let mut sub_calls = Mean::default();

    for run_dir in load_run_dirs(case_results_dir)? {
        let meta_path = run_dir.join("meta.json");
        let checks_path = run_dir.join("checks.json");

        let meta: EvalMeta = match fs::read_to_string(&meta_path)
            .with_context(|| format!("read {}", meta_path.display()))
            .and_then(|contents| serde_json::from_str(&contents).context("parse meta"))
        {
            Ok(meta) => meta,
            Err(err) => {
                warnings.push(format!(
                    "skip {}: meta.json invalid ({err})",
                    run_dir.display()
                ));
                continue;
            }
        };

        let judgment: Judgment = match fs::read_to_string(&checks_path)
            .with_context(|| format!("read {}", checks_path.display()))
            .and_then(|contents| serde_json::from_str(&contents).context("parse checks"))
        {
            Ok(checks) => checks,
            Err(err) => {
                warnings.push(format!(
                    "skip {}: checks.json invalid ({err})",
                    run_dir.display()
                ));
                continue;
            }
        };

        summary.runs += 1;
        match meta.outcome {
            Some(Outcome::Success) => summary.success += 1,
            Some(Outcome::Fail) => summary.fail += 1,
            Some(Outcome::Exhausted) => summary.exhausted += 1,
            Some(Outcome::Fatal) | None => summary.fatal += 1,
        }

        duration.add(meta.duration_secs);
        if let Some(count) = meta.turns {
            turns.add(count as f64);
            sub_calls.add(f64::from(meta.sub_call_count.unwrap_or(0)));
        }
        let status = meta.stop_status.unwrap_or_else(|| "none".to_string());
        *summary.stop_statuses.entry(status).or_insert(0) += 1;

        update_check_pass_rates(&mut summary.check_pass_rates, &judgment);
    }

    summary.avg_duration_secs = duration.value();
    summary.avg_turns = turns.value();
    summary.avg_sub_calls = sub_calls.value();
    Ok((summary, warnings))
}

fn update_check_pass_rates(stats: &mut BTreeMap<String, (usize, usize)>, judgment: &Judgment) {
    for check in &judgment.checks {
        let entry = stats.entry(check.label()).or_insert((0, 0));
        if check.passed() {
            entry.0 += 1;
        }
        entry.1 += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::CheckOutcome;
    use tempfile::tempdir;

    fn write_meta(path: &Path, outcome: Option<Outcome>, duration: f64) {
        write_session_meta(path, outcome, duration, Some((2, 0)));
    }

    fn write_session_meta(
        path: &Path,
        outcome: Option<Outcome>,
        duration: f64,
        session: Option<(usize, u32)>,
    ) {
        let meta = EvalMeta {
            case_id: "case".to_string(),
            eval_run_id: "run".to_string(),
            case_hash: "hash".to_string(),
            rlm_git_sha: None,
            rlm_binary: "/bin/rlm".to_string(),
            session_id: session.map(|_| "rlm-20260118_120000-00ff".to_string()),
            stop_status: session.map(|_| "answered".to_string()),
            turns: session.map(|(turns, _)| turns),
            sub_call_count: session.map(|(_, sub_calls)| sub_calls),
            outcome,
            start_time: "now".to_string(),
            end_time: "later".to_string(),
            duration_secs: duration,
            exit_code: Some(0),
            timed_out: false,
            workspace: "/tmp".to_string(),
            errors: Vec::new(),
        };
        let contents = serde_json::to_string_pretty(&meta).expect("meta json");
        fs::write(path, format!("{contents}\n")).expect("write meta");
    }

    fn write_checks(path: &Path, passed: bool) {
        let judgment = Judgment {
            checks: vec![
                CheckOutcome::Answered {
                    passed: true,
                    status: Some("answered".to_string()),
                },
                CheckOutcome::AnswerContains {
                    text: "beta".to_string(),
                    passed,
                },
            ],
        };
        let contents = serde_json::to_string_pretty(&judgment).expect("checks json");
        fs::write(path, format!("{contents}\n")).expect("write checks");
    }

    fn run_dir(root: &Path, name: &str) -> PathBuf {
        let dir = root.join(name);
        fs::create_dir_all(&dir).expect("run dir");
        dir
    }

    #[test]
    fn aggregates_runs() {
        let temp = tempdir().expect("tempdir");
        let run1 = run_dir(temp.path(), "run1");
        let run2 = run_dir(temp.path(), "run2");
        let run3 = run_dir(temp.path(), "run3");

        write_meta(&run1.join("meta.json"), Some(Outcome::Success), 5.0);
        write_checks(&run1.join("checks.json"), true);

        write_meta(&run2.join("meta.json"), Some(Outcome::Fail), 15.0);
        write_checks(&run2.join("checks.json"), false);

        write_meta(&run3.join("meta.json"), Some(Outcome::Exhausted), 10.0);
        write_checks(&run3.join("checks.json"), false);

        let (summary, warnings) = aggregate(temp.path()).expect("aggregate");
        assert!(warnings.is_empty());
        assert_eq!(summary.runs, 3);
        assert_eq!(
            (summary.success, summary.fail, summary.exhausted, summary.fatal),
            (1, 1, 1, 0)
        );
        assert_eq!(summary.avg_duration_secs, Some(10.0));

        assert_eq!(summary.check_pass_rates.get("answered"), Some(&(3, 3)));
        assert_eq!(
            summary.check_pass_rates.get("answer_contains(beta)"),
            Some(&(1, 3))
        );
    }

    #[test]
    fn averages_session_shape_over_runs_with_traces() {
        let temp = tempdir().expect("tempdir");
        let run1 = run_dir(temp.path(), "run1");
        let run2 = run_dir(temp.path(), "run2");
        let run3 = run_dir(temp.path(), "run3");

        write_session_meta(&run1.join("meta.json"), Some(Outcome::Success), 4.0, Some((2, 1)));
        write_checks(&run1.join("checks.json"), true);
        write_session_meta(&run2.join("meta.json"), Some(Outcome::Success), 6.0, Some((4, 3)));
        write_checks(&run2.join("checks.json"), true);
        write_session_meta(&run3.join("meta.json"), Some(Outcome::Fatal), 2.0, None);
        write_checks(&run3.join("checks.json"), false);

        let (summary, _) = aggregate(temp.path()).expect("aggregate");
        assert_eq!(summary.avg_duration_secs, Some(4.0));
        assert_eq!(summary.avg_turns, Some(3.0));
        assert_eq!(summary.avg_sub_calls, Some(2.0));
        assert_eq!(summary.stop_statuses.get("answered"), Some(&2));
        assert_eq!(summary.stop_statuses.get("none"), Some(&1));

        let lines = summary.lines("release-notes");
        assert_eq!(
            lines,
            vec![
                "report: case=release-notes runs=3".to_string(),
                "report: success=2 fail=0 exhausted=0 fatal=1".to_string(),
                "report: avg_duration_secs=4.00".to_string(),
                "report: avg_turns=3.0 avg_sub_calls=2.0".to_string(),
                "report: stop answered=2 none=1".to_string(),
                "report: check answer_contains(beta) 2/3 (67%)".to_string(),
                "report: check answered 3/3 (100%)".to_string(),
            ]
        );
    }

    #[test]
    fn unreadable_runs_are_skipped_with_a_warning() {
        let temp = tempdir().expect("tempdir");
        let good = run_dir(temp.path(), "good");
        let broken = run_dir(temp.path(), "broken");

        write_meta(&good.join("meta.json"), None, 2.0);
        write_checks(&good.join("checks.json"), true);
        fs::write(broken.join("meta.json"), "{not json").expect("write broken");

        let (summary, warnings) = aggregate(temp.path()).expect("aggregate");
        assert_eq!(summary.runs, 1);
        assert_eq!(summary.fatal, 1);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("meta.json invalid"));
    }

    #[test]
    fn missing_results_dir_is_empty() {
        let temp = tempdir().expect("tempdir");
        let (summary, warnings) = aggregate(&temp.path().join("nope")).expect("aggregate");
        assert_eq!(summary.runs, 0);
        assert!(summary.avg_duration_secs.is_none());
        assert!(summary.avg_turns.is_none());
        assert_eq!(summary.lines("nope").len(), 2);
        assert!(warnings.is_empty());
    }
}
