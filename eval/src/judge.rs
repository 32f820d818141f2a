//! Check execution and outcome recording.
//!
//! Judges the finished session against the case checks. A run whose trace
//! could not be captured fails every check.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rlm::core::types::TurnKind;
use rlm::session::SessionOutcome;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::case::Check;

/// Collected check outcomes for a run.
#[derive(Debug, Serialize, Deserialize)]
pub struct Judgment {
    pub checks: Vec<CheckOutcome>,
}

impl Judgment {
    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(CheckOutcome::passed)
    }
}

/// Result of running a single check.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckOutcome {
    Answered {
        passed: bool,
        status: Option<String>,
    },
    AnswerContains {
        text: String,
        passed: bool,
    },
    MaxTurns {
        turns: u32,
        passed: bool,
        actual: Option<usize>,
    },
    UsedCode {
        passed: bool,
        code_turns: usize,
    },
    CitesContext {
        passed: bool,
        valid_citations: usize,
        invalid_citations: usize,
    },
}

impl CheckOutcome {
    pub fn passed(&self) -> bool {
        match self {
            CheckOutcome::Answered { passed, .. }
            | CheckOutcome::AnswerContains { passed, .. }
            | CheckOutcome::MaxTurns { passed, .. }
            | CheckOutcome::UsedCode { passed, .. }
            | CheckOutcome::CitesContext { passed, .. } => *passed,
        }
    }

    /// Stable label used to aggregate pass rates across runs.
    pub fn label(&self) -> String {
        match self {
            CheckOutcome::Answered { .. } => "answered".to_string(),
            CheckOutcome::AnswerContains { text, .. } => format!("answer_contains({text})"),
            CheckOutcome::MaxTurns { turns, .. } => format!("max_turns({turns})"),
            CheckOutcome::UsedCode { .. } => "used_code".to_string(),
            CheckOutcome::CitesContext { .. } => "cites_context".to_string(),
        }
    }
}

/// Run all checks against the captured session and collect outcomes.
#[instrument(skip_all, fields(check_count = checks.len(), has_session = session.is_some()))]
pub fn run_checks(checks: &[Check], session: Option<&SessionOutcome>) -> Judgment {
    let answer = session.and_then(SessionOutcome::answer);
    let mut outcomes = Vec::with_capacity(checks.len());
    for check in checks {
        let outcome = match check {
            Check::Answered => CheckOutcome::Answered {
                passed: answer.is_some(),
                status: session.map(|s| s.stop.label().to_string()),
            },
            Check::AnswerContains { text } => CheckOutcome::AnswerContains {
                text: text.clone(),
                passed: answer
                    .is_some_and(|a| a.to_lowercase().contains(&text.to_lowercase())),
            },
            Check::MaxTurns { turns } => {
                let actual = session.map(|s| s.turns.len());
                CheckOutcome::MaxTurns {
                    turns: *turns,
                    passed: actual.is_some_and(|n| n <= *turns as usize),
                    actual,
                }
            }
            Check::UsedCode => {
                let code_turns = session.map_or(0, |s| {
                    s.turns
                        .iter()
                        .filter(|turn| turn.kind == TurnKind::CodeExecution)
                        .count()
                });
                CheckOutcome::UsedCode {
                    passed: code_turns > 0,
                    code_turns,
                }
            }
            Check::CitesContext => {
                let (valid, invalid) = session.map_or((0, 0), |s| {
                    let valid = s.citations.iter().filter(|c| c.valid).count();
                    (valid, s.citations.len() - valid)
                });
                CheckOutcome::CitesContext {
                    passed: valid > 0,
                    valid_citations: valid,
                    invalid_citations: invalid,
                }
            }
        };
        debug!(check = %outcome.label(), passed = outcome.passed(), "check result");
        outcomes.push(outcome);
    }
    Judgment { checks: outcomes }
}

pub fn write_judgment(path: &Path, judgment: &Judgment) -> Result<()> {
    let contents = serde_json::to_string_pretty(judgment).context("serialize checks")?;
    fs::write(path, format!("{contents}\n"))
        .with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
