use rlm::exit_codes;
use serde::{Deserialize, Serialize};

use crate::judge::Judgment;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Fail,
    Exhausted,
    Fatal,
}

/// Classify a run from the `rlm ask` exit code and the check results.
///
/// Invalid input, a killed process and unknown codes all count as fatal.
pub fn classify_outcome(rlm_exit_code: Option<i32>, judgment: &Judgment) -> Outcome {
    match rlm_exit_code {
        Some(exit_codes::OK) => {
            if judgment.all_passed() {
                Outcome::Success
            } else {
                Outcome::Fail
            }
        }
        Some(exit_codes::EXHAUSTED) => Outcome::Exhausted,
        Some(_) | None => Outcome::Fatal,
    }
}
