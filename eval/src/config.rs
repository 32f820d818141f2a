//! Session configuration merging.
//!
//! Applies case-specific overrides to the workspace's `rlm` configuration.

use anyhow::Result;
use rlm::io::config::RlmConfig;

use crate::case::CaseConfig;

/// Apply case configuration overrides to the base session config.
pub fn apply_case_config(mut base: RlmConfig, overrides: &CaseConfig) -> Result<RlmConfig> {
    if let Some(max_iterations) = overrides.max_iterations {
        base.max_iterations = max_iterations;
    }
    if let Some(max_depth) = overrides.max_depth {
        base.max_depth = max_depth;
    }
    base.validate()?;
    Ok(base)
}
