//! Wall-clock budget helpers for sessions.

use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};

/// Deadline `secs` after `start`, when a budget is configured.
pub fn deadline_after(start: Instant, secs: Option<u64>) -> Option<Instant> {
    secs.map(|secs| start + Duration::from_secs(secs))
}

/// Return the remaining time budget until the provided deadline.
pub fn remaining_budget(deadline: Instant) -> Result<Duration> {
    let remaining = deadline
        .checked_duration_since(Instant::now())
        .unwrap_or(Duration::from_secs(0));
    if remaining.is_zero() {
        return Err(anyhow!("session time budget exhausted"));
    }
    Ok(remaining)
}
