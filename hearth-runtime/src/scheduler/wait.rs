//! Wait-strategy resolution for loop and cron jobs

use crate::modules::Wait;
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;
use std::time::Duration;

/// Resolve a wait strategy to a concrete sleep duration.
///
/// Errors (bad cron expressions, schedules with no upcoming fire) are left to
/// the caller, which substitutes a fallback delay to avoid a tight error loop.
pub fn resolve(wait: &Wait) -> Result<Duration, String> {
    match wait {
        Wait::Fixed(duration) => Ok(*duration),
        Wait::Cron(expr) => next_cron_delay(expr, Utc::now()),
    }
}

/// Time until `expr` next matches wall-clock time, measured from `now`
pub fn next_cron_delay(expr: &str, now: DateTime<Utc>) -> Result<Duration, String> {
    let schedule =
        Schedule::from_str(expr).map_err(|e| format!("invalid cron expression '{}': {}", expr, e))?;

    let next = schedule
        .after(&now)
        .next()
        .ok_or_else(|| format!("cron expression '{}' has no upcoming fire time", expr))?;

    // A fire time in the past resolves to an immediate wake
    Ok((next - now).to_std().unwrap_or(Duration::ZERO))
}
