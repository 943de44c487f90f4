//! Persistence scheduler: re-runs a crawl forever on a jittered interval.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::job::JobStatus;
use crate::worker::JobContext;

/// Bounds, in minutes, of the wait between two persistent runs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScheduleWindow {
    min: f64,
    max: f64,
}

impl ScheduleWindow {
    pub const DEFAULT_MINUTES: f64 = 600.0;

    /// Longest accepted wait: one year.
    pub const MAX_MINUTES: f64 = 525_600.0;

    pub fn new(min: f64, max: f64) -> Result<Self, AppError> {
        if !min.is_finite() || !max.is_finite() || min < 0.0 {
            return Err(AppError::InvalidRequest(format!(
                "invalid persistent interval {min}-{max}"
            )));
        }
        if min > max {
            return Err(AppError::InvalidRequest(format!(
                "persistent interval minimum {min} exceeds maximum {max}"
            )));
        }
        if max > Self::MAX_MINUTES {
            return Err(AppError::InvalidRequest(format!(
                "persistent interval maximum {max} exceeds {} minutes",
                Self::MAX_MINUTES
            )));
        }
        Ok(Self { min, max })
    }

    /// A window that always waits `minutes`.
    pub fn fixed(minutes: f64) -> Result<Self, AppError> {
        Self::new(minutes, minutes)
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    /// Minutes to wait before the next run: the fixed value when the bounds
    /// are equal, otherwise uniform over `[min, max]`.
    pub fn next_minutes<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        if self.min == self.max {
            self.min
        } else {
            rng.random_range(self.min..=self.max)
        }
    }

    pub fn next_delay<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        Duration::try_from_secs_f64(self.next_minutes(rng) * 60.0).unwrap_or(Duration::MAX)
    }
}

impl Default for ScheduleWindow {
    fn default() -> Self {
        Self {
            min: Self::DEFAULT_MINUTES,
            max: Self::DEFAULT_MINUTES,
        }
    }
}

impl fmt::Display for ScheduleWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.min == self.max {
            write!(f, "{}", self.min)
        } else {
            write!(f, "{}-{}", self.min, self.max)
        }
    }
}

/// Parses `"30"` (fixed) or `"30-90"` (range), in minutes.
impl FromStr for ScheduleWindow {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |v: &str| {
            v.trim()
                .parse::<f64>()
                .map_err(|_| AppError::InvalidRequest(format!("invalid time(s) format: {s}")))
        };
        let parts: Vec<&str> = s.split('-').collect();
        match parts.as_slice() {
            [fixed] => Self::fixed(parse(fixed)?),
            [min, max] => Self::new(parse(min)?, parse(max)?),
            _ => Err(AppError::InvalidRequest(format!(
                "invalid time(s) format: {s}"
            ))),
        }
    }
}

/// Run `crawl` forever, sleeping a window-drawn delay between runs.
///
/// Each pass records `"<label>: sleeping till <time>"` to the job output.
/// The loop ends when the job's cancellation token fires (process
/// shutdown), or when a pass fails on the manifest itself, which no amount
/// of waiting would fix. Other failures are recorded and the loop goes on.
pub async fn run_persistent<F, Fut>(
    ctx: &JobContext,
    label: &str,
    window: ScheduleWindow,
    mut crawl: F,
) -> Result<JobStatus, AppError>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<JobStatus, AppError>> + Send,
{
    loop {
        match crawl().await {
            Ok(_) => {}
            Err(e @ AppError::ManifestError(_)) => return Err(e),
            Err(e) => ctx.log(format!("{label}: error: {e}")).await,
        }

        let delay = window.next_delay(&mut rand::rng());
        let resume_at = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        ctx.log(format!(
            "{label}: sleeping till {}",
            resume_at.format("%Y-%m-%d %H:%M:%S")
        ))
        .await;
        tracing::info!(job_id = %ctx.id(), %label, delay_secs = delay.as_secs(), "Persistent job sleeping");

        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = ctx.cancelled() => {
                tracing::info!(job_id = %ctx.id(), %label, "Persistent job stopped by shutdown");
                return Ok(JobStatus::Done);
            }
        }
    }
}
