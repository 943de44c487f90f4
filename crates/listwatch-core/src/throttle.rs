//! Adaptive politeness throttle shared by every running crawl.
//!
//! A single delay (seconds) is slept before each detail fetch. When the site
//! answers with its block page the delay is escalated multiplicatively, and
//! every clean page afterwards decays it back towards the baseline.
//!
//! The delay lives in an atomic cell and is updated with relaxed ordering:
//! concurrent crawls may interleave updates, which is acceptable for a
//! politeness heuristic.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use listwatch_core::throttle::{RateConfig, RateController};
//!
//! let rate = RateController::new(RateConfig::default());
//! assert_eq!(rate.current_delay(), Duration::from_secs(1));
//! rate.escalate();
//! assert_eq!(rate.current_delay(), Duration::from_millis(2500));
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Configuration for the rate controller.
#[derive(Debug, Clone)]
pub struct RateConfig {
    /// Delay slept before every detail fetch when the site is not pushing back.
    pub baseline: Duration,

    /// Fixed sleep after the block page was served.
    pub block_backoff: Duration,

    /// Factor applied to the delay on block detection.
    pub escalation: f64,

    /// Factor applied to an elevated delay after a clean page.
    pub decay: f64,
}

impl RateConfig {
    pub fn new(baseline: Duration, block_backoff: Duration) -> Self {
        Self {
            baseline,
            block_backoff,
            ..Self::default()
        }
    }
}

impl Default for RateConfig {
    /// 1 second baseline, 6 minute block backoff.
    fn default() -> Self {
        Self {
            baseline: Duration::from_secs(1),
            block_backoff: Duration::from_secs(360),
            escalation: 2.5,
            decay: 0.99,
        }
    }
}

/// Shared throttle scalar plus the fixed block backoff.
#[derive(Debug)]
pub struct RateController {
    config: RateConfig,
    /// Current delay in seconds, stored as `f64` bits.
    delay: AtomicU64,
}

impl RateController {
    pub fn new(config: RateConfig) -> Self {
        let delay = AtomicU64::new(config.baseline.as_secs_f64().to_bits());
        Self { config, delay }
    }

    pub fn config(&self) -> &RateConfig {
        &self.config
    }

    fn delay_secs(&self) -> f64 {
        f64::from_bits(self.delay.load(Ordering::Relaxed))
    }

    /// The delay the next fetch will sleep.
    pub fn current_delay(&self) -> Duration {
        Duration::from_secs_f64(self.delay_secs().max(0.0))
    }

    pub fn block_backoff(&self) -> Duration {
        self.config.block_backoff
    }

    /// Sleep the current delay.
    pub async fn throttle(&self) {
        let delay = self.current_delay();
        if !delay.is_zero() {
            tracing::debug!(sleep_ms = %delay.as_millis(), "Throttling fetch");
            tokio::time::sleep(delay).await;
        }
    }

    /// Multiply the delay by the escalation factor. Returns the new delay.
    pub fn escalate(&self) -> Duration {
        let factor = self.config.escalation;
        let previous = self.update(|secs| Some(secs * factor));
        let next = Duration::from_secs_f64((previous * factor).max(0.0));
        tracing::warn!(delay_ms = %next.as_millis(), "Block page detected, escalating throttle");
        next
    }

    /// Decay an elevated delay towards the baseline, never below it.
    pub fn relax(&self) {
        let baseline = self.config.baseline.as_secs_f64();
        let factor = self.config.decay;
        self.update(|secs| (secs > baseline).then(|| (secs * factor).max(baseline)));
    }

    /// Apply `f` to the stored seconds; `None` leaves the value untouched.
    /// Returns the value seen before the update.
    fn update(&self, f: impl Fn(f64) -> Option<f64>) -> f64 {
        let result = self
            .delay
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                f(f64::from_bits(bits)).map(f64::to_bits)
            });
        match result {
            Ok(bits) | Err(bits) => f64::from_bits(bits),
        }
    }
}

impl Default for RateController {
    fn default() -> Self {
        Self::new(RateConfig::default())
    }
}
