//! Consecutive-failure escalation for a loop
//!
//! Counts feature failures in a row. When `threshold` of them fall inside
//! `window`, the loop should pause instead of burning through the backlog.
//! Any success clears the count.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Default failures before the loop pauses
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Default window the failures must fall into
pub const DEFAULT_FAILURE_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct FailureTracker {
    threshold: u32,
    window: Duration,
    failures: VecDeque<Instant>,
    consecutive: u32,
}

impl Default for FailureTracker {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD, DEFAULT_FAILURE_WINDOW)
    }
}

impl FailureTracker {
    pub fn new(threshold: u32, window: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            window,
            failures: VecDeque::new(),
            consecutive: 0,
        }
    }

    /// Record a success and reset
    pub fn record_success(&mut self) {
        self.failures.clear();
        self.consecutive = 0;
    }

    /// Record a failure now; true when the loop should pause
    pub fn record_failure(&mut self) -> bool {
        self.record_failure_at(Instant::now())
    }

    pub fn record_failure_at(&mut self, now: Instant) -> bool {
        self.consecutive = self.consecutive.saturating_add(1);
        self.failures.push_back(now);
        while let Some(&oldest) = self.failures.front() {
            if now.duration_since(oldest) > self.window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
        self.failures.len() >= self.threshold as usize
    }

    /// Failures since the last success
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}
