// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Operational policies for segment retries and control loop polling.

use std::time::Duration;

use crate::outcome::RetryClassification;

/// Policy for re-running a failed segment.
pub trait RetryPolicy: Send + Sync {
    /// Whether a segment that failed on budgeted attempt `attempt` (1-based)
    /// with `classification` should run again.
    fn should_retry(&self, attempt: u32, classification: RetryClassification) -> bool;

    /// Delay before the next attempt.
    fn delay(&self, attempt: u32) -> Duration;

    /// Budgeted attempts per segment.
    fn max_attempts(&self) -> u32;

    /// Free retries allowed per segment before they turn fatal.
    fn free_retry_limit(&self) -> u32 {
        0
    }
}

/// Fixed delay retry policy.
///
/// Budgeted failures retry up to `max_attempts` total attempts. Free
/// failures retry without touching the attempt counter, up to a cap.
#[derive(Debug, Clone)]
pub struct FixedDelay {
    max_attempts: u32,
    delay: Duration,
    free_retry_limit: u32,
}

impl FixedDelay {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            free_retry_limit: 5,
        }
    }

    pub fn with_free_retry_limit(mut self, limit: u32) -> Self {
        self.free_retry_limit = limit;
        self
    }
}

impl Default for FixedDelay {
    fn default() -> Self {
        Self::new(2, Duration::from_secs(1))
    }
}

impl RetryPolicy for FixedDelay {
    fn should_retry(&self, attempt: u32, classification: RetryClassification) -> bool {
        match classification {
            RetryClassification::RetryWithBudget => attempt < self.max_attempts,
            RetryClassification::RetryFree => true,
            RetryClassification::Fatal | RetryClassification::Cancelled => false,
        }
    }

    fn delay(&self, _attempt: u32) -> Duration {
        self.delay
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn free_retry_limit(&self) -> u32 {
        self.free_retry_limit
    }
}

/// Control loop phase a poll interval is requested for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
    Approach,
    Rotate,
    CloseApproach,
}

/// Policy for how often the control loop ticks.
pub trait PollingPolicy: Send + Sync {
    fn interval(&self, phase: PollPhase) -> Duration;
}

/// Per-phase polling intervals.
#[derive(Debug, Clone)]
pub struct PhasePolling {
    approach: Duration,
    rotate: Duration,
    close: Duration,
}

impl PhasePolling {
    pub fn new(approach: Duration, rotate: Duration, close: Duration) -> Self {
        Self {
            approach,
            rotate,
            close,
        }
    }
}

impl Default for PhasePolling {
    fn default() -> Self {
        Self {
            approach: Duration::from_millis(100),
            rotate: Duration::from_millis(50),
            close: Duration::from_millis(20),
        }
    }
}

impl PollingPolicy for PhasePolling {
    fn interval(&self, phase: PollPhase) -> Duration {
        match phase {
            PollPhase::Approach => self.approach,
            PollPhase::Rotate => self.rotate,
            PollPhase::CloseApproach => self.close,
        }
    }
}

/// Same interval for every phase.
#[derive(Debug, Clone)]
pub struct FixedPolling {
    interval: Duration,
}

impl FixedPolling {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl PollingPolicy for FixedPolling {
    fn interval(&self, _phase: PollPhase) -> Duration {
        self.interval
    }
}
