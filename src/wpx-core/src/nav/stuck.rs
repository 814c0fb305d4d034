// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Detection of an agent that keeps walking without getting anywhere.

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::geometry::Point2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StuckSettings {
    /// Number of sampled positions compared end to end.
    pub window: usize,
    /// Minimum spacing between samples.
    pub sample_interval_ms: u64,
    /// Net Manhattan displacement below which the agent counts as stuck.
    pub displacement: f64,
    /// Detections allowed per segment attempt; reaching it is fatal.
    pub budget: u32,
}

impl Default for StuckSettings {
    fn default() -> Self {
        Self {
            window: 8,
            sample_interval_ms: 1000,
            displacement: 3.0,
            budget: 3,
        }
    }
}

/// Verdict for one stuck detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StuckVerdict {
    /// Try an escape maneuver; carries the 1-based detection number.
    Escape(u32),
    /// The budget is used up.
    Exhausted(u32),
}

#[derive(Debug, Clone)]
pub struct StuckDetector {
    settings: StuckSettings,
    samples: VecDeque<Point2>,
    last_sample: Option<Instant>,
    detections: u32,
}

impl StuckDetector {
    pub fn new(settings: StuckSettings) -> Self {
        Self {
            settings,
            samples: VecDeque::with_capacity(settings.window),
            last_sample: None,
            detections: 0,
        }
    }

    pub fn detections(&self) -> u32 {
        self.detections
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Record `position` if the sample interval (plus `extra_delay`) has
    /// passed. Returns a verdict when the full window shows no progress.
    pub fn observe(&mut self, position: Point2, extra_delay: Duration) -> Option<StuckVerdict> {
        let now = Instant::now();
        let interval = Duration::from_millis(self.settings.sample_interval_ms) + extra_delay;
        if let Some(last) = self.last_sample {
            if now.duration_since(last) <= interval {
                return None;
            }
        }
        self.last_sample = Some(now);

        self.samples.push_back(position);
        while self.samples.len() > self.settings.window.max(2) {
            self.samples.pop_front();
        }
        if self.samples.len() < self.settings.window.max(2) {
            return None;
        }

        let (Some(oldest), Some(newest)) = (self.samples.front(), self.samples.back()) else {
            return None;
        };
        if newest.manhattan(oldest) >= self.settings.displacement {
            return None;
        }

        self.detections += 1;
        self.samples.clear();
        if self.detections >= self.settings.budget {
            Some(StuckVerdict::Exhausted(self.detections))
        } else {
            Some(StuckVerdict::Escape(self.detections))
        }
    }

    /// Drop sampled positions but keep the detection count.
    pub fn clear_window(&mut self) {
        self.samples.clear();
        self.last_sample = None;
    }

    pub fn reset(&mut self) {
        self.clear_window();
        self.detections = 0;
    }
}

impl Default for StuckDetector {
    fn default() -> Self {
        Self::new(StuckSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn feed(detector: &mut StuckDetector, position: Point2, ticks: usize) -> Vec<StuckVerdict> {
        let mut verdicts = Vec::new();
        for _ in 0..ticks {
            if let Some(v) = detector.observe(position, Duration::ZERO) {
                verdicts.push(v);
            }
            tokio::time::advance(Duration::from_millis(100)).await;
        }
        verdicts
    }

    #[tokio::test(start_paused = true)]
    async fn test_constant_position_detected_after_window() {
        let mut detector = StuckDetector::default();
        // Samples land every 1.1 s; eight of them span ~7.7 s.
        let verdicts = feed(&mut detector, Point2::new(5.0, 5.0), 70).await;
        assert!(verdicts.is_empty());
        assert_eq!(detector.sample_count(), 7);

        let mut detected = None;
        for _ in 0..20 {
            if let Some(v) = detector.observe(Point2::new(5.0, 5.0), Duration::ZERO) {
                detected = Some(v);
                break;
            }
            tokio::time::advance(Duration::from_millis(100)).await;
        }
        assert_eq!(detected, Some(StuckVerdict::Escape(1)));
        // The detecting sample empties the window.
        assert_eq!(detector.sample_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhausts_on_third_detection() {
        let mut detector = StuckDetector::default();
        let verdicts = feed(&mut detector, Point2::new(1.0, 1.0), 300).await;
        assert_eq!(
            verdicts,
            vec![
                StuckVerdict::Escape(1),
                StuckVerdict::Escape(2),
                StuckVerdict::Exhausted(3)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_is_not_stuck() {
        let mut detector = StuckDetector::default();
        for i in 0..200 {
            let pos = Point2::new(i as f64 * 0.5, 0.0);
            assert!(detector.observe(pos, Duration::ZERO).is_none());
            tokio::time::advance(Duration::from_millis(100)).await;
        }
        assert_eq!(detector.detections(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extra_delay_spaces_samples() {
        let mut detector = StuckDetector::default();
        detector.observe(Point2::new(1.0, 1.0), Duration::from_secs(1));
        tokio::time::advance(Duration::from_millis(1500)).await;
        detector.observe(Point2::new(1.0, 1.0), Duration::from_secs(1));
        assert_eq!(detector.sample_count(), 1);
        tokio::time::advance(Duration::from_millis(600)).await;
        detector.observe(Point2::new(1.0, 1.0), Duration::from_secs(1));
        assert_eq!(detector.sample_count(), 2);
    }

    #[test]
    fn test_reset_clears_detections() {
        let mut detector = StuckDetector::default();
        detector.detections = 2;
        detector.reset();
        assert_eq!(detector.detections(), 0);
    }
}
