// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Position estimation from noisy map-matching readings.
//!
//! Raw readings jitter and occasionally match the wrong part of the map. The
//! estimator only moves its reported position once a reading is either
//! confirmed by several close neighbours or is a plausible step away from
//! the last stable point. Far jumps are treated as misreads.

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::geometry::Point2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorSettings {
    /// Close readings needed before the stable point is promoted.
    pub stable_count: u32,
    /// Readings closer than this to the stable point count as the same place.
    pub stable_distance: f64,
    /// Readings further than this from the stable point are misreads.
    pub large_jump: f64,
    /// How long a reported position may be served without a fresh read.
    pub cache_ttl_ms: u64,
    /// Size of the raw reading ring.
    pub history_len: usize,
}

impl Default for EstimatorSettings {
    fn default() -> Self {
        Self {
            stable_count: 5,
            stable_distance: 1.5,
            large_jump: 10.0,
            cache_ttl_ms: 900,
            history_len: 16,
        }
    }
}

impl EstimatorSettings {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }
}

/// The estimator's current view of where the agent is.
#[derive(Debug, Clone, Default)]
pub struct PositionBelief {
    /// Last position handed out to callers.
    pub reported: Option<Point2>,
    /// Anchor that close readings are compared against.
    pub stable: Option<Point2>,
    pub stable_hits: u32,
    pub updated_at: Option<Instant>,
    /// Recent raw, non-degenerate readings, newest last.
    pub history: VecDeque<Point2>,
}

#[derive(Debug, Clone)]
pub struct PositionEstimator {
    settings: EstimatorSettings,
    belief: PositionBelief,
}

impl Default for PositionEstimator {
    fn default() -> Self {
        Self::new(EstimatorSettings::default())
    }
}

impl PositionEstimator {
    pub fn new(settings: EstimatorSettings) -> Self {
        Self {
            settings,
            belief: PositionBelief::default(),
        }
    }

    pub fn settings(&self) -> &EstimatorSettings {
        &self.settings
    }

    pub fn belief(&self) -> &PositionBelief {
        &self.belief
    }

    pub fn position(&self) -> Option<Point2> {
        self.belief.reported
    }

    /// Feed one raw reading and get the position to act on.
    ///
    /// `expected_distance` is how far the agent may legitimately have moved
    /// since the last read; it widens the jump rejection radius.
    ///
    /// Returns `None` for a degenerate reading, leaving the belief untouched.
    pub fn update(&mut self, reading: Point2, expected_distance: f64) -> Option<Point2> {
        if reading.is_degenerate() || !reading.is_finite() {
            return None;
        }

        let now = Instant::now();
        self.push_history(reading);
        let jump_limit = self.settings.large_jump.max(expected_distance);

        let Some(stable) = self.belief.stable else {
            self.anchor(reading);
            return Some(self.report(reading, now));
        };

        let distance = stable.distance(&reading);
        if distance < self.settings.stable_distance {
            self.belief.stable_hits += 1;
            if self.belief.stable_hits >= self.settings.stable_count {
                // Promote once per satisfied window.
                self.anchor(reading);
                return Some(self.report(reading, now));
            }
            return Some(self.report(stable, now));
        }

        if distance > jump_limit {
            let kept = self.belief.reported.unwrap_or(stable);
            if self.is_stale(now) {
                // Nothing accepted for a while; start tracking the new area
                // but keep serving the old fix for this call.
                debug!(
                    "Re-anchoring after stale belief: {} -> {} ({:.1})",
                    stable, reading, distance
                );
                self.anchor(reading);
            } else {
                warn!(
                    "Position jump too large ({:.1} > {:.1}), keeping {}",
                    distance, jump_limit, kept
                );
            }
            return Some(kept);
        }

        self.anchor(reading);
        Some(self.report(reading, now))
    }

    /// Last reported position, if it is younger than the cache TTL.
    pub fn cached(&self) -> Option<Point2> {
        let updated_at = self.belief.updated_at?;
        if updated_at.elapsed() < self.settings.cache_ttl() {
            self.belief.reported
        } else {
            None
        }
    }

    /// Forget everything, e.g. after a teleport.
    pub fn reset(&mut self) {
        self.belief = PositionBelief::default();
    }

    /// Trust `point` as the current position.
    pub fn seed(&mut self, point: Point2) {
        self.belief.stable = Some(point);
        self.belief.stable_hits = self.settings.stable_count;
        self.belief.reported = Some(point);
        self.belief.updated_at = Some(Instant::now());
    }

    fn anchor(&mut self, point: Point2) {
        self.belief.stable = Some(point);
        self.belief.stable_hits = 1;
    }

    fn report(&mut self, point: Point2, now: Instant) -> Point2 {
        self.belief.reported = Some(point);
        self.belief.updated_at = Some(now);
        point
    }

    fn is_stale(&self, now: Instant) -> bool {
        self.belief
            .updated_at
            .map(|t| now.duration_since(t) >= self.settings.cache_ttl())
            .unwrap_or(true)
    }

    fn push_history(&mut self, reading: Point2) {
        if self.settings.history_len == 0 {
            return;
        }
        while self.belief.history.len() >= self.settings.history_len {
            self.belief.history.pop_front();
        }
        self.belief.history.push_back(reading);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(x: f64, y: f64) -> Point2 {
        Point2::new(x, y)
    }

    #[test]
    fn test_first_reading_accepted() {
        let mut est = PositionEstimator::default();
        assert_eq!(est.update(p(10.0, 10.0), 0.0), Some(p(10.0, 10.0)));
        assert_eq!(est.belief().stable_hits, 1);
    }

    #[test]
    fn test_degenerate_reading_ignored() {
        let mut est = PositionEstimator::default();
        assert_eq!(est.update(Point2::ZERO, 0.0), None);
        assert!(est.position().is_none());
        assert!(est.belief().history.is_empty());

        est.update(p(10.0, 10.0), 0.0);
        assert_eq!(est.update(Point2::ZERO, 0.0), None);
        assert_eq!(est.position(), Some(p(10.0, 10.0)));
        assert_eq!(est.belief().history.len(), 1);
    }

    #[test]
    fn test_close_readings_promote_once_per_window() {
        let mut est = PositionEstimator::default();
        est.update(p(10.0, 10.0), 0.0);

        // Four more close readings: the fourth completes the window of five.
        for i in 1..=3 {
            let out = est.update(p(10.0 + 0.1 * i as f64, 10.0), 0.0);
            assert_eq!(out, Some(p(10.0, 10.0)));
        }
        assert_eq!(est.update(p(10.4, 10.0), 0.0), Some(p(10.4, 10.0)));

        // The next window starts over from the promoted point.
        for i in 1..=3 {
            let out = est.update(p(10.4 + 0.1 * i as f64, 10.0), 0.0);
            assert_eq!(out, Some(p(10.4, 10.0)));
        }
        assert_eq!(est.update(p(10.8, 10.0), 0.0), Some(p(10.8, 10.0)));
    }

    #[test]
    fn test_large_jump_never_reported_next() {
        let mut est = PositionEstimator::default();
        est.update(p(10.0, 10.0), 0.0);
        let out = est.update(p(60.0, 10.0), 0.0);
        assert_eq!(out, Some(p(10.0, 10.0)));
        assert_eq!(est.belief().stable, Some(p(10.0, 10.0)));
    }

    #[test]
    fn test_expected_distance_widens_jump_limit() {
        let mut est = PositionEstimator::default();
        est.update(p(10.0, 10.0), 0.0);
        assert_eq!(est.update(p(30.0, 10.0), 25.0), Some(p(30.0, 10.0)));
    }

    #[test]
    fn test_moderate_step_tracks_new_candidate() {
        let mut est = PositionEstimator::default();
        est.update(p(10.0, 10.0), 0.0);
        est.update(p(10.5, 10.0), 0.0);
        assert_eq!(est.update(p(14.0, 10.0), 0.0), Some(p(14.0, 10.0)));
        assert_eq!(est.belief().stable_hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_expires_after_ttl() {
        let mut est = PositionEstimator::default();
        est.update(p(5.0, 5.0), 0.0);
        assert_eq!(est.cached(), Some(p(5.0, 5.0)));
        tokio::time::advance(Duration::from_millis(899)).await;
        assert_eq!(est.cached(), Some(p(5.0, 5.0)));
        tokio::time::advance(Duration::from_millis(2)).await;
        assert_eq!(est.cached(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_belief_reanchors_after_jump() {
        let mut est = PositionEstimator::default();
        est.update(p(10.0, 10.0), 0.0);
        tokio::time::advance(Duration::from_secs(2)).await;

        // Still rejected on this call, but becomes the new anchor.
        assert_eq!(est.update(p(80.0, 10.0), 0.0), Some(p(10.0, 10.0)));
        assert_eq!(est.belief().stable, Some(p(80.0, 10.0)));
        assert_eq!(est.update(p(83.0, 10.0), 0.0), Some(p(83.0, 10.0)));
    }

    #[test]
    fn test_seed_and_reset() {
        let mut est = PositionEstimator::default();
        est.seed(p(100.0, 50.0));
        assert_eq!(est.position(), Some(p(100.0, 50.0)));
        assert_eq!(est.belief().stable_hits, 5);
        // Saturated counter promotes the very next close reading.
        assert_eq!(est.update(p(100.5, 50.0), 0.0), Some(p(100.5, 50.0)));

        est.reset();
        assert!(est.position().is_none());
        assert!(est.cached().is_none());
        assert!(est.belief().history.is_empty());
    }

    #[test]
    fn test_history_is_bounded() {
        let mut est = PositionEstimator::new(EstimatorSettings {
            history_len: 3,
            ..Default::default()
        });
        for i in 1..=5 {
            est.update(p(i as f64, 1.0), 0.0);
        }
        let history: Vec<Point2> = est.belief().history.iter().copied().collect();
        assert_eq!(history, vec![p(3.0, 1.0), p(4.0, 1.0), p(5.0, 1.0)]);
    }
}
