// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Run event notification system.
//!
//! Lets front ends and tests observe a route run without reaching into the
//! control loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::geometry::Point2;
use crate::outcome::{Failure, RunStatus};

use super::machine::SegmentState;

/// Unique identifier for a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Trait for components that want to receive run events.
///
/// All methods have default no-op implementations, so listeners can
/// selectively override only the events they care about.
pub trait RunListener: Send + Sync {
    fn on_state_change(&self, _old: &SegmentState, _new: &SegmentState) {}

    /// A segment attempt is starting. `attempt` counts budgeted attempts from 1.
    fn on_segment_start(&self, _segment: usize, _attempt: u32) {}

    /// A segment attempt failed and will be run again.
    fn on_segment_retry(&self, _segment: usize, _failure: &Failure) {}

    fn on_waypoint_reached(&self, _segment: usize, _waypoint: usize, _position: Option<Point2>) {}

    fn on_stuck(&self, _segment: usize, _waypoint: usize, _detections: u32) {}

    fn on_run_finished(&self, _status: &RunStatus) {}
}

/// Manages registered listeners and dispatches events.
#[derive(Default)]
pub struct RunEventEmitter {
    listeners: Vec<(ListenerId, Arc<dyn RunListener>)>,
}

impl RunEventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener to receive events.
    /// Returns an ID that can be used to unregister the listener.
    pub fn register(&mut self, listener: Arc<dyn RunListener>) -> ListenerId {
        let id = ListenerId::new();
        self.listeners.push((id, listener));
        id
    }

    pub fn unregister(&mut self, id: ListenerId) {
        self.listeners.retain(|(lid, _)| *lid != id);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn notify_state_change(&self, old: &SegmentState, new: &SegmentState) {
        for (_, listener) in &self.listeners {
            listener.on_state_change(old, new);
        }
    }

    pub fn notify_segment_start(&self, segment: usize, attempt: u32) {
        for (_, listener) in &self.listeners {
            listener.on_segment_start(segment, attempt);
        }
    }

    pub fn notify_segment_retry(&self, segment: usize, failure: &Failure) {
        for (_, listener) in &self.listeners {
            listener.on_segment_retry(segment, failure);
        }
    }

    pub fn notify_waypoint_reached(&self, segment: usize, waypoint: usize, position: Option<Point2>) {
        for (_, listener) in &self.listeners {
            listener.on_waypoint_reached(segment, waypoint, position);
        }
    }

    pub fn notify_stuck(&self, segment: usize, waypoint: usize, detections: u32) {
        for (_, listener) in &self.listeners {
            listener.on_stuck(segment, waypoint, detections);
        }
    }

    pub fn notify_run_finished(&self, status: &RunStatus) {
        for (_, listener) in &self.listeners {
            listener.on_run_finished(status);
        }
    }
}
