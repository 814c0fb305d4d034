// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Visual feedback contract.
//!
//! Recognition itself is a black box: the engine captures a [`Frame`] and
//! asks the sensor what it sees in it.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::time::Instant;

use crate::geometry::Point2;
use crate::DynResult;

/// An opaque captured image. Only the sensor that produced it knows how to
/// read its payload.
#[derive(Clone)]
pub struct Frame {
    pub seq: u64,
    pub captured_at: Instant,
    payload: Option<Arc<dyn Any + Send + Sync>>,
}

impl Frame {
    pub fn new(seq: u64) -> Self {
        Self {
            seq,
            captured_at: Instant::now(),
            payload: None,
        }
    }

    pub fn with_payload<T: Any + Send + Sync>(mut self, payload: T) -> Self {
        self.payload = Some(Arc::new(payload));
        self
    }

    pub fn payload<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.payload.as_deref().and_then(|p| p.downcast_ref::<T>())
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("seq", &self.seq)
            .field("captured_at", &self.captured_at)
            .field("has_payload", &self.payload.is_some())
            .finish()
    }
}

/// Raw position read from a frame. `(0, 0)` means nothing was matched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SensorReading {
    pub position: Point2,
}

impl SensorReading {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            position: Point2::new(x, y),
        }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_detected(&self) -> bool {
        !self.position.is_degenerate() && self.position.is_finite()
    }
}

/// Which screen the agent currently sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UiState {
    /// Normal in-world view.
    Main,
    /// A page that can be closed with the menu key.
    ClosablePage,
    /// The big map, which is also closable but left alone on purpose.
    BigMap,
    /// A dialogue or cut-scene line.
    Dialogue,
    Unknown,
}

impl UiState {
    pub fn is_main(&self) -> bool {
        matches!(self, Self::Main)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum MotionStatus {
    #[default]
    Unknown,
    Normal,
    Flying,
    Climbing,
}

/// Recognition primitives consumed by the engine.
pub trait Sensor: Send + Sync {
    /// Grab the current screen.
    fn capture(&self) -> DynResult<Frame>;

    /// Raw map position seen in the frame.
    fn sense(&self, frame: &Frame) -> SensorReading;

    /// Current camera heading in degrees, `[0, 360)`.
    fn heading(&self, frame: &Frame) -> f64;

    fn ui_state(&self, frame: &Frame) -> UiState;

    fn motion(&self, _frame: &Frame) -> MotionStatus {
        MotionStatus::Unknown
    }

    /// Whole-map re-localisation, used when local matching is unreliable.
    fn relocate(&self, _frame: &Frame) -> Option<Point2> {
        None
    }
}

/// Predicate over frames that ends the route early when it holds.
pub type EndCondition = Arc<dyn Fn(&Frame) -> bool + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Snapshot {
        x: f64,
    }

    #[test]
    fn test_frame_payload_downcast() {
        let frame = Frame::new(7).with_payload(Snapshot { x: 1.5 });
        assert_eq!(frame.seq, 7);
        assert_eq!(frame.payload::<Snapshot>(), Some(&Snapshot { x: 1.5 }));
        assert!(frame.payload::<String>().is_none());
        assert!(Frame::new(1).payload::<Snapshot>().is_none());
    }

    #[test]
    fn test_reading_detection() {
        assert!(!SensorReading::none().is_detected());
        assert!(SensorReading::new(3.0, 0.0).is_detected());
        assert!(!SensorReading::new(f64::NAN, 2.0).is_detected());
    }
}
