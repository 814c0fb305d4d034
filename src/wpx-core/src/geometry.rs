// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Planar geometry helpers for map coordinates and headings.
//!
//! Headings are expressed in degrees, measured counter-clockwise from the
//! positive X axis, in the range `[0, 360)`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A point on the 2D map plane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub const ZERO: Point2 = Point2 { x: 0.0, y: 0.0 };

    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// A `(0, 0)` point is what the recognizer reports when nothing matched.
    pub fn is_degenerate(&self) -> bool {
        self.x == 0.0 && self.y == 0.0
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    /// Euclidean distance to another point.
    pub fn distance(&self, other: &Point2) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    /// Sum of absolute axis deltas.
    pub fn manhattan(&self, other: &Point2) -> f64 {
        (self.x - other.x).abs() + (self.y - other.y).abs()
    }

    /// Heading (degrees, `[0, 360)`) pointing from `self` towards `target`.
    pub fn bearing_to(&self, target: &Point2) -> f64 {
        let deg = (target.y - self.y).atan2(target.x - self.x).to_degrees();
        wrap_degrees(deg)
    }

    /// Move `distance` units along `heading_deg`.
    pub fn advance(&self, heading_deg: f64, distance: f64) -> Point2 {
        let rad = heading_deg.to_radians();
        Point2 {
            x: self.x + rad.cos() * distance,
            y: self.y + rad.sin() * distance,
        }
    }
}

impl fmt::Display for Point2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.1}, {:.1})", self.x, self.y)
    }
}

/// Wrap any angle into `[0, 360)`.
pub fn wrap_degrees(deg: f64) -> f64 {
    let wrapped = deg.rem_euclid(360.0);
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Shortest signed difference `target - current`, normalized to `[-180, 180]`.
pub fn angle_diff(target: f64, current: f64) -> f64 {
    let mut diff = target - current;
    while diff > 180.0 {
        diff -= 360.0;
    }
    while diff < -180.0 {
        diff += 360.0;
    }
    diff
}
