// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Navigation state owned by the control loop.

pub mod estimator;
pub mod stuck;

pub use estimator::{EstimatorSettings, PositionBelief, PositionEstimator};
pub use stuck::{StuckDetector, StuckSettings, StuckVerdict};
