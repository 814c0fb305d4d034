// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

pub mod actuator;
pub mod context;
pub mod controller;
pub mod geometry;
pub mod handler;
pub mod nav;
pub mod outcome;
pub mod route;
pub mod sensor;

pub type DynResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

pub use actuator::{
    Actuator, ActuatorCommand, ActuatorError, ActuatorMode, ActuatorResult, AxisId,
    LogicalAction, Phase,
};
pub use context::{CancelHandle, RunContext};
pub use geometry::Point2;
pub use handler::{ActionHandler, HandlerError, HandlerPhase};
pub use outcome::{Failure, Interrupt, PhaseResult, RetryClassification, RunStatus};
pub use route::{MoveMode, Route, Segment, Waypoint, WaypointKind};
pub use sensor::{Frame, MotionStatus, Sensor, SensorReading, UiState};
