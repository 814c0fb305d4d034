// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Closed-loop camera heading control.
//!
//! [`HeadingController::approach`] issues a single steering command per call
//! and never waits. [`HeadingController::wait_until_rotated`] wraps it in a
//! bounded poll loop.

use std::sync::Arc;

use tracing::{debug, warn};

use wpx_core::actuator::{ActuatorMode, ActuatorResult, AxisId};
use wpx_core::context::RunContext;
use wpx_core::controller::{PollPhase, PollingPolicy};
use wpx_core::geometry::angle_diff;
use wpx_core::outcome::{Interrupt, PhaseResult};
use wpx_core::sensor::{Frame, Sensor};

use crate::config::HeadingConfig;
use crate::router::{actuation_interrupt, ActuatorRouter};

/// Look stick deflection for an absolute heading error, strongest first.
const STICK_TABLE: [(f64, i32); 3] = [(90.0, 28000), (45.0, 22000), (20.0, 16000)];
const STICK_FINE: i32 = 10000;

/// Pointer gain for an absolute heading error, strongest first.
const POINTER_TABLE: [(f64, f64); 3] = [(90.0, 4.0), (30.0, 3.0), (5.0, 2.0)];
const POINTER_FINE: f64 = 1.0;

/// Signed look stick value for `diff`; zero inside the deadzone.
///
/// Positive values look right, which lowers the heading.
pub fn stick_deflection(diff: f64, deadzone_deg: f64) -> i32 {
    let magnitude = diff.abs();
    if magnitude < deadzone_deg {
        return 0;
    }
    let strength = STICK_TABLE
        .iter()
        .find(|(above, _)| magnitude > *above)
        .map(|(_, value)| *value)
        .unwrap_or(STICK_FINE);
    if diff > 0.0 {
        -strength
    } else {
        strength
    }
}

/// Horizontal pointer delta for `diff`.
pub fn pointer_delta(diff: f64, dpi_scale: f64) -> i32 {
    let magnitude = diff.abs();
    let ratio = POINTER_TABLE
        .iter()
        .find(|(above, _)| magnitude > *above)
        .map(|(_, ratio)| *ratio)
        .unwrap_or(POINTER_FINE);
    (-ratio * diff * dpi_scale).round() as i32
}

pub struct HeadingController {
    router: Arc<ActuatorRouter>,
    sensor: Arc<dyn Sensor>,
    polling: Arc<dyn PollingPolicy>,
    config: HeadingConfig,
}

impl HeadingController {
    pub fn new(
        router: Arc<ActuatorRouter>,
        sensor: Arc<dyn Sensor>,
        polling: Arc<dyn PollingPolicy>,
        config: HeadingConfig,
    ) -> Self {
        Self {
            router,
            sensor,
            polling,
            config,
        }
    }

    /// Steer one step towards `target` and return the residual error seen in
    /// `frame`, in `[-180, 180]`.
    pub async fn approach(&self, target: f64, frame: &Frame) -> ActuatorResult<f64> {
        let current = self.sensor.heading(frame);
        let diff = angle_diff(target, current);
        let mode = self.router.mode().await?;

        if diff.abs() < self.config.tolerance_deg {
            let axis = match mode {
                ActuatorMode::Gamepad => AxisId::RightStickX,
                ActuatorMode::KeyboardMouse => AxisId::PointerX,
            };
            self.router.set_axis(axis, 0).await?;
            return Ok(diff);
        }

        match mode {
            ActuatorMode::Gamepad => {
                let value = stick_deflection(diff, self.config.gamepad_deadzone_deg);
                self.router.set_axis(AxisId::RightStickX, value).await?;
            }
            ActuatorMode::KeyboardMouse => {
                let dx = pointer_delta(diff, self.config.dpi_scale);
                self.router.set_axis(AxisId::PointerX, dx).await?;
            }
        }
        Ok(diff)
    }

    /// Rotate until the residual is below `max_diff` or the attempt budget
    /// runs out. Returns whether the heading was reached.
    pub async fn wait_until_rotated(
        &self,
        ctx: &RunContext,
        target: f64,
        max_diff: f64,
    ) -> PhaseResult<bool> {
        let result = self.rotate_loop(ctx, target, max_diff).await;
        if self.router.current_mode().await == Some(ActuatorMode::Gamepad) {
            if let Err(e) = self.router.set_axis(AxisId::RightStickX, 0).await {
                debug!("Look stick release failed: {}", e);
            }
        }
        result
    }

    async fn rotate_loop(&self, ctx: &RunContext, target: f64, max_diff: f64) -> PhaseResult<bool> {
        let mut attempts = 0u32;
        loop {
            ctx.check()?;
            let frame = self
                .sensor
                .capture()
                .map_err(|e| Interrupt::retry_free(format!("screen capture failed: {}", e)))?;
            let residual = self
                .approach(target, &frame)
                .await
                .map_err(actuation_interrupt)?;
            if residual.abs() < self.effective_tolerance(max_diff).await {
                return Ok(true);
            }
            if attempts > self.config.max_attempts {
                warn!(
                    "Rotation to {:.1} timed out, residual {:.1}",
                    target, residual
                );
                return Ok(false);
            }
            ctx.sleep(self.polling.interval(PollPhase::Rotate)).await?;
            attempts += 1;
        }
    }

    /// The gamepad releases its stick inside the deadzone, so it cannot do
    /// better than that.
    async fn effective_tolerance(&self, max_diff: f64) -> f64 {
        match self.router.current_mode().await {
            Some(ActuatorMode::Gamepad) => max_diff.max(self.config.gamepad_deadzone_deg),
            _ => max_diff,
        }
    }
}
