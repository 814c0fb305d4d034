// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Best-effort recovery from UI states that block movement.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use wpx_core::actuator::LogicalAction;
use wpx_core::context::RunContext;
use wpx_core::outcome::PhaseResult;
use wpx_core::sensor::{Frame, Sensor, UiState};

use crate::config::AnomalyConfig;
use crate::router::ActuatorRouter;

pub struct AnomalyResolver {
    router: Arc<ActuatorRouter>,
    sensor: Arc<dyn Sensor>,
    config: AnomalyConfig,
}

impl AnomalyResolver {
    pub fn new(router: Arc<ActuatorRouter>, sensor: Arc<dyn Sensor>, config: AnomalyConfig) -> Self {
        Self {
            router,
            sensor,
            config,
        }
    }

    /// Probe `frame` (or a fresh capture) and dismiss whatever is blocking.
    ///
    /// Only cancellation escapes; capture and actuation problems are logged
    /// and leave the screen as it is.
    pub async fn resolve(&self, ctx: &RunContext, frame: Option<&Frame>) -> PhaseResult<UiState> {
        ctx.check()?;
        let captured;
        let frame = match frame {
            Some(frame) => frame,
            None => match self.sensor.capture() {
                Ok(f) => {
                    captured = f;
                    &captured
                }
                Err(e) => {
                    debug!("Anomaly probe capture failed: {}", e);
                    return Ok(UiState::Unknown);
                }
            },
        };

        let state = self.sensor.ui_state(frame);
        match state {
            UiState::Main | UiState::Unknown => {}
            UiState::BigMap => debug!("Big map is open, leaving it alone"),
            UiState::ClosablePage => {
                info!("Blocking page detected, closing it");
                if let Err(e) = self.router.press(LogicalAction::OpenMenu).await {
                    warn!("Failed to close page: {}", e);
                }
                ctx.sleep_ms(self.config.dismiss_delay_ms).await?;
            }
            UiState::Dialogue => {
                if self.config.auto_skip {
                    self.auto_skip(ctx).await?;
                }
            }
        }
        Ok(state)
    }

    /// Advance a dialogue until it has been gone for a while.
    async fn auto_skip(&self, ctx: &RunContext) -> PhaseResult {
        info!("Dialogue detected, skipping");
        let poll = Duration::from_millis(self.config.auto_skip_poll_ms);
        let mut idle_frames = 0u32;
        for _ in 0..self.config.auto_skip_max_iterations {
            ctx.check()?;
            let in_dialogue = match self.sensor.capture() {
                Ok(frame) => self.sensor.ui_state(&frame) == UiState::Dialogue,
                Err(e) => {
                    debug!("Auto-skip capture failed: {}", e);
                    false
                }
            };
            if in_dialogue {
                idle_frames = 0;
                if let Err(e) = self.router.press(LogicalAction::PickUpOrInteract).await {
                    warn!("Failed to advance dialogue: {}", e);
                }
            } else {
                idle_frames += 1;
                if idle_frames > self.config.auto_skip_idle_frames {
                    info!("Dialogue finished");
                    return Ok(());
                }
            }
            ctx.sleep(poll).await?;
        }
        warn!(
            "Dialogue auto-skip gave up after {} iterations",
            self.config.auto_skip_max_iterations
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, SimulationConfig};
    use crate::sim::SimWorld;
    use wpx_actuator::{BuiltinDevices, GamepadBindings, RegistrationContext};

    fn setup(ui: UiState, config: AnomalyConfig) -> (Arc<SimWorld>, AnomalyResolver) {
        let world = Arc::new(SimWorld::new(SimulationConfig::default()));
        world.set_ui(ui, 3);
        let engine = EngineConfig::default();
        let mut registry = RegistrationContext::new();
        wpx_actuator::register_builtin_actuators_on(
            &mut registry,
            BuiltinDevices {
                input_sink: world.clone(),
                kbm: engine.actuator.kbm_settings(),
                pad_bus: Some(world.clone()),
                gamepad: engine.actuator.gamepad_settings(),
                gamepad_bindings: GamepadBindings::default(),
            },
        );
        let router = Arc::new(ActuatorRouter::new(registry, Duration::from_secs(5)));
        let resolver = AnomalyResolver::new(router, world.clone(), config);
        (world, resolver)
    }

    #[tokio::test(start_paused = true)]
    async fn test_closes_blocking_page() {
        let (world, resolver) = setup(UiState::ClosablePage, AnomalyConfig::default());
        let (_cancel, ctx) = RunContext::new();
        let seen = resolver.resolve(&ctx, None).await.unwrap();
        assert_eq!(seen, UiState::ClosablePage);
        assert_eq!(world.ui(), UiState::Main);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leaves_big_map_open() {
        let (world, resolver) = setup(UiState::BigMap, AnomalyConfig::default());
        let (_cancel, ctx) = RunContext::new();
        resolver.resolve(&ctx, None).await.unwrap();
        assert_eq!(world.ui(), UiState::BigMap);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_skips_dialogue() {
        let (world, resolver) = setup(UiState::Dialogue, AnomalyConfig::default());
        let (_cancel, ctx) = RunContext::new();
        resolver.resolve(&ctx, None).await.unwrap();
        assert_eq!(world.ui(), UiState::Main);
        assert_eq!(world.interactions(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dialogue_left_alone_when_auto_skip_disabled() {
        let config = AnomalyConfig {
            auto_skip: false,
            ..AnomalyConfig::default()
        };
        let (world, resolver) = setup(UiState::Dialogue, config);
        let (_cancel, ctx) = RunContext::new();
        resolver.resolve(&ctx, None).await.unwrap();
        assert_eq!(world.ui(), UiState::Dialogue);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_escapes_recovery() {
        let (_world, resolver) = setup(UiState::Dialogue, AnomalyConfig::default());
        let (cancel, ctx) = RunContext::new();
        cancel.cancel();
        let err = resolver.resolve(&ctx, None).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
