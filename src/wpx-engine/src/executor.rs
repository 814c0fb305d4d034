// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Per-segment waypoint execution.
//!
//! [`WaypointExecutor`] walks the waypoints of one segment in order: face or
//! approach each node, close in on targets, and run the action handlers
//! around them. Every failure leaves as an [`Interrupt`] whose
//! classification tells the route runner what to do next.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use wpx_core::actuator::LogicalAction;
use wpx_core::context::RunContext;
use wpx_core::controller::{
    PhasePolling, PollPhase, PollingPolicy, RunEventEmitter, SegmentEvent, SegmentMachine,
    SegmentState,
};
use wpx_core::geometry::{wrap_degrees, Point2};
use wpx_core::handler::HandlerPhase;
use wpx_core::nav::{PositionEstimator, StuckDetector, StuckVerdict};
use wpx_core::outcome::{Interrupt, PhaseResult};
use wpx_core::route::{MisidentificationHandling, MisidentificationKind, MoveMode, Segment, Waypoint};
use wpx_core::sensor::{EndCondition, Frame, MotionStatus, Sensor, UiState};

use crate::anomaly::AnomalyResolver;
use crate::config::{EngineConfig, NavigationConfig};
use crate::handlers::HandlerRegistry;
use crate::heading::HeadingController;
use crate::router::{actuation_interrupt, ActuatorRouter};

/// Warn about a persisting too-far reading every this many ticks.
const FAR_WARN_EVERY: u32 = 5;
/// Added to the stuck sample interval after a whole-map relocation.
const RELOCATE_EXTRA_DELAY: Duration = Duration::from_millis(1000);

/// One sensor read, filtered through the misidentification rules and the
/// position estimator.
struct Fix {
    frame: Frame,
    position: Option<Point2>,
    extra_delay: Duration,
}

pub struct WaypointExecutor {
    router: Arc<ActuatorRouter>,
    sensor: Arc<dyn Sensor>,
    heading: HeadingController,
    anomaly: AnomalyResolver,
    handlers: Arc<HandlerRegistry>,
    events: Arc<RunEventEmitter>,
    polling: Arc<dyn PollingPolicy>,
    nav: NavigationConfig,
    estimator: PositionEstimator,
    stuck: StuckDetector,
    machine: SegmentMachine,
    end_condition: Option<EndCondition>,
    segment: usize,
    /// Last real fix, substituted for tolerated misreads.
    last_detected: Option<Point2>,
    /// Last fix that was not implausibly far from the waypoint.
    last_near: Option<Point2>,
    last_read_at: Option<Instant>,
}

impl WaypointExecutor {
    pub fn new(
        router: Arc<ActuatorRouter>,
        sensor: Arc<dyn Sensor>,
        handlers: Arc<HandlerRegistry>,
        events: Arc<RunEventEmitter>,
        config: &EngineConfig,
    ) -> Self {
        let nav = config.navigation;
        let polling: Arc<dyn PollingPolicy> = Arc::new(PhasePolling::new(
            nav.tick_interval(),
            Duration::from_millis(config.heading.poll_interval_ms),
            Duration::from_millis(nav.close_step_interval_ms),
        ));
        let heading = HeadingController::new(
            router.clone(),
            sensor.clone(),
            polling.clone(),
            config.heading,
        );
        let anomaly = AnomalyResolver::new(router.clone(), sensor.clone(), config.anomaly);
        Self {
            router,
            sensor,
            heading,
            anomaly,
            handlers,
            events,
            polling,
            nav,
            estimator: PositionEstimator::new(config.estimator),
            stuck: StuckDetector::new(config.stuck),
            machine: SegmentMachine::new(),
            end_condition: None,
            segment: 0,
            last_detected: None,
            last_near: None,
            last_read_at: None,
        }
    }

    /// End the run as soon as a captured frame satisfies `condition`.
    pub fn with_end_condition(mut self, condition: EndCondition) -> Self {
        self.end_condition = Some(condition);
        self
    }

    pub fn state(&self) -> &SegmentState {
        self.machine.state()
    }

    pub fn position(&self) -> Option<Point2> {
        self.estimator.position()
    }

    fn transition(&mut self, event: SegmentEvent) {
        let old = self.machine.state().clone();
        if self.machine.process_event(event) {
            debug!("Segment state {} -> {}", old, self.machine.state());
            self.events.notify_state_change(&old, self.machine.state());
        }
    }

    /// Run one attempt of `segment` from its first waypoint.
    pub async fn run_segment(&mut self, ctx: &RunContext, segment: &Segment) -> PhaseResult {
        self.segment = segment.index;
        self.transition(SegmentEvent::Restart);
        self.stuck.reset();
        self.last_read_at = None;

        let result = self.run_waypoints(ctx, segment).await;
        match &result {
            Ok(()) => self.transition(SegmentEvent::SegmentDone(segment.index)),
            Err(e) if e.is_cancelled() => self.transition(SegmentEvent::Cancel),
            Err(Interrupt::Finished(_)) => {}
            Err(e) => self.transition(SegmentEvent::Fail(e.to_string())),
        }
        result
    }

    async fn run_waypoints(&mut self, ctx: &RunContext, segment: &Segment) -> PhaseResult {
        self.resolve_anomalies(ctx, None).await?;
        if !segment.starts_with_teleport() {
            if let Some(first) = segment.waypoints.first() {
                self.estimator.seed(first.point());
                self.last_detected = Some(first.point());
            }
        }

        for (index, waypoint) in segment.waypoints.iter().enumerate() {
            info!(
                "Segment {} waypoint {}/{}: {}",
                segment.index,
                index + 1,
                segment.len(),
                waypoint
            );
            self.run_waypoint(ctx, index, waypoint)
                .await
                .map_err(|e| e.at(segment.index, index))?;
            self.events
                .notify_waypoint_reached(segment.index, index, self.estimator.position());
        }
        Ok(())
    }

    async fn run_waypoint(
        &mut self,
        ctx: &RunContext,
        index: usize,
        waypoint: &Waypoint,
    ) -> PhaseResult {
        ctx.check()?;
        if waypoint.is_teleport() {
            if self.segment > 0 {
                ctx.sleep_ms(self.nav.teleport_delay_ms).await?;
            }
            self.transition(SegmentEvent::RunAction(index));
            return self.teleport(ctx, waypoint).await;
        }

        self.run_handler(ctx, HandlerPhase::Before, waypoint).await?;
        if waypoint.is_orientation_only() {
            self.transition(SegmentEvent::Orient(index));
            self.face_to(ctx, waypoint).await?;
        } else {
            self.transition(SegmentEvent::Approach(index));
            self.move_to(ctx, index, waypoint).await?;
        }

        self.run_handler(ctx, HandlerPhase::BeforeCloseApproach, waypoint)
            .await?;
        if waypoint.needs_close_approach() {
            self.transition(SegmentEvent::CloseIn);
            self.move_close_to(ctx, waypoint).await?;
        }

        if waypoint.action_tag().is_some() {
            self.transition(SegmentEvent::RunAction(index));
            self.run_handler(ctx, HandlerPhase::After, waypoint).await?;
            ctx.sleep_ms(self.nav.action_settle_ms).await?;
        }
        Ok(())
    }

    async fn run_handler(
        &self,
        ctx: &RunContext,
        phase: HandlerPhase,
        waypoint: &Waypoint,
    ) -> PhaseResult {
        let Some(tag) = waypoint.action_tag() else {
            return Ok(());
        };
        let Some(handler) = self.handlers.get(phase, tag) else {
            if phase == HandlerPhase::After
                && !self.handlers.is_registered(HandlerPhase::Before, tag)
                && !self.handlers.is_registered(HandlerPhase::BeforeCloseApproach, tag)
            {
                warn!("No handler registered for action '{}'", tag);
            }
            return Ok(());
        };
        ctx.check()?;
        debug!("Running {:?} handler '{}'", phase, tag);
        handler
            .run(ctx, waypoint)
            .await
            .map_err(|e| e.into_interrupt(tag))
    }

    async fn teleport(&mut self, ctx: &RunContext, waypoint: &Waypoint) -> PhaseResult {
        match self.handlers.teleport_handler() {
            Some(handler) => handler
                .run(ctx, waypoint)
                .await
                .map_err(|e| e.into_interrupt("teleport"))?,
            None => warn!(
                "No teleport handler registered, assuming the agent is at {}",
                waypoint.point()
            ),
        }
        self.estimator.reset();
        self.estimator.seed(waypoint.point());
        self.last_detected = Some(waypoint.point());
        self.last_near = Some(waypoint.point());
        self.last_read_at = None;
        ctx.sleep_ms(self.nav.teleport_settle_ms).await
    }

    async fn face_to(&mut self, ctx: &RunContext, waypoint: &Waypoint) -> PhaseResult {
        let position = self.position_or_belief(ctx, waypoint).await?;
        let bearing = position.bearing_to(&waypoint.point());
        self.rotate_to(ctx, bearing, self.nav.fine_max_diff).await?;
        ctx.sleep_ms(self.nav.face_settle_ms).await
    }

    async fn move_to(&mut self, ctx: &RunContext, index: usize, waypoint: &Waypoint) -> PhaseResult {
        let nav = self.nav;
        let target = waypoint.point();
        let mode = waypoint.move_mode;

        let start = self.position_or_belief(ctx, waypoint).await?;
        self.rotate_to(ctx, start.bearing_to(&target), nav.orient_max_diff)
            .await?;
        self.hold(LogicalAction::MoveForward).await?;

        self.last_near = Some(start);
        self.stuck.clear_window();

        let mut ticks = 0u32;
        let mut far_ticks = 0u32;
        let mut lost_ticks = 0u32;
        let mut off_course = 0u32;
        let mut sprinting = false;
        let mut last_sprint: Option<Instant> = None;

        loop {
            ticks += 1;
            let fix = self.locate(ctx, waypoint).await?;
            let Some(position) = fix.position else {
                lost_ticks += 1;
                if lost_ticks > nav.sensor_loss_budget {
                    return Err(Interrupt::retry_free(format!(
                        "position lost for {} ticks",
                        lost_ticks
                    )));
                }
                ctx.sleep(self.polling.interval(PollPhase::Approach)).await?;
                continue;
            };
            lost_ticks = 0;

            let distance = position.distance(&target);
            if distance < nav.arrive_distance {
                debug!("Arrived at {} ({:.1} away)", target, distance);
                break;
            }

            if distance > nav.far_distance {
                far_ticks += 1;
                if far_ticks > nav.far_budget {
                    return Err(Interrupt::retry(format!(
                        "target stayed implausibly far for {} ticks",
                        far_ticks
                    ))
                    .near(position, distance));
                }
                if far_ticks % FAR_WARN_EVERY == 0 {
                    warn!(
                        "Target {} is {:.0} away ({}/{})",
                        target, distance, far_ticks, nav.far_budget
                    );
                }
                if far_ticks % nav.far_recovery_every == 0 {
                    self.resolve_anomalies(ctx, Some(&fix.frame)).await?;
                    if let Some(near) = self.last_near {
                        self.estimator.seed(near);
                    }
                    ctx.sleep_ms(nav.far_settle_ms).await?;
                } else {
                    ctx.sleep_ms(nav.far_tick_ms).await?;
                }
                continue;
            }
            self.last_near = Some(position);

            if mode != MoveMode::Climb {
                match self.stuck.observe(position, fix.extra_delay) {
                    Some(StuckVerdict::Exhausted(detections)) => {
                        self.events.notify_stuck(self.segment, index, detections);
                        return Err(Interrupt::fatal(format!(
                            "stuck {} times on the way to {}",
                            detections, target
                        ))
                        .near(position, distance));
                    }
                    Some(StuckVerdict::Escape(detections)) => {
                        self.events.notify_stuck(self.segment, index, detections);
                        warn!(
                            "Stuck at {} ({}), trying to get free",
                            position, detections
                        );
                        self.escape(ctx, position, target, detections).await?;
                        continue;
                    }
                    None => {}
                }
            }

            if !self.router.is_pressed(LogicalAction::MoveForward).await {
                self.hold(LogicalAction::MoveForward).await?;
            }

            let bearing = position.bearing_to(&target);
            let residual = self
                .heading
                .approach(bearing, &fix.frame)
                .await
                .map_err(actuation_interrupt)?;
            if ticks > nav.reorient_after_ticks {
                if residual.abs() > nav.reorient_threshold_deg {
                    off_course += 1;
                } else {
                    off_course = 0;
                }
                if off_course > nav.reorient_streak {
                    debug!("Heading off by {:.1} for {} ticks, re-orienting", residual, off_course);
                    self.rotate_to(ctx, bearing, nav.fine_max_diff).await?;
                    off_course = 0;
                }
            }

            match mode {
                MoveMode::Fly => {
                    if self.sensor.motion(&fix.frame) != MotionStatus::Flying {
                        self.press(LogicalAction::Jump).await?;
                        ctx.sleep_ms(nav.jump_settle_ms).await?;
                    }
                    ctx.sleep_ms(nav.fly_tick_interval_ms).await?;
                    continue;
                }
                MoveMode::Jump => {
                    self.press(LogicalAction::Jump).await?;
                    ctx.sleep_ms(nav.jump_settle_ms).await?;
                    continue;
                }
                MoveMode::Run => {
                    let want = distance > nav.sprint_distance;
                    if want != sprinting {
                        if want {
                            self.hold(LogicalAction::Sprint).await?;
                        } else {
                            self.release(LogicalAction::Sprint).await?;
                        }
                        sprinting = want;
                    }
                }
                MoveMode::Dash => {
                    if distance > nav.sprint_distance
                        && cooled_down(last_sprint, nav.dash_cooldown_ms)
                    {
                        self.press(LogicalAction::Sprint).await?;
                        last_sprint = Some(Instant::now());
                    }
                }
                MoveMode::Walk => {
                    if nav.auto_run
                        && distance > nav.sprint_distance
                        && cooled_down(last_sprint, nav.auto_run_cooldown_ms)
                    {
                        self.press(LogicalAction::Sprint).await?;
                        last_sprint = Some(Instant::now());
                    }
                }
                MoveMode::Climb => {}
            }

            ctx.sleep(self.polling.interval(PollPhase::Approach)).await?;
        }

        if sprinting {
            self.release(LogicalAction::Sprint).await?;
        }
        self.release(LogicalAction::MoveForward).await
    }

    /// Pulse towards a target until within the arrival radius or out of
    /// steps.
    async fn move_close_to(&mut self, ctx: &RunContext, waypoint: &Waypoint) -> PhaseResult {
        let nav = self.nav;
        let target = waypoint.point();
        let mut steps = 0u32;
        loop {
            steps += 1;
            if steps > nav.close_steps {
                debug!("Close approach to {} stopped after {} steps", target, nav.close_steps);
                break;
            }
            let fix = self.locate(ctx, waypoint).await?;
            let Some(position) = fix.position.or_else(|| self.estimator.cached()) else {
                ctx.sleep(self.polling.interval(PollPhase::CloseApproach))
                    .await?;
                continue;
            };
            if position.distance(&target) < nav.arrive_distance {
                break;
            }
            self.rotate_to(ctx, position.bearing_to(&target), nav.fine_max_diff)
                .await?;
            self.hold(LogicalAction::MoveForward).await?;
            ctx.sleep_ms(nav.close_pulse_ms).await?;
            self.release(LogicalAction::MoveForward).await?;
            ctx.sleep(self.polling.interval(PollPhase::CloseApproach))
                .await?;
        }
        self.release(LogicalAction::MoveForward).await?;
        ctx.sleep_ms(nav.close_settle_ms).await
    }

    /// Turn away from the obstacle, hop forward, then aim at the target again.
    /// Odd detections turn left, even ones turn right.
    async fn escape(
        &mut self,
        ctx: &RunContext,
        position: Point2,
        target: Point2,
        detection: u32,
    ) -> PhaseResult {
        let nav = self.nav;
        let bearing = position.bearing_to(&target);
        let side = if detection % 2 == 1 { 1.0 } else { -1.0 };

        self.release(LogicalAction::MoveForward).await?;
        self.rotate_to(ctx, wrap_degrees(bearing + side * nav.escape_turn_deg), nav.orient_max_diff)
            .await?;
        self.press(LogicalAction::Jump).await?;
        self.hold(LogicalAction::MoveForward).await?;
        ctx.sleep_ms(nav.escape_move_ms).await?;
        self.release(LogicalAction::MoveForward).await?;

        self.rotate_to(ctx, bearing, nav.orient_max_diff).await?;
        self.hold(LogicalAction::MoveForward).await?;
        self.stuck.clear_window();
        Ok(())
    }

    /// Rotate, with one anomaly recovery and a second try on failure.
    async fn rotate_to(&mut self, ctx: &RunContext, bearing: f64, max_diff: f64) -> PhaseResult {
        if self.heading.wait_until_rotated(ctx, bearing, max_diff).await? {
            return Ok(());
        }
        self.resolve_anomalies(ctx, None).await?;
        if !self.heading.wait_until_rotated(ctx, bearing, max_diff).await? {
            warn!("Could not face {:.1}, continuing anyway", bearing);
        }
        Ok(())
    }

    /// Dismiss blocking UI seen in `frame` (or a fresh capture).
    async fn resolve_anomalies(&mut self, ctx: &RunContext, frame: Option<&Frame>) -> PhaseResult {
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
                    return Ok(());
                }
            },
        };
        if matches!(self.sensor.ui_state(frame), UiState::Main | UiState::Unknown) {
            return Ok(());
        }
        self.transition(SegmentEvent::AnomalyDetected);
        self.anomaly.resolve(ctx, Some(frame)).await?;
        self.transition(SegmentEvent::AnomalyCleared);
        Ok(())
    }

    /// Capture, apply the waypoint's misidentification rules and feed the
    /// estimator. `position` is `None` when nothing usable was seen.
    async fn locate(&mut self, ctx: &RunContext, waypoint: &Waypoint) -> PhaseResult<Fix> {
        ctx.check()?;
        let frame = self
            .sensor
            .capture()
            .map_err(|e| Interrupt::retry_free(format!("screen capture failed: {}", e)))?;
        if let Some(condition) = &self.end_condition {
            if condition(&frame) {
                return Err(Interrupt::finished("end condition matched"));
            }
        }

        let reading = self.sensor.sense(&frame);
        let mut extra_delay = Duration::ZERO;

        if !reading.is_detected() {
            if !self.sensor.ui_state(&frame).is_main() {
                self.resolve_anomalies(ctx, Some(&frame)).await?;
            }
            let position = if waypoint.tolerates(MisidentificationKind::Unrecognized) {
                self.substitute(waypoint, &frame, &mut extra_delay)
            } else {
                None
            };
            return Ok(Fix {
                frame,
                position,
                extra_delay,
            });
        }

        let raw = reading.position;
        if raw.distance(&waypoint.point()) > self.nav.far_distance
            && waypoint.tolerates(MisidentificationKind::PathTooFar)
        {
            let position = self.substitute(waypoint, &frame, &mut extra_delay);
            return Ok(Fix {
                frame,
                position,
                extra_delay,
            });
        }

        let expected = self.expected_distance();
        self.last_read_at = Some(Instant::now());
        let position = self.estimator.update(raw, expected);
        if position.is_some() {
            self.last_detected = position;
        }
        Ok(Fix {
            frame,
            position,
            extra_delay,
        })
    }

    fn substitute(
        &mut self,
        waypoint: &Waypoint,
        frame: &Frame,
        extra_delay: &mut Duration,
    ) -> Option<Point2> {
        let handling = waypoint
            .misidentification
            .as_ref()
            .map(|m| m.handling)
            .unwrap_or_default();
        match handling {
            MisidentificationHandling::PreviousDetectedPoint => self.last_detected,
            MisidentificationHandling::Relocate => {
                let started = Instant::now();
                let relocated = self.sensor.relocate(frame);
                *extra_delay = started.elapsed() + RELOCATE_EXTRA_DELAY;
                if let Some(point) = relocated {
                    debug!("Relocated to {}", point);
                    self.estimator.seed(point);
                    self.last_read_at = Some(Instant::now());
                }
                relocated
            }
        }
    }

    /// How far the agent may have moved since the last accepted read.
    fn expected_distance(&self) -> f64 {
        self.last_read_at
            .map(|t| t.elapsed().as_secs_f64() * self.nav.max_speed)
            .unwrap_or(0.0)
    }

    async fn position_or_belief(&mut self, ctx: &RunContext, waypoint: &Waypoint) -> PhaseResult<Point2> {
        let fix = self.locate(ctx, waypoint).await?;
        fix.position
            .or_else(|| self.estimator.position())
            .ok_or_else(|| Interrupt::retry_free("no position fix"))
    }

    async fn press(&self, action: LogicalAction) -> PhaseResult {
        self.router.press(action).await.map_err(actuation_interrupt)
    }

    async fn hold(&self, action: LogicalAction) -> PhaseResult {
        self.router.hold(action).await.map_err(actuation_interrupt)
    }

    async fn release(&self, action: LogicalAction) -> PhaseResult {
        self.router.release(action).await.map_err(actuation_interrupt)
    }
}

fn cooled_down(last: Option<Instant>, cooldown_ms: u64) -> bool {
    last.map(|t| t.elapsed() >= Duration::from_millis(cooldown_ms))
        .unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use wpx_actuator::{BuiltinDevices, GamepadBindings, RegistrationContext};
    use wpx_core::actuator::ActuatorMode;
    use wpx_core::controller::RunListener;
    use wpx_core::route::{Misidentification, WaypointKind};
    use wpx_core::RetryClassification;

    use crate::config::SimulationConfig;
    use crate::sim::{SimTeleportHandler, SimWorld};

    #[derive(Default)]
    struct StuckCounter(AtomicU32);

    impl RunListener for StuckCounter {
        fn on_stuck(&self, _segment: usize, _waypoint: usize, detections: u32) {
            self.0.store(detections, Ordering::SeqCst);
        }
    }

    fn executor(
        sim: SimulationConfig,
        listener: Option<Arc<dyn RunListener>>,
    ) -> (Arc<SimWorld>, WaypointExecutor) {
        let (world, _router, executor) = executor_with_router(sim, listener);
        (world, executor)
    }

    fn executor_with_router(
        sim: SimulationConfig,
        listener: Option<Arc<dyn RunListener>>,
    ) -> (Arc<SimWorld>, Arc<ActuatorRouter>, WaypointExecutor) {
        let world = Arc::new(SimWorld::new(sim));
        let config = EngineConfig::default();
        let mut registry = RegistrationContext::new();
        wpx_actuator::register_builtin_actuators_on(
            &mut registry,
            BuiltinDevices {
                input_sink: world.clone(),
                kbm: config.actuator.kbm_settings(),
                pad_bus: Some(world.clone()),
                gamepad: config.actuator.gamepad_settings(),
                gamepad_bindings: GamepadBindings::default(),
            },
        );
        let router = Arc::new(ActuatorRouter::new(registry, Duration::from_secs(5)));
        let mut handlers = HandlerRegistry::with_builtins(router.clone());
        handlers.set_teleport_handler(SimTeleportHandler::new(world.clone()));
        let mut events = RunEventEmitter::new();
        if let Some(listener) = listener {
            events.register(listener);
        }
        let executor = WaypointExecutor::new(
            router.clone(),
            world.clone(),
            Arc::new(handlers),
            Arc::new(events),
            &config,
        );
        (world, router, executor)
    }

    fn segment(waypoints: Vec<Waypoint>) -> Segment {
        Segment {
            index: 0,
            waypoints,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_walks_path_to_target() {
        let (world, mut exec) = executor(SimulationConfig::default(), None);
        let (_cancel, ctx) = RunContext::new();
        let seg = segment(vec![
            Waypoint::new(100.0, 100.0, WaypointKind::Path),
            Waypoint::new(130.0, 120.0, WaypointKind::Path),
            Waypoint::new(110.0, 140.0, WaypointKind::Target),
        ]);
        exec.run_segment(&ctx, &seg).await.unwrap();
        assert_eq!(exec.state(), &SegmentState::SegmentComplete { segment: 0 });
        let end = world.position();
        assert!(end.distance(&Point2::new(110.0, 140.0)) < 4.0, "{}", end);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gamepad_backend_walks_path_to_target() {
        let (world, router, mut exec) = executor_with_router(SimulationConfig::default(), None);
        assert!(router.switch_to(ActuatorMode::Gamepad).await);
        let (_cancel, ctx) = RunContext::new();
        let seg = segment(vec![
            Waypoint::new(100.0, 100.0, WaypointKind::Path),
            Waypoint::new(130.0, 120.0, WaypointKind::Path),
            Waypoint::new(110.0, 140.0, WaypointKind::Target),
        ]);
        exec.run_segment(&ctx, &seg).await.unwrap();
        assert_eq!(exec.state(), &SegmentState::SegmentComplete { segment: 0 });
        assert_eq!(router.current_mode().await, Some(ActuatorMode::Gamepad));
        let end = world.position();
        assert!(end.distance(&Point2::new(110.0, 140.0)) < 4.0, "{}", end);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_gamepad_switch_keeps_walking_on_keyboard_mouse() {
        let sim = SimulationConfig {
            pad_bus_available: false,
            ..SimulationConfig::default()
        };
        let (world, router, mut exec) = executor_with_router(sim, None);
        let (_cancel, ctx) = RunContext::new();
        let first = segment(vec![
            Waypoint::new(100.0, 100.0, WaypointKind::Path),
            Waypoint::new(130.0, 100.0, WaypointKind::Path),
        ]);
        exec.run_segment(&ctx, &first).await.unwrap();

        assert!(!router.switch_to(ActuatorMode::Gamepad).await);
        assert_eq!(router.current_mode().await, Some(ActuatorMode::KeyboardMouse));

        let second = Segment {
            index: 1,
            waypoints: vec![
                Waypoint::new(130.0, 100.0, WaypointKind::Path),
                Waypoint::new(130.0, 130.0, WaypointKind::Target),
            ],
        };
        exec.run_segment(&ctx, &second).await.unwrap();
        assert_eq!(exec.state(), &SegmentState::SegmentComplete { segment: 1 });
        assert_eq!(router.current_mode().await, Some(ActuatorMode::KeyboardMouse));
        let end = world.position();
        assert!(end.distance(&Point2::new(130.0, 130.0)) < 4.0, "{}", end);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teleport_reseeds_estimator() {
        let (world, mut exec) = executor(SimulationConfig::default(), None);
        let (_cancel, ctx) = RunContext::new();
        let seg = segment(vec![
            Waypoint::new(500.0, 500.0, WaypointKind::Teleport),
            Waypoint::new(510.0, 500.0, WaypointKind::Path),
        ]);
        exec.run_segment(&ctx, &seg).await.unwrap();
        assert!(world.position().distance(&Point2::new(510.0, 500.0)) < 4.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_orientation_waypoint_turns_without_moving() {
        let (world, mut exec) = executor(SimulationConfig::default(), None);
        let (_cancel, ctx) = RunContext::new();
        let seg = segment(vec![
            Waypoint::new(100.0, 100.0, WaypointKind::Path),
            Waypoint::new(100.0, 200.0, WaypointKind::Orientation),
        ]);
        exec.run_segment(&ctx, &seg).await.unwrap();
        assert!((world.heading() - 90.0).abs() < 2.0, "{}", world.heading());
        assert!(world.position().distance(&Point2::new(100.0, 100.0)) < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_budget_is_fatal() {
        let counter = Arc::new(StuckCounter::default());
        let sim = SimulationConfig {
            frozen: true,
            ..SimulationConfig::default()
        };
        let (world, mut exec) = executor(sim, Some(counter.clone() as Arc<dyn RunListener>));
        let (_cancel, ctx) = RunContext::new();
        let seg = segment(vec![
            Waypoint::new(100.0, 100.0, WaypointKind::Path),
            Waypoint::new(150.0, 100.0, WaypointKind::Path),
        ]);
        let err = exec.run_segment(&ctx, &seg).await.unwrap_err();
        assert_eq!(err.classification(), Some(RetryClassification::Fatal));
        assert_eq!(counter.0.load(Ordering::SeqCst), 3);
        // One escape hop per recoverable detection.
        assert_eq!(world.jumps(), 2);
        match err {
            Interrupt::Failed(failure) => {
                assert_eq!(failure.context.segment, Some(0));
                assert_eq!(failure.context.waypoint, Some(1));
                assert!(failure.context.distance.is_some());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(exec.state().is_terminal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sensor_loss_is_free_retry() {
        let (world, mut exec) = executor(SimulationConfig::default(), None);
        let (_cancel, ctx) = RunContext::new();
        let seg = segment(vec![
            Waypoint::new(100.0, 100.0, WaypointKind::Path),
            Waypoint::new(150.0, 100.0, WaypointKind::Path),
        ]);
        world.set_ui(UiState::BigMap, 0);
        let err = exec.run_segment(&ctx, &seg).await.unwrap_err();
        assert_eq!(err.classification(), Some(RetryClassification::RetryFree));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrecognized_tolerated_with_previous_point() {
        let sim = SimulationConfig {
            dropout_every: 2,
            ..SimulationConfig::default()
        };
        let (world, mut exec) = executor(sim, None);
        let (_cancel, ctx) = RunContext::new();
        let mut far = Waypoint::new(140.0, 100.0, WaypointKind::Path);
        far.misidentification = Some(Misidentification {
            kinds: vec![MisidentificationKind::Unrecognized],
            handling: MisidentificationHandling::PreviousDetectedPoint,
        });
        let seg = segment(vec![Waypoint::new(100.0, 100.0, WaypointKind::Path), far]);
        exec.run_segment(&ctx, &seg).await.unwrap();
        assert!(world.position().distance(&Point2::new(140.0, 100.0)) < 4.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_condition_finishes_route() {
        let (_world, exec) = executor(SimulationConfig::default(), None);
        let mut exec = exec.with_end_condition(Arc::new(|frame: &Frame| frame.seq > 5));
        let (_cancel, ctx) = RunContext::new();
        let seg = segment(vec![
            Waypoint::new(100.0, 100.0, WaypointKind::Path),
            Waypoint::new(180.0, 100.0, WaypointKind::Path),
        ]);
        let err = exec.run_segment(&ctx, &seg).await.unwrap_err();
        assert!(matches!(err, Interrupt::Finished(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_approach() {
        let (_world, mut exec) = executor(SimulationConfig::default(), None);
        let (cancel, ctx) = RunContext::new();
        let seg = segment(vec![
            Waypoint::new(100.0, 100.0, WaypointKind::Path),
            Waypoint::new(400.0, 100.0, WaypointKind::Path),
        ]);
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            cancel.cancel();
        });
        let err = exec.run_segment(&ctx, &seg).await.unwrap_err();
        canceller.await.unwrap();
        assert!(err.is_cancelled());
        assert_eq!(exec.state(), &SegmentState::Cancelled);
    }
}
