// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Deterministic 2D world standing in for the game.
//!
//! [`SimWorld`] is at once the sensor, the keyboard/mouse input sink and the
//! virtual pad bus, so the whole engine can run without a screen or input
//! devices. Motion is integrated lazily on the tokio clock, which keeps it
//! deterministic under a paused test runtime.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::time::Instant;
use tracing::debug;

use wpx_actuator::{InputSink, Key, MouseButton, PadButton, PadError, PadReport, VirtualPadBus};
use wpx_core::context::RunContext;
use wpx_core::geometry::{wrap_degrees, Point2};
use wpx_core::handler::{ActionHandler, HandlerFuture};
use wpx_core::route::Waypoint;
use wpx_core::sensor::{Frame, MotionStatus, Sensor, SensorReading, UiState};
use wpx_core::DynResult;

use crate::config::SimulationConfig;

const PAD_STICK_DEADZONE: i32 = 8000;
const STICK_FULL: f64 = 32767.0;

/// What a captured frame shows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimSnapshot {
    pub position: Option<Point2>,
    pub heading: f64,
    pub ui: UiState,
}

#[derive(Debug)]
struct SimState {
    position: Point2,
    heading: f64,
    last_tick: Instant,
    keys: HashSet<Key>,
    buttons: HashSet<MouseButton>,
    pad: Option<PadReport>,
    ui: UiState,
    dialogue_lines: u32,
    captures: u64,
    jumps: u32,
    interactions: u32,
}

pub struct SimWorld {
    config: SimulationConfig,
    state: Mutex<SimState>,
}

impl SimWorld {
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            config,
            state: Mutex::new(SimState {
                position: Point2::new(config.start_x, config.start_y),
                heading: wrap_degrees(config.start_heading),
                last_tick: Instant::now(),
                keys: HashSet::new(),
                buttons: HashSet::new(),
                pad: None,
                ui: UiState::Main,
                dialogue_lines: 0,
                captures: 0,
                jumps: 0,
                interactions: 0,
            }),
        }
    }

    /// Lock the state with motion integrated up to now.
    fn state(&self) -> MutexGuard<'_, SimState> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.advance(&mut state);
        state
    }

    fn advance(&self, state: &mut SimState) {
        let now = Instant::now();
        let dt = now.duration_since(state.last_tick).as_secs_f64();
        state.last_tick = now;
        if dt <= 0.0 || !state.ui.is_main() {
            return;
        }

        let (mut forward, mut strafe) = (0.0, 0.0);
        let mut sprint = state.keys.contains(&Key::LeftShift);
        if state.keys.contains(&Key::W) {
            forward += 1.0;
        }
        if state.keys.contains(&Key::S) {
            forward -= 1.0;
        }
        if state.keys.contains(&Key::D) {
            strafe += 1.0;
        }
        if state.keys.contains(&Key::A) {
            strafe -= 1.0;
        }
        if let Some(pad) = state.pad {
            if pad.left_y.unsigned_abs() as i32 > PAD_STICK_DEADZONE {
                forward += (pad.left_y as f64 / STICK_FULL).signum();
            }
            if pad.left_x.unsigned_abs() as i32 > PAD_STICK_DEADZONE {
                strafe += (pad.left_x as f64 / STICK_FULL).signum();
            }
            sprint |= pad.is_pressed(PadButton::B);
            let turn = pad.right_x as f64 / STICK_FULL * self.config.stick_turn_rate * dt;
            state.heading = wrap_degrees(state.heading - turn);
        }

        if self.config.frozen || (forward == 0.0 && strafe == 0.0) {
            return;
        }
        let speed = if sprint {
            self.config.sprint_speed
        } else {
            self.config.walk_speed
        };
        let step = speed * dt;
        let mut position = state.position.advance(state.heading, forward * step);
        // Strafing right is a clockwise quarter turn from the heading.
        position = position.advance(state.heading - 90.0, strafe * step);
        state.position = position;
    }

    pub fn position(&self) -> Point2 {
        self.state().position
    }

    pub fn heading(&self) -> f64 {
        self.state().heading
    }

    pub fn ui(&self) -> UiState {
        self.state().ui
    }

    /// Put up a screen; `dialogue_lines` is how many interactions a dialogue
    /// takes to finish.
    pub fn set_ui(&self, ui: UiState, dialogue_lines: u32) {
        let mut state = self.state();
        state.ui = ui;
        state.dialogue_lines = dialogue_lines;
    }

    pub fn teleport(&self, to: Point2) {
        let mut state = self.state();
        debug!("Simulated teleport {} -> {}", state.position, to);
        state.position = to;
    }

    pub fn jumps(&self) -> u32 {
        self.state().jumps
    }

    pub fn interactions(&self) -> u32 {
        self.state().interactions
    }

    fn on_key(&self, key: Key, down: bool) {
        let mut state = self.state();
        if !down {
            state.keys.remove(&key);
            return;
        }
        state.keys.insert(key);
        match key {
            Key::Space => state.jumps += 1,
            Key::Escape if state.ui == UiState::ClosablePage => state.ui = UiState::Main,
            Key::F => {
                state.interactions += 1;
                if state.ui == UiState::Dialogue {
                    state.dialogue_lines = state.dialogue_lines.saturating_sub(1);
                    if state.dialogue_lines == 0 {
                        state.ui = UiState::Main;
                    }
                }
            }
            _ => {}
        }
    }
}

impl Sensor for SimWorld {
    fn capture(&self) -> DynResult<Frame> {
        let mut state = self.state();
        state.captures += 1;
        let dropout =
            self.config.dropout_every > 0 && state.captures % self.config.dropout_every == 0;
        let snapshot = SimSnapshot {
            position: (!dropout && state.ui.is_main()).then_some(state.position),
            heading: state.heading,
            ui: state.ui,
        };
        Ok(Frame::new(state.captures).with_payload(snapshot))
    }

    fn sense(&self, frame: &Frame) -> SensorReading {
        frame
            .payload::<SimSnapshot>()
            .and_then(|s| s.position)
            .map(|p| SensorReading { position: p })
            .unwrap_or_else(SensorReading::none)
    }

    fn heading(&self, frame: &Frame) -> f64 {
        frame
            .payload::<SimSnapshot>()
            .map(|s| s.heading)
            .unwrap_or_default()
    }

    fn ui_state(&self, frame: &Frame) -> UiState {
        frame
            .payload::<SimSnapshot>()
            .map(|s| s.ui)
            .unwrap_or(UiState::Unknown)
    }

    fn motion(&self, _frame: &Frame) -> MotionStatus {
        MotionStatus::Normal
    }

    fn relocate(&self, _frame: &Frame) -> Option<Point2> {
        Some(self.position())
    }
}

impl InputSink for SimWorld {
    fn key_down(&self, key: Key) -> DynResult<()> {
        self.on_key(key, true);
        Ok(())
    }

    fn key_up(&self, key: Key) -> DynResult<()> {
        self.on_key(key, false);
        Ok(())
    }

    fn button_down(&self, button: MouseButton) -> DynResult<()> {
        self.state().buttons.insert(button);
        Ok(())
    }

    fn button_up(&self, button: MouseButton) -> DynResult<()> {
        self.state().buttons.remove(&button);
        Ok(())
    }

    fn move_pointer(&self, dx: i32, _dy: i32) -> DynResult<()> {
        let mut state = self.state();
        state.heading = wrap_degrees(state.heading - dx as f64 * self.config.degrees_per_pixel);
        Ok(())
    }
}

impl VirtualPadBus for SimWorld {
    fn connect(&self) -> Result<(), PadError> {
        if !self.config.pad_bus_available {
            return Err(PadError::BusNotFound);
        }
        let mut state = self.state();
        if state.pad.is_some() {
            return Err(PadError::AlreadyConnected);
        }
        state.pad = Some(PadReport::default());
        Ok(())
    }

    fn disconnect(&self) -> Result<(), PadError> {
        self.state().pad = None;
        Ok(())
    }

    fn submit(&self, report: &PadReport) -> Result<(), PadError> {
        let mut state = self.state();
        let Some(previous) = state.pad else {
            return Err(PadError::Disconnected);
        };
        if report.is_pressed(PadButton::A) && !previous.is_pressed(PadButton::A) {
            state.jumps += 1;
        }
        if report.is_pressed(PadButton::Y) && !previous.is_pressed(PadButton::Y) {
            drop(state);
            self.on_key(Key::F, true);
            self.on_key(Key::F, false);
            state = self.state();
        }
        if report.is_pressed(PadButton::Start) && state.ui == UiState::ClosablePage {
            state.ui = UiState::Main;
        }
        state.pad = Some(*report);
        Ok(())
    }
}

/// Teleport handler that moves the simulated agent.
pub struct SimTeleportHandler {
    world: Arc<SimWorld>,
}

impl SimTeleportHandler {
    pub fn new(world: Arc<SimWorld>) -> Self {
        Self { world }
    }
}

impl ActionHandler for SimTeleportHandler {
    fn run<'a>(&'a self, _ctx: &'a RunContext, waypoint: &'a Waypoint) -> HandlerFuture<'a> {
        Box::pin(async move {
            self.world.teleport(waypoint.point());
            Ok(())
        })
    }
}
