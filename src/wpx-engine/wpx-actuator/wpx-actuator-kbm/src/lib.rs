// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Keyboard and mouse actuation backend.
//!
//! Logical actions map to keys and mouse buttons. Directional stick values
//! become key transitions past a deadzone, and the look stick becomes
//! relative pointer motion.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use wpx_core::actuator::{
    Actuator, ActuatorCommand, ActuatorError, ActuatorFuture, ActuatorMode, ActuatorResult, AxisId,
    LogicalAction, Phase, AXIS_MAX,
};
use wpx_core::DynResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Key {
    W,
    A,
    S,
    D,
    E,
    Q,
    F,
    X,
    M,
    Space,
    LeftShift,
    Escape,
    Num1,
    Num2,
    Num3,
    Num4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

/// A physical input the sink can press.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Input {
    Key(Key),
    Mouse(MouseButton),
}

/// Synthetic input injection, e.g. SendInput or uinput.
pub trait InputSink: Send + Sync {
    fn key_down(&self, key: Key) -> DynResult<()>;
    fn key_up(&self, key: Key) -> DynResult<()>;
    fn button_down(&self, button: MouseButton) -> DynResult<()>;
    fn button_up(&self, button: MouseButton) -> DynResult<()>;
    fn move_pointer(&self, dx: i32, dy: i32) -> DynResult<()>;
}

/// Logical action to physical input table.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyBindings {
    map: HashMap<LogicalAction, Input>,
}

impl Default for KeyBindings {
    fn default() -> Self {
        use LogicalAction::*;
        let map = HashMap::from([
            (MoveForward, Input::Key(Key::W)),
            (MoveBackward, Input::Key(Key::S)),
            (MoveLeft, Input::Key(Key::A)),
            (MoveRight, Input::Key(Key::D)),
            (Sprint, Input::Key(Key::LeftShift)),
            (Jump, Input::Key(Key::Space)),
            (Drop, Input::Key(Key::X)),
            (NormalAttack, Input::Mouse(MouseButton::Left)),
            (ElementalSkill, Input::Key(Key::E)),
            (ElementalBurst, Input::Key(Key::Q)),
            (PickUpOrInteract, Input::Key(Key::F)),
            (OpenMap, Input::Key(Key::M)),
            (OpenMenu, Input::Key(Key::Escape)),
            (SwitchMember1, Input::Key(Key::Num1)),
            (SwitchMember2, Input::Key(Key::Num2)),
            (SwitchMember3, Input::Key(Key::Num3)),
            (SwitchMember4, Input::Key(Key::Num4)),
        ]);
        Self { map }
    }
}

impl KeyBindings {
    pub fn get(&self, action: LogicalAction) -> Option<Input> {
        self.map.get(&action).copied()
    }

    pub fn set(&mut self, action: LogicalAction, input: Input) {
        self.map.insert(action, input);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KbmSettings {
    /// |stick value| above this holds the directional key.
    pub stick_threshold: i32,
    /// Look stick value to pointer pixels.
    pub pointer_sensitivity: f64,
}

impl Default for KbmSettings {
    fn default() -> Self {
        Self {
            stick_threshold: AXIS_MAX / 2 + 1,
            pointer_sensitivity: 0.01,
        }
    }
}

/// Keyboard/mouse backend over an injected [`InputSink`].
pub struct KeyboardMouseActuator {
    sink: Arc<dyn InputSink>,
    bindings: KeyBindings,
    settings: KbmSettings,
    pressed: HashSet<Input>,
}

impl KeyboardMouseActuator {
    pub fn new(sink: Arc<dyn InputSink>, settings: KbmSettings) -> Self {
        Self {
            sink,
            bindings: KeyBindings::default(),
            settings,
            pressed: HashSet::new(),
        }
    }

    pub fn with_bindings(mut self, bindings: KeyBindings) -> Self {
        self.bindings = bindings;
        self
    }

    fn binding(&self, action: LogicalAction) -> ActuatorResult<Input> {
        self.bindings
            .get(action)
            .ok_or_else(|| ActuatorError::Device(format!("no key bound to {:?}", action)))
    }

    fn emit(&self, input: Input, down: bool) -> ActuatorResult<()> {
        let result = match (input, down) {
            (Input::Key(key), true) => self.sink.key_down(key),
            (Input::Key(key), false) => self.sink.key_up(key),
            (Input::Mouse(button), true) => self.sink.button_down(button),
            (Input::Mouse(button), false) => self.sink.button_up(button),
        };
        result.map_err(|e| ActuatorError::Device(e.to_string()))
    }

    /// Drive `input` to `down`, emitting only on change.
    fn set_input(&mut self, input: Input, down: bool) -> ActuatorResult<()> {
        if self.pressed.contains(&input) == down {
            return Ok(());
        }
        self.emit(input, down)?;
        if down {
            self.pressed.insert(input);
        } else {
            self.pressed.remove(&input);
        }
        Ok(())
    }

    fn set_direction(
        &mut self,
        value: i32,
        positive: LogicalAction,
        negative: LogicalAction,
    ) -> ActuatorResult<()> {
        let pos = self.binding(positive)?;
        let neg = self.binding(negative)?;
        let threshold = self.settings.stick_threshold;
        self.set_input(pos, value > threshold)?;
        self.set_input(neg, value < -threshold)
    }

    fn move_pointer(&self, dx: i32, dy: i32) -> ActuatorResult<()> {
        if dx == 0 && dy == 0 {
            return Ok(());
        }
        self.sink
            .move_pointer(dx, dy)
            .map_err(|e| ActuatorError::Device(e.to_string()))
    }

    fn scaled(&self, value: i32) -> i32 {
        (value as f64 * self.settings.pointer_sensitivity) as i32
    }

    pub async fn execute(&mut self, command: ActuatorCommand) -> ActuatorResult<()> {
        let input = self.binding(command.action)?;
        match command.phase {
            Phase::Press => {
                self.emit(input, true)?;
                self.emit(input, false)?;
                self.pressed.remove(&input);
                Ok(())
            }
            Phase::Hold => self.set_input(input, true),
            Phase::Release => {
                // Always send the key up; the OS state may disagree with ours.
                self.emit(input, false)?;
                self.pressed.remove(&input);
                Ok(())
            }
        }
    }

    pub async fn set_axis(&mut self, axis: AxisId, value: i32) -> ActuatorResult<()> {
        match axis {
            AxisId::LeftStickX => {
                self.set_direction(value, LogicalAction::MoveRight, LogicalAction::MoveLeft)
            }
            AxisId::LeftStickY => self.set_direction(
                value,
                LogicalAction::MoveForward,
                LogicalAction::MoveBackward,
            ),
            AxisId::RightStickX => self.move_pointer(self.scaled(value), 0),
            AxisId::RightStickY => self.move_pointer(0, -self.scaled(value)),
            AxisId::LeftTrigger => self.set_input(Input::Mouse(MouseButton::Right), value > 128),
            AxisId::RightTrigger => self.set_input(Input::Mouse(MouseButton::Left), value > 128),
            AxisId::PointerX => self.move_pointer(value, 0),
            AxisId::PointerY => self.move_pointer(0, value),
        }
    }

    pub async fn release_all(&mut self) -> ActuatorResult<()> {
        let mut held: Vec<Input> = self.pressed.drain().collect();
        held.sort();
        let mut first_err = None;
        for input in held {
            if let Err(e) = self.emit(input, false) {
                warn!("Failed to release {:?}: {}", input, e);
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub async fn dispose(&mut self) {
        if let Err(e) = self.release_all().await {
            debug!("release during dispose failed: {}", e);
        }
    }

    pub fn is_pressed(&self, action: LogicalAction) -> bool {
        self.bindings
            .get(action)
            .map(|input| self.pressed.contains(&input))
            .unwrap_or(false)
    }
}

impl Actuator for KeyboardMouseActuator {
    fn mode(&self) -> ActuatorMode {
        ActuatorMode::KeyboardMouse
    }

    fn initialize<'a>(&'a mut self) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        // Input injection needs no device handshake.
        Box::pin(async move { true })
    }

    fn execute<'a>(&'a mut self, command: ActuatorCommand) -> ActuatorFuture<'a, ()> {
        Box::pin(async move { KeyboardMouseActuator::execute(self, command).await })
    }

    fn set_axis<'a>(&'a mut self, axis: AxisId, value: i32) -> ActuatorFuture<'a, ()> {
        Box::pin(async move { KeyboardMouseActuator::set_axis(self, axis, value).await })
    }

    fn release_all<'a>(&'a mut self) -> ActuatorFuture<'a, ()> {
        Box::pin(async move { KeyboardMouseActuator::release_all(self).await })
    }

    fn dispose<'a>(&'a mut self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move { KeyboardMouseActuator::dispose(self).await })
    }

    fn is_pressed(&self, action: LogicalAction) -> bool {
        KeyboardMouseActuator::is_pressed(self, action)
    }
}
