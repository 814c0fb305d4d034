// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Backend-agnostic actuation contract.
//!
//! The execution engine only ever speaks in logical actions and axes. Each
//! backend translates them into concrete synthetic input for its device.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Full-scale analog stick value.
pub const AXIS_MAX: i32 = 32767;
/// Most negative analog stick value.
pub const AXIS_MIN: i32 = -32768;
/// Full-scale trigger value.
pub const TRIGGER_MAX: i32 = 255;

/// Identifies which backend family an actuator belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActuatorMode {
    #[default]
    KeyboardMouse,
    Gamepad,
}

impl ActuatorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KeyboardMouse => "keyboard-mouse",
            Self::Gamepad => "gamepad",
        }
    }
}

impl fmt::Display for ActuatorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActuatorMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .to_ascii_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        match key.as_str() {
            "keyboardmouse" | "kbm" | "keyboard" => Ok(Self::KeyboardMouse),
            "gamepad" | "xinput" | "pad" => Ok(Self::Gamepad),
            _ => Err(format!("Unknown actuator mode: {}", s)),
        }
    }
}

/// Logical actions understood by every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalAction {
    MoveForward,
    MoveBackward,
    MoveLeft,
    MoveRight,
    Sprint,
    Jump,
    Drop,
    NormalAttack,
    ElementalSkill,
    ElementalBurst,
    PickUpOrInteract,
    OpenMap,
    OpenMenu,
    SwitchMember1,
    SwitchMember2,
    SwitchMember3,
    SwitchMember4,
}

/// Phase of a logical action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Down followed by up.
    Press,
    /// Down, held until a matching `Release`.
    Hold,
    /// Up.
    Release,
}

/// Analog channels. Pointer axes carry raw relative pointer deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisId {
    LeftStickX,
    LeftStickY,
    RightStickX,
    RightStickY,
    LeftTrigger,
    RightTrigger,
    PointerX,
    PointerY,
}

impl AxisId {
    pub fn is_pointer(&self) -> bool {
        matches!(self, Self::PointerX | Self::PointerY)
    }
}

/// A backend-agnostic intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActuatorCommand {
    pub action: LogicalAction,
    pub phase: Phase,
    /// Optional analog strength, used by backends that support it.
    pub magnitude: Option<i32>,
}

impl ActuatorCommand {
    pub fn new(action: LogicalAction, phase: Phase) -> Self {
        Self {
            action,
            phase,
            magnitude: None,
        }
    }

    pub fn press(action: LogicalAction) -> Self {
        Self::new(action, Phase::Press)
    }

    pub fn hold(action: LogicalAction) -> Self {
        Self::new(action, Phase::Hold)
    }

    pub fn release(action: LogicalAction) -> Self {
        Self::new(action, Phase::Release)
    }

    pub fn with_magnitude(mut self, magnitude: i32) -> Self {
        self.magnitude = Some(magnitude);
        self
    }
}

impl fmt::Display for ActuatorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{:?}", self.action, self.phase)?;
        if let Some(m) = self.magnitude {
            write!(f, "@{}", m)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Error)]
pub enum ActuatorError {
    #[error("actuator not initialized")]
    NotInitialized,

    #[error("device disconnected (reconnect attempt {attempts}/{max})")]
    Disconnected { attempts: u32, max: u32 },

    #[error("device reconnect budget exhausted after {0} attempts")]
    ReconnectExhausted(u32),

    #[error("device error: {0}")]
    Device(String),

    #[error("no active actuator")]
    Unavailable,
}

impl ActuatorError {
    /// Transient errors may clear up on a later emission.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Disconnected { .. } | Self::Device(_))
    }
}

pub type ActuatorResult<T> = Result<T, ActuatorError>;

/// Alias to reduce type complexity in `Actuator`.
pub type ActuatorFuture<'a, T> = Pin<Box<dyn Future<Output = ActuatorResult<T>> + Send + 'a>>;

/// Common interface implemented by every actuation backend.
pub trait Actuator: Send + Sync {
    /// Which backend family this is.
    fn mode(&self) -> ActuatorMode;

    /// Bring the device up. Returns `false` when the backend is unusable.
    fn initialize<'a>(&'a mut self) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

    fn execute<'a>(&'a mut self, command: ActuatorCommand) -> ActuatorFuture<'a, ()>;

    fn set_axis<'a>(&'a mut self, axis: AxisId, value: i32) -> ActuatorFuture<'a, ()>;

    /// Release every held key, button, stick and trigger.
    fn release_all<'a>(&'a mut self) -> ActuatorFuture<'a, ()>;

    /// Release everything and detach from the device.
    fn dispose<'a>(&'a mut self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

    /// Whether the action is currently held down.
    fn is_pressed(&self, action: LogicalAction) -> bool;
}
