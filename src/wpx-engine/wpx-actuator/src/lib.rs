// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::collections::HashMap;
use std::sync::Arc;

use wpx_core::actuator::{Actuator, ActuatorMode};
use wpx_core::DynResult;

pub mod dummy;

#[cfg(feature = "gamepad")]
pub use wpx_actuator_gamepad::{
    GamepadActuator, GamepadBindings, GamepadSettings, PadBinding, PadButton, PadError, PadReport,
    VirtualPadBus,
};
#[cfg(feature = "kbm")]
pub use wpx_actuator_kbm::{
    InputSink, Key, KbmSettings, KeyBindings, KeyboardMouseActuator, MouseButton,
};

pub type ActuatorFactory = Arc<dyn Fn() -> DynResult<Box<dyn Actuator>> + Send + Sync>;

/// Context for registering and instantiating actuation backends.
#[derive(Clone, Default)]
pub struct RegistrationContext {
    factories: HashMap<ActuatorMode, ActuatorFactory>,
}

impl RegistrationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the factory for a backend family.
    pub fn register_actuator<F>(&mut self, mode: ActuatorMode, factory: F)
    where
        F: Fn() -> DynResult<Box<dyn Actuator>> + Send + Sync + 'static,
    {
        self.factories.insert(mode, Arc::new(factory));
    }

    pub fn is_actuator_registered(&self, mode: ActuatorMode) -> bool {
        self.factories.contains_key(&mode)
    }

    /// List registered backend families.
    pub fn registered_actuators(&self) -> Vec<ActuatorMode> {
        let mut modes: Vec<ActuatorMode> = self.factories.keys().copied().collect();
        modes.sort_by_key(|m| m.as_str());
        modes
    }

    /// Construct an uninitialized backend.
    pub fn build_actuator(&self, mode: ActuatorMode) -> DynResult<Box<dyn Actuator>> {
        let factory = self
            .factories
            .get(&mode)
            .ok_or_else(|| format!("No actuator registered for mode: {}", mode))?;
        factory()
    }

    /// Merge another registration context into this one.
    pub fn extend_from(&mut self, other: &RegistrationContext) {
        for (mode, factory) in &other.factories {
            self.factories.insert(*mode, factory.clone());
        }
    }
}

/// Devices and tuning handed to the built-in backends.
#[derive(Clone)]
pub struct BuiltinDevices {
    #[cfg(feature = "kbm")]
    pub input_sink: Arc<dyn InputSink>,
    #[cfg(feature = "kbm")]
    pub kbm: KbmSettings,
    /// `None` when no virtual pad driver is available.
    #[cfg(feature = "gamepad")]
    pub pad_bus: Option<Arc<dyn VirtualPadBus>>,
    #[cfg(feature = "gamepad")]
    pub gamepad: GamepadSettings,
    #[cfg(feature = "gamepad")]
    pub gamepad_bindings: GamepadBindings,
}

/// Register all built-in backends enabled by features on a context.
pub fn register_builtin_actuators_on(context: &mut RegistrationContext, devices: BuiltinDevices) {
    #[cfg(feature = "kbm")]
    {
        let sink = devices.input_sink.clone();
        let settings = devices.kbm;
        context.register_actuator(ActuatorMode::KeyboardMouse, move || {
            Ok(Box::new(KeyboardMouseActuator::new(sink.clone(), settings)) as Box<dyn Actuator>)
        });
    }
    #[cfg(feature = "gamepad")]
    {
        let bus = devices.pad_bus.clone();
        let settings = devices.gamepad;
        let bindings = devices.gamepad_bindings.clone();
        context.register_actuator(ActuatorMode::Gamepad, move || {
            let bus = bus
                .clone()
                .ok_or("virtual gamepad bus is not available on this system")?;
            Ok(Box::new(
                GamepadActuator::new(bus, settings).with_bindings(bindings.clone()),
            ) as Box<dyn Actuator>)
        });
    }
}
