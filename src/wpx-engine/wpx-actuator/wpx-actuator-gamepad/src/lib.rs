// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Virtual gamepad actuation backend.
//!
//! Keeps a full pad report in memory and submits it to a virtual bus after
//! every change. A failed submit triggers a bounded number of reconnects
//! before the backend reports a hard failure.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use wpx_core::actuator::{
    Actuator, ActuatorCommand, ActuatorError, ActuatorFuture, ActuatorMode, ActuatorResult, AxisId,
    LogicalAction, Phase, AXIS_MAX, AXIS_MIN, TRIGGER_MAX,
};

mod bindings;

pub use bindings::{GamepadBindings, PadBinding, PadButton};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PadError {
    #[error("virtual gamepad bus driver not found")]
    BusNotFound,

    #[error("virtual gamepad already connected")]
    AlreadyConnected,

    #[error("virtual gamepad disconnected")]
    Disconnected,

    #[error("virtual gamepad error: {0}")]
    Other(String),
}

/// Complete pad state as submitted to the bus.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PadReport {
    pub buttons: u16,
    pub left_x: i16,
    pub left_y: i16,
    pub right_x: i16,
    pub right_y: i16,
    pub left_trigger: u8,
    pub right_trigger: u8,
}

impl PadReport {
    pub fn is_pressed(&self, button: PadButton) -> bool {
        self.buttons & button.mask() != 0
    }

    fn set_button(&mut self, button: PadButton, down: bool) {
        if down {
            self.buttons |= button.mask();
        } else {
            self.buttons &= !button.mask();
        }
    }

    fn set_trigger(&mut self, left: bool, value: i32) {
        let value = value.clamp(0, TRIGGER_MAX) as u8;
        if left {
            self.left_trigger = value;
        } else {
            self.right_trigger = value;
        }
    }
}

/// Virtual HID bus, e.g. a ViGEm or uinput pad.
pub trait VirtualPadBus: Send + Sync {
    fn connect(&self) -> Result<(), PadError>;
    fn disconnect(&self) -> Result<(), PadError>;
    fn submit(&self, report: &PadReport) -> Result<(), PadError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GamepadSettings {
    /// Reconnect attempts before a failed submit becomes a hard error.
    pub reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
    /// Left stick deflection for movement without an explicit magnitude.
    pub walk_deflection: i32,
}

impl Default for GamepadSettings {
    fn default() -> Self {
        Self {
            reconnect_attempts: 3,
            reconnect_delay_ms: 100,
            walk_deflection: 16000,
        }
    }
}

const BUTTON_PRESS: Duration = Duration::from_millis(50);
const COMBO_MODIFIER_LEAD: Duration = Duration::from_millis(30);
const MAP_SHOULDER_HOLD: Duration = Duration::from_millis(1000);
const MAP_STICK_HOLD: Duration = Duration::from_millis(300);
const MAP_SETTLE: Duration = Duration::from_millis(100);

fn clamp_stick(value: i32) -> i16 {
    value.clamp(AXIS_MIN, AXIS_MAX) as i16
}

/// Gamepad backend over an injected [`VirtualPadBus`].
pub struct GamepadActuator {
    bus: Arc<dyn VirtualPadBus>,
    bindings: GamepadBindings,
    settings: GamepadSettings,
    report: PadReport,
    connected: bool,
    reconnect_attempts: u32,
    held: HashSet<LogicalAction>,
}

impl GamepadActuator {
    pub fn new(bus: Arc<dyn VirtualPadBus>, settings: GamepadSettings) -> Self {
        Self {
            bus,
            bindings: GamepadBindings::default(),
            settings,
            report: PadReport::default(),
            connected: false,
            reconnect_attempts: 0,
            held: HashSet::new(),
        }
    }

    pub fn with_bindings(mut self, bindings: GamepadBindings) -> Self {
        self.bindings = bindings;
        self
    }

    pub fn report(&self) -> &PadReport {
        &self.report
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub async fn initialize(&mut self) -> bool {
        match self.bus.connect() {
            Ok(()) | Err(PadError::AlreadyConnected) => {}
            Err(PadError::BusNotFound) => {
                warn!("Virtual gamepad bus not installed");
                return false;
            }
            Err(e) => {
                warn!("Virtual gamepad connect failed: {}", e);
                return false;
            }
        }
        self.connected = true;
        self.reconnect_attempts = 0;
        self.report = PadReport::default();
        match self.bus.submit(&self.report) {
            Ok(()) => {
                info!("Virtual gamepad connected");
                true
            }
            Err(e) => {
                warn!("Virtual gamepad initial report failed: {}", e);
                false
            }
        }
    }

    /// Submit the current report, reconnecting once per call on failure.
    async fn submit(&mut self) -> ActuatorResult<()> {
        if !self.connected {
            return Err(ActuatorError::NotInitialized);
        }
        match self.bus.submit(&self.report) {
            Ok(()) => {
                self.reconnect_attempts = 0;
                return Ok(());
            }
            Err(e) => debug!("Gamepad submit failed: {}", e),
        }

        let max = self.settings.reconnect_attempts;
        if self.reconnect_attempts >= max {
            return Err(ActuatorError::ReconnectExhausted(self.reconnect_attempts));
        }
        self.reconnect_attempts += 1;
        warn!(
            "Virtual gamepad lost, reconnecting ({}/{})",
            self.reconnect_attempts, max
        );

        if let Err(e) = self.bus.disconnect() {
            debug!("Gamepad disconnect before reconnect failed: {}", e);
        }
        let reconnected = match self.bus.connect() {
            Ok(()) | Err(PadError::AlreadyConnected) => self.bus.submit(&self.report).is_ok(),
            Err(_) => false,
        };
        if reconnected {
            info!("Virtual gamepad reconnected");
            self.reconnect_attempts = 0;
            return Ok(());
        }

        tokio::time::sleep(Duration::from_millis(self.settings.reconnect_delay_ms)).await;
        Err(ActuatorError::Disconnected {
            attempts: self.reconnect_attempts,
            max,
        })
    }

    fn movement_axis(action: LogicalAction) -> Option<(AxisId, i32)> {
        match action {
            LogicalAction::MoveForward => Some((AxisId::LeftStickY, 1)),
            LogicalAction::MoveBackward => Some((AxisId::LeftStickY, -1)),
            LogicalAction::MoveLeft => Some((AxisId::LeftStickX, -1)),
            LogicalAction::MoveRight => Some((AxisId::LeftStickX, 1)),
            _ => None,
        }
    }

    fn write_axis(&mut self, axis: AxisId, value: i32) {
        match axis {
            AxisId::LeftStickX => self.report.left_x = clamp_stick(value),
            AxisId::LeftStickY => self.report.left_y = clamp_stick(value),
            AxisId::RightStickX => self.report.right_x = clamp_stick(value),
            AxisId::RightStickY => self.report.right_y = clamp_stick(value),
            AxisId::LeftTrigger => self.report.set_trigger(true, value),
            AxisId::RightTrigger => self.report.set_trigger(false, value),
            AxisId::PointerX | AxisId::PointerY => {}
        }
    }

    fn apply_binding(&mut self, binding: PadBinding, down: bool) {
        match binding {
            PadBinding::Button(button) => self.report.set_button(button, down),
            PadBinding::Trigger { left } => {
                self.report
                    .set_trigger(left, if down { TRIGGER_MAX } else { 0 })
            }
            PadBinding::Combo { modifier, main } => {
                self.report.set_button(modifier, down);
                self.report.set_button(main, down);
            }
        }
    }

    async fn press_binding(&mut self, binding: PadBinding) -> ActuatorResult<()> {
        match binding {
            PadBinding::Combo { modifier, main } => {
                self.report.set_button(modifier, true);
                self.submit().await?;
                tokio::time::sleep(COMBO_MODIFIER_LEAD).await;
                self.report.set_button(main, true);
                self.submit().await?;
                tokio::time::sleep(BUTTON_PRESS).await;
                self.report.set_button(main, false);
                self.submit().await?;
                tokio::time::sleep(COMBO_MODIFIER_LEAD).await;
                self.report.set_button(modifier, false);
                self.submit().await
            }
            other => {
                self.apply_binding(other, true);
                self.submit().await?;
                tokio::time::sleep(BUTTON_PRESS).await;
                self.apply_binding(other, false);
                self.submit().await
            }
        }
    }

    /// Hold LB, pull the right stick down, then let go.
    async fn open_map(&mut self) -> ActuatorResult<()> {
        self.report.set_button(PadButton::LeftShoulder, true);
        self.submit().await?;
        tokio::time::sleep(MAP_SHOULDER_HOLD).await;
        self.report.right_y = clamp_stick(AXIS_MIN);
        self.submit().await?;
        tokio::time::sleep(MAP_STICK_HOLD).await;
        self.report.right_y = 0;
        self.submit().await?;
        tokio::time::sleep(MAP_SETTLE).await;
        self.report.set_button(PadButton::LeftShoulder, false);
        self.submit().await
    }

    async fn execute_movement(
        &mut self,
        axis: AxisId,
        sign: i32,
        command: ActuatorCommand,
    ) -> ActuatorResult<()> {
        let magnitude = command
            .magnitude
            .unwrap_or(self.settings.walk_deflection)
            .clamp(0, AXIS_MAX);
        match command.phase {
            Phase::Hold => {
                self.write_axis(axis, sign * magnitude);
                self.submit().await
            }
            Phase::Release => {
                self.write_axis(axis, 0);
                self.submit().await
            }
            Phase::Press => {
                self.write_axis(axis, sign * magnitude);
                self.submit().await?;
                tokio::time::sleep(BUTTON_PRESS).await;
                self.write_axis(axis, 0);
                self.submit().await
            }
        }
    }

    pub async fn execute(&mut self, command: ActuatorCommand) -> ActuatorResult<()> {
        if let Some((axis, sign)) = Self::movement_axis(command.action) {
            return self.execute_movement(axis, sign, command).await;
        }
        if command.action == LogicalAction::OpenMap {
            return match command.phase {
                Phase::Press | Phase::Hold => self.open_map().await,
                Phase::Release => Ok(()),
            };
        }

        let binding = self.bindings.get(command.action).ok_or_else(|| {
            ActuatorError::Device(format!("no pad binding for {:?}", command.action))
        })?;
        match command.phase {
            Phase::Press => {
                self.held.remove(&command.action);
                self.press_binding(binding).await
            }
            Phase::Hold => {
                self.apply_binding(binding, true);
                self.held.insert(command.action);
                self.submit().await
            }
            Phase::Release => {
                self.apply_binding(binding, false);
                self.held.remove(&command.action);
                self.submit().await
            }
        }
    }

    pub async fn set_axis(&mut self, axis: AxisId, value: i32) -> ActuatorResult<()> {
        if axis.is_pointer() {
            return Ok(());
        }
        self.write_axis(axis, value);
        self.submit().await
    }

    pub async fn release_all(&mut self) -> ActuatorResult<()> {
        self.report = PadReport::default();
        self.held.clear();
        self.submit().await
    }

    pub async fn dispose(&mut self) {
        if self.connected {
            if let Err(e) = self.release_all().await {
                debug!("release during dispose failed: {}", e);
            }
            if let Err(e) = self.bus.disconnect() {
                debug!("gamepad disconnect failed: {}", e);
            }
        }
        self.connected = false;
    }

    pub fn is_pressed(&self, action: LogicalAction) -> bool {
        match action {
            LogicalAction::MoveForward => self.report.left_y > 0,
            LogicalAction::MoveBackward => self.report.left_y < 0,
            LogicalAction::MoveLeft => self.report.left_x < 0,
            LogicalAction::MoveRight => self.report.left_x > 0,
            other => self.held.contains(&other),
        }
    }
}

impl Actuator for GamepadActuator {
    fn mode(&self) -> ActuatorMode {
        ActuatorMode::Gamepad
    }

    fn initialize<'a>(&'a mut self) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async move { GamepadActuator::initialize(self).await })
    }

    fn execute<'a>(&'a mut self, command: ActuatorCommand) -> ActuatorFuture<'a, ()> {
        Box::pin(async move { GamepadActuator::execute(self, command).await })
    }

    fn set_axis<'a>(&'a mut self, axis: AxisId, value: i32) -> ActuatorFuture<'a, ()> {
        Box::pin(async move { GamepadActuator::set_axis(self, axis, value).await })
    }

    fn release_all<'a>(&'a mut self) -> ActuatorFuture<'a, ()> {
        Box::pin(async move { GamepadActuator::release_all(self).await })
    }

    fn dispose<'a>(&'a mut self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move { GamepadActuator::dispose(self).await })
    }

    fn is_pressed(&self, action: LogicalAction) -> bool {
        GamepadActuator::is_pressed(self, action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Pad bus that can be told to drop submits or refuse connects.
    #[derive(Default)]
    struct FlakyBus {
        missing: AtomicBool,
        failing: AtomicBool,
        refuse_connect: AtomicBool,
        refuse_disconnect: AtomicBool,
        connects: AtomicU32,
        reports: Mutex<Vec<PadReport>>,
    }

    impl VirtualPadBus for FlakyBus {
        fn connect(&self) -> Result<(), PadError> {
            if self.missing.load(Ordering::Relaxed) {
                return Err(PadError::BusNotFound);
            }
            if self.refuse_connect.load(Ordering::Relaxed) {
                return Err(PadError::Other("busy".into()));
            }
            self.connects.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        fn disconnect(&self) -> Result<(), PadError> {
            if self.refuse_disconnect.load(Ordering::Relaxed) {
                return Err(PadError::Other("stale handle".into()));
            }
            Ok(())
        }

        fn submit(&self, report: &PadReport) -> Result<(), PadError> {
            if self.failing.load(Ordering::Relaxed) {
                return Err(PadError::Disconnected);
            }
            self.reports.lock().unwrap().push(*report);
            Ok(())
        }
    }

    async fn connected() -> (Arc<FlakyBus>, GamepadActuator) {
        let bus = Arc::new(FlakyBus::default());
        let mut pad = GamepadActuator::new(bus.clone(), GamepadSettings::default());
        assert!(pad.initialize().await);
        (bus, pad)
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_proceeds_when_disconnect_fails() {
        let (bus, mut pad) = connected().await;
        bus.refuse_disconnect.store(true, Ordering::Relaxed);
        bus.failing.store(true, Ordering::Relaxed);
        let err = pad
            .execute(ActuatorCommand::hold(LogicalAction::MoveForward))
            .await
            .unwrap_err();
        assert!(matches!(err, ActuatorError::Disconnected { attempts: 1, .. }));
        assert_eq!(bus.connects.load(Ordering::Relaxed), 2);

        bus.failing.store(false, Ordering::Relaxed);
        pad.execute(ActuatorCommand::hold(LogicalAction::MoveForward))
            .await
            .unwrap();
        assert_eq!(bus.connects.load(Ordering::Relaxed), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_bus_fails_initialize() {
        let bus = Arc::new(FlakyBus::default());
        bus.missing.store(true, Ordering::Relaxed);
        let mut pad = GamepadActuator::new(bus, GamepadSettings::default());
        assert!(!pad.initialize().await);
        let err = pad
            .execute(ActuatorCommand::press(LogicalAction::Jump))
            .await
            .unwrap_err();
        assert!(matches!(err, ActuatorError::NotInitialized));
    }

    #[tokio::test(start_paused = true)]
    async fn test_button_press_sequence() {
        let (bus, mut pad) = connected().await;
        bus.reports.lock().unwrap().clear();
        pad.execute(ActuatorCommand::press(LogicalAction::Jump))
            .await
            .unwrap();
        let reports = bus.reports.lock().unwrap().clone();
        assert_eq!(reports.len(), 2);
        assert!(reports[0].is_pressed(PadButton::A));
        assert!(!reports[1].is_pressed(PadButton::A));
    }

    #[tokio::test(start_paused = true)]
    async fn test_combo_holds_modifier_around_main() {
        let (bus, mut pad) = connected().await;
        let mut bindings = GamepadBindings::default();
        bindings.set(
            LogicalAction::ElementalSkill,
            PadBinding::Combo {
                modifier: PadButton::LeftShoulder,
                main: PadButton::X,
            },
        );
        pad = pad.with_bindings(bindings);
        bus.reports.lock().unwrap().clear();
        pad.execute(ActuatorCommand::press(LogicalAction::ElementalSkill))
            .await
            .unwrap();
        let reports = bus.reports.lock().unwrap().clone();
        assert_eq!(reports.len(), 4);
        assert!(reports[0].is_pressed(PadButton::LeftShoulder) && !reports[0].is_pressed(PadButton::X));
        assert!(reports[1].is_pressed(PadButton::LeftShoulder) && reports[1].is_pressed(PadButton::X));
        assert!(reports[2].is_pressed(PadButton::LeftShoulder) && !reports[2].is_pressed(PadButton::X));
        assert_eq!(reports[3].buttons, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_movement_drives_left_stick() {
        let (_bus, mut pad) = connected().await;
        pad.execute(ActuatorCommand::hold(LogicalAction::MoveForward))
            .await
            .unwrap();
        assert_eq!(pad.report().left_y, 16000);
        assert!(pad.is_pressed(LogicalAction::MoveForward));

        pad.execute(ActuatorCommand::hold(LogicalAction::MoveLeft).with_magnitude(90000))
            .await
            .unwrap();
        assert_eq!(pad.report().left_x, -32767);

        pad.release_all().await.unwrap();
        assert_eq!(pad.report(), &PadReport::default());
        assert!(!pad.is_pressed(LogicalAction::MoveForward));
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_binding_full_scale() {
        let (_bus, mut pad) = connected().await;
        pad.execute(ActuatorCommand::hold(LogicalAction::ElementalBurst))
            .await
            .unwrap();
        assert_eq!(pad.report().right_trigger, 255);
        assert!(pad.is_pressed(LogicalAction::ElementalBurst));
        pad.execute(ActuatorCommand::release(LogicalAction::ElementalBurst))
            .await
            .unwrap();
        assert_eq!(pad.report().right_trigger, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pointer_axes_are_ignored() {
        let (bus, mut pad) = connected().await;
        bus.reports.lock().unwrap().clear();
        pad.set_axis(AxisId::PointerX, 500).await.unwrap();
        assert!(bus.reports.lock().unwrap().is_empty());
        pad.set_axis(AxisId::RightStickX, 40000).await.unwrap();
        assert_eq!(pad.report().right_x, 32767);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_reconnects() {
        let (bus, mut pad) = connected().await;
        bus.failing.store(true, Ordering::Relaxed);
        let err = pad.set_axis(AxisId::RightStickX, 100).await.unwrap_err();
        assert!(matches!(err, ActuatorError::Disconnected { attempts: 1, max: 3 }));
        assert!(err.is_transient());

        bus.failing.store(false, Ordering::Relaxed);
        pad.set_axis(AxisId::RightStickX, 200).await.unwrap();
        assert_eq!(pad.reconnect_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_budget_exhausts() {
        let (bus, mut pad) = connected().await;
        bus.failing.store(true, Ordering::Relaxed);
        bus.refuse_connect.store(true, Ordering::Relaxed);
        for attempt in 1..=3 {
            let err = pad.set_axis(AxisId::LeftStickX, 1).await.unwrap_err();
            assert!(matches!(err, ActuatorError::Disconnected { attempts, .. } if attempts == attempt));
        }
        let err = pad.set_axis(AxisId::LeftStickX, 1).await.unwrap_err();
        assert!(matches!(err, ActuatorError::ReconnectExhausted(3)));
        assert!(!err.is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_success_resets_counter() {
        let (bus, mut pad) = connected().await;
        // Submit fails once, the reconnect path then succeeds.
        struct OnceFailing {
            inner: Arc<FlakyBus>,
            failed: AtomicBool,
        }
        impl VirtualPadBus for OnceFailing {
            fn connect(&self) -> Result<(), PadError> {
                self.inner.connect()
            }
            fn disconnect(&self) -> Result<(), PadError> {
                self.inner.disconnect()
            }
            fn submit(&self, report: &PadReport) -> Result<(), PadError> {
                if !self.failed.swap(true, Ordering::Relaxed) {
                    return Err(PadError::Disconnected);
                }
                self.inner.submit(report)
            }
        }
        pad.bus = Arc::new(OnceFailing {
            inner: bus.clone(),
            failed: AtomicBool::new(false),
        });
        let before = bus.connects.load(Ordering::Relaxed);
        pad.set_axis(AxisId::LeftStickY, 5000).await.unwrap();
        assert_eq!(bus.connects.load(Ordering::Relaxed), before + 1);
        assert_eq!(pad.reconnect_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_map_macro() {
        let (bus, mut pad) = connected().await;
        bus.reports.lock().unwrap().clear();
        pad.execute(ActuatorCommand::press(LogicalAction::OpenMap))
            .await
            .unwrap();
        let reports = bus.reports.lock().unwrap().clone();
        assert_eq!(reports.len(), 4);
        assert!(reports[0].is_pressed(PadButton::LeftShoulder));
        assert_eq!(reports[1].right_y, -32768);
        assert_eq!(reports[2].right_y, 0);
        assert_eq!(reports[3], PadReport::default());
    }
}
