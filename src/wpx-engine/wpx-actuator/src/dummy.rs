// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! In-memory actuator for development and testing.
//!
//! Records every call into a shared log and tracks held actions. No input
//! device required.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use wpx_core::actuator::{
    Actuator, ActuatorCommand, ActuatorError, ActuatorFuture, ActuatorMode, AxisId,
    LogicalAction, Phase,
};

/// One call observed by a [`RecordingActuator`].
#[derive(Debug, Clone, PartialEq)]
pub enum ActuatorCall {
    Initialize(ActuatorMode),
    Execute(ActuatorMode, ActuatorCommand),
    SetAxis(ActuatorMode, AxisId, i32),
    ReleaseAll(ActuatorMode),
    Dispose(ActuatorMode),
}

/// Shared, cloneable call log.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<ActuatorCall>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, call: ActuatorCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    pub fn snapshot(&self) -> Vec<ActuatorCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.clear();
        }
    }

    pub fn count(&self, pred: impl Fn(&ActuatorCall) -> bool) -> usize {
        self.calls
            .lock()
            .map(|c| c.iter().filter(|call| pred(call)).count())
            .unwrap_or(0)
    }
}

pub struct RecordingActuator {
    mode: ActuatorMode,
    log: CallLog,
    fail_init: bool,
    initialized: bool,
    held: HashSet<LogicalAction>,
}

impl RecordingActuator {
    pub fn new(mode: ActuatorMode) -> Self {
        Self::with_log(mode, CallLog::new())
    }

    pub fn with_log(mode: ActuatorMode, log: CallLog) -> Self {
        Self {
            mode,
            log,
            fail_init: false,
            initialized: false,
            held: HashSet::new(),
        }
    }

    /// Make `initialize` report failure.
    pub fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    fn ensure_initialized(&self) -> Result<(), ActuatorError> {
        if self.initialized {
            Ok(())
        } else {
            Err(ActuatorError::NotInitialized)
        }
    }
}

impl Actuator for RecordingActuator {
    fn mode(&self) -> ActuatorMode {
        self.mode
    }

    fn initialize<'a>(&'a mut self) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async move {
            self.log.push(ActuatorCall::Initialize(self.mode));
            self.initialized = !self.fail_init;
            self.initialized
        })
    }

    fn execute<'a>(&'a mut self, command: ActuatorCommand) -> ActuatorFuture<'a, ()> {
        Box::pin(async move {
            self.ensure_initialized()?;
            self.log.push(ActuatorCall::Execute(self.mode, command));
            match command.phase {
                Phase::Hold => {
                    self.held.insert(command.action);
                }
                Phase::Press | Phase::Release => {
                    self.held.remove(&command.action);
                }
            }
            Ok(())
        })
    }

    fn set_axis<'a>(&'a mut self, axis: AxisId, value: i32) -> ActuatorFuture<'a, ()> {
        Box::pin(async move {
            self.ensure_initialized()?;
            self.log.push(ActuatorCall::SetAxis(self.mode, axis, value));
            Ok(())
        })
    }

    fn release_all<'a>(&'a mut self) -> ActuatorFuture<'a, ()> {
        Box::pin(async move {
            self.log.push(ActuatorCall::ReleaseAll(self.mode));
            self.held.clear();
            Ok(())
        })
    }

    fn dispose<'a>(&'a mut self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            self.log.push(ActuatorCall::Dispose(self.mode));
            self.held.clear();
            self.initialized = false;
        })
    }

    fn is_pressed(&self, action: LogicalAction) -> bool {
        self.held.contains(&action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_calls_and_held_state() {
        let log = CallLog::new();
        let mut act = RecordingActuator::with_log(ActuatorMode::KeyboardMouse, log.clone());
        assert!(act.initialize().await);
        act.execute(ActuatorCommand::hold(LogicalAction::MoveForward))
            .await
            .unwrap();
        assert!(act.is_pressed(LogicalAction::MoveForward));
        act.release_all().await.unwrap();
        assert!(!act.is_pressed(LogicalAction::MoveForward));
        assert_eq!(log.count(|c| matches!(c, ActuatorCall::ReleaseAll(_))), 1);
        assert_eq!(log.snapshot().len(), 3);
    }

    #[tokio::test]
    async fn test_failing_init_rejects_commands() {
        let mut act = RecordingActuator::new(ActuatorMode::Gamepad).failing_init();
        assert!(!act.initialize().await);
        let err = act
            .execute(ActuatorCommand::press(LogicalAction::Jump))
            .await
            .unwrap_err();
        assert!(matches!(err, ActuatorError::NotInitialized));
    }
}
