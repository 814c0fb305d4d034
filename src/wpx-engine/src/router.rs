// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Hot-swappable owner of the single live actuation backend.

use std::time::Duration;

use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use wpx_actuator::RegistrationContext;
use wpx_core::actuator::{
    Actuator, ActuatorCommand, ActuatorError, ActuatorMode, ActuatorResult, AxisId,
    LogicalAction,
};
use wpx_core::outcome::Interrupt;
use wpx_core::DynResult;

/// Backend used when a switch fails or nothing is active yet.
const FALLBACK_MODE: ActuatorMode = ActuatorMode::KeyboardMouse;

pub struct ActuatorRouter {
    registry: RegistrationContext,
    switch_lock: Mutex<()>,
    switch_timeout: Duration,
    active: Mutex<Option<Box<dyn Actuator>>>,
}

impl ActuatorRouter {
    pub fn new(registry: RegistrationContext, switch_timeout: Duration) -> Self {
        Self {
            registry,
            switch_lock: Mutex::new(()),
            switch_timeout,
            active: Mutex::new(None),
        }
    }

    /// Replace the active backend with one of `mode`.
    ///
    /// Returns `false` when the requested backend could not be brought up;
    /// keyboard/mouse is active afterwards in that case.
    pub async fn switch_to(&self, mode: ActuatorMode) -> bool {
        let _switch = match tokio::time::timeout(self.switch_timeout, self.switch_lock.lock()).await
        {
            Ok(guard) => Some(guard),
            Err(_) => {
                warn!(
                    "Actuator switch lock not acquired within {:?}, switching anyway",
                    self.switch_timeout
                );
                None
            }
        };

        let mut slot = self.active.lock().await;
        if let Some(mut old) = slot.take() {
            debug!("Disposing {} actuator", old.mode());
            if let Err(e) = old.release_all().await {
                debug!("release before dispose failed: {}", e);
            }
            old.dispose().await;
        }

        match self.build_initialized(mode).await {
            Ok(actuator) => {
                info!("Actuator switched to {}", mode);
                *slot = Some(actuator);
                true
            }
            Err(e) => {
                warn!("Failed to switch actuator to {}: {}", mode, e);
                match self.build_initialized(FALLBACK_MODE).await {
                    Ok(fallback) => {
                        info!("Falling back to {} actuator", FALLBACK_MODE);
                        *slot = Some(fallback);
                    }
                    Err(e) => warn!("Fallback actuator unavailable: {}", e),
                }
                false
            }
        }
    }

    /// The active slot, with keyboard/mouse built into it if it was empty.
    async fn live_slot(&self) -> ActuatorResult<MutexGuard<'_, Option<Box<dyn Actuator>>>> {
        let mut slot = self.active.lock().await;
        if slot.is_none() {
            match self.build_initialized(FALLBACK_MODE).await {
                Ok(actuator) => {
                    info!("No active actuator, created {}", FALLBACK_MODE);
                    *slot = Some(actuator);
                }
                Err(e) => {
                    warn!("Unable to create {} actuator: {}", FALLBACK_MODE, e);
                    return Err(ActuatorError::Unavailable);
                }
            }
        }
        Ok(slot)
    }

    /// The live backend, rebuilding keyboard/mouse if nothing is active.
    ///
    /// Do not keep the guard across an await; use the forwarding methods to
    /// emit commands.
    pub async fn current(&self) -> ActuatorResult<MappedMutexGuard<'_, dyn Actuator>> {
        let slot = self.live_slot().await?;
        MutexGuard::try_map(slot, |slot| slot.as_deref_mut()).map_err(|_| ActuatorError::Unavailable)
    }

    /// Mode of the live backend, building keyboard/mouse if nothing is active.
    pub async fn mode(&self) -> ActuatorResult<ActuatorMode> {
        let slot = self.live_slot().await?;
        slot.as_ref()
            .map(|a| a.mode())
            .ok_or(ActuatorError::Unavailable)
    }

    pub async fn current_mode(&self) -> Option<ActuatorMode> {
        self.active.lock().await.as_ref().map(|a| a.mode())
    }

    pub async fn execute(&self, command: ActuatorCommand) -> ActuatorResult<()> {
        let mut slot = self.live_slot().await?;
        match slot.as_mut() {
            Some(actuator) => actuator.execute(command).await,
            None => Err(ActuatorError::Unavailable),
        }
    }

    pub async fn press(&self, action: LogicalAction) -> ActuatorResult<()> {
        self.execute(ActuatorCommand::press(action)).await
    }

    pub async fn hold(&self, action: LogicalAction) -> ActuatorResult<()> {
        self.execute(ActuatorCommand::hold(action)).await
    }

    pub async fn release(&self, action: LogicalAction) -> ActuatorResult<()> {
        self.execute(ActuatorCommand::release(action)).await
    }

    pub async fn set_axis(&self, axis: AxisId, value: i32) -> ActuatorResult<()> {
        let mut slot = self.live_slot().await?;
        match slot.as_mut() {
            Some(actuator) => actuator.set_axis(axis, value).await,
            None => Err(ActuatorError::Unavailable),
        }
    }

    /// Release everything on the active backend. A no-op when none is live.
    pub async fn release_all(&self) -> ActuatorResult<()> {
        let mut slot = self.active.lock().await;
        match slot.as_mut() {
            Some(actuator) => actuator.release_all().await,
            None => Ok(()),
        }
    }

    pub async fn is_pressed(&self, action: LogicalAction) -> bool {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|a| a.is_pressed(action))
            .unwrap_or(false)
    }

    pub async fn dispose(&self) {
        if let Some(mut actuator) = self.active.lock().await.take() {
            actuator.dispose().await;
            info!("{} actuator disposed", actuator.mode());
        }
    }

    async fn build_initialized(&self, mode: ActuatorMode) -> DynResult<Box<dyn Actuator>> {
        let mut actuator = self.registry.build_actuator(mode)?;
        if actuator.initialize().await {
            return Ok(actuator);
        }
        actuator.dispose().await;
        Err(format!("{} actuator failed to initialize", mode).into())
    }
}

/// Classify an actuation failure at the point of use.
pub fn actuation_interrupt(err: ActuatorError) -> Interrupt {
    match err {
        ActuatorError::ReconnectExhausted(_) => Interrupt::fatal(err.to_string()),
        e if e.is_transient() => Interrupt::retry_free(format!("actuation glitch: {}", e)),
        e => Interrupt::retry(format!("actuation failed: {}", e)),
    }
}
