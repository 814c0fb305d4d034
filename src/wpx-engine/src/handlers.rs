// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Action handler registry and the built-in actions.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use wpx_app::normalize_name;
use wpx_core::actuator::LogicalAction;
use wpx_core::context::RunContext;
use wpx_core::handler::{ActionHandler, HandlerError, HandlerFuture, HandlerPhase};
use wpx_core::route::{MoveMode, Waypoint};

use crate::router::ActuatorRouter;

pub const LOG_OUTPUT: &str = "log_output";
pub const STOP_FLYING: &str = "stop_flying";

/// Handlers keyed by phase and normalized action tag.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<(HandlerPhase, String), Arc<dyn ActionHandler>>,
    teleport: Option<Arc<dyn ActionHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `log_output` and `stop_flying` already present.
    pub fn with_builtins(router: Arc<ActuatorRouter>) -> Self {
        let mut registry = Self::new();
        registry.register(HandlerPhase::Before, LOG_OUTPUT, LogOutputHandler);
        registry.register(
            HandlerPhase::BeforeCloseApproach,
            STOP_FLYING,
            StopFlyingHandler { router },
        );
        registry
    }

    /// Register (or replace) the handler for `tag` in `phase`.
    pub fn register<H>(&mut self, phase: HandlerPhase, tag: &str, handler: H)
    where
        H: ActionHandler + 'static,
    {
        self.handlers
            .insert((phase, normalize_name(tag)), Arc::new(handler));
    }

    pub fn get(&self, phase: HandlerPhase, tag: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(&(phase, normalize_name(tag))).cloned()
    }

    pub fn is_registered(&self, phase: HandlerPhase, tag: &str) -> bool {
        self.handlers.contains_key(&(phase, normalize_name(tag)))
    }

    /// Handler that moves the agent to a teleport waypoint.
    pub fn set_teleport_handler<H>(&mut self, handler: H)
    where
        H: ActionHandler + 'static,
    {
        self.teleport = Some(Arc::new(handler));
    }

    pub fn teleport_handler(&self) -> Option<Arc<dyn ActionHandler>> {
        self.teleport.clone()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Writes the waypoint's `log_info` to the log.
pub struct LogOutputHandler;

impl ActionHandler for LogOutputHandler {
    fn run<'a>(&'a self, _ctx: &'a RunContext, waypoint: &'a Waypoint) -> HandlerFuture<'a> {
        Box::pin(async move {
            match waypoint.log_info.as_deref() {
                Some(text) if !text.trim().is_empty() => info!("{}", text),
                _ => info!("Reached {}", waypoint),
            }
            Ok(())
        })
    }
}

/// Drops out of flight before the close approach of a `fly` waypoint.
pub struct StopFlyingHandler {
    router: Arc<ActuatorRouter>,
}

const STOP_FLYING_SETTLE_MS: u64 = 500;

impl StopFlyingHandler {
    async fn stop(&self, ctx: &RunContext, waypoint: &Waypoint) -> Result<(), HandlerError> {
        if waypoint.move_mode != MoveMode::Fly {
            return Ok(());
        }
        self.router
            .release(LogicalAction::MoveForward)
            .await
            .map_err(|e| HandlerError::Failed(e.to_string()))?;
        self.router
            .press(LogicalAction::Drop)
            .await
            .map_err(|e| HandlerError::Failed(e.to_string()))?;
        ctx.sleep_ms(STOP_FLYING_SETTLE_MS).await?;
        Ok(())
    }
}

impl ActionHandler for StopFlyingHandler {
    fn run<'a>(&'a self, ctx: &'a RunContext, waypoint: &'a Waypoint) -> HandlerFuture<'a> {
        Box::pin(async move { StopFlyingHandler::stop(self, ctx, waypoint).await })
    }
}
