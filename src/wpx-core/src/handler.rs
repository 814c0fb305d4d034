// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Per-action handler contract.
//!
//! Handlers run before or after a waypoint is reached. Their errors are
//! re-classified here, at the point of use, into route-level interrupts.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::context::RunContext;
use crate::outcome::{Interrupt, RetryClassification};
use crate::route::Waypoint;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HandlerError {
    /// Ordinary failure; the segment is retried against its budget.
    #[error("handler failed: {0}")]
    Failed(String),

    #[error("handler requested retry: {0}")]
    Retry(String),

    #[error("handler lost track of the screen: {0}")]
    RetryFree(String),

    #[error("handler failed irrecoverably: {0}")]
    Fatal(String),

    /// The handler decided the whole route is done.
    #[error("handler finished the route: {0}")]
    Finished(String),

    #[error("handler cancelled")]
    Cancelled,
}

impl HandlerError {
    /// Re-classify into a route interrupt, logging plain failures.
    pub fn into_interrupt(self, tag: &str) -> Interrupt {
        match self {
            Self::Failed(reason) => {
                warn!("Handler '{}' failed: {}", tag, reason);
                Interrupt::retry(format!("handler '{}' failed: {}", tag, reason))
            }
            Self::Retry(reason) => Interrupt::retry(reason),
            Self::RetryFree(reason) => Interrupt::retry_free(reason),
            Self::Fatal(reason) => Interrupt::fatal(format!("handler '{}': {}", tag, reason)),
            Self::Finished(reason) => Interrupt::finished(reason),
            Self::Cancelled => Interrupt::cancelled(),
        }
    }
}

impl From<Interrupt> for HandlerError {
    fn from(interrupt: Interrupt) -> Self {
        match interrupt {
            Interrupt::Finished(reason) => Self::Finished(reason),
            Interrupt::Failed(failure) => match failure.classification {
                RetryClassification::RetryWithBudget => Self::Retry(failure.reason),
                RetryClassification::RetryFree => Self::RetryFree(failure.reason),
                RetryClassification::Fatal => Self::Fatal(failure.reason),
                RetryClassification::Cancelled => Self::Cancelled,
            },
        }
    }
}

pub type HandlerResult = Result<(), HandlerError>;

/// Alias to reduce type complexity in `ActionHandler`.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = HandlerResult> + Send + 'a>>;

/// When a handler runs relative to the waypoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerPhase {
    /// Before the movement towards the waypoint starts.
    Before,
    /// Between the approach and the pulsed close approach.
    BeforeCloseApproach,
    /// Once the waypoint is reached.
    After,
}

pub trait ActionHandler: Send + Sync {
    fn run<'a>(&'a self, ctx: &'a RunContext, waypoint: &'a Waypoint) -> HandlerFuture<'a>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_maps_to_budgeted_retry() {
        let interrupt = HandlerError::Failed("no loot".into()).into_interrupt("pick_around");
        assert_eq!(
            interrupt.classification(),
            Some(RetryClassification::RetryWithBudget)
        );
        assert!(interrupt.to_string().contains("pick_around"));
    }

    #[test]
    fn test_classification_mapping() {
        let cases = [
            (HandlerError::Retry("x".into()), Some(RetryClassification::RetryWithBudget)),
            (HandlerError::RetryFree("x".into()), Some(RetryClassification::RetryFree)),
            (HandlerError::Fatal("x".into()), Some(RetryClassification::Fatal)),
            (HandlerError::Cancelled, Some(RetryClassification::Cancelled)),
            (HandlerError::Finished("x".into()), None),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_interrupt("t").classification(), expected);
        }
    }

    #[test]
    fn test_interrupt_round_trips_through_handler_error() {
        let err: HandlerError = Interrupt::cancelled().into();
        assert_eq!(err, HandlerError::Cancelled);
        let err: HandlerError = Interrupt::retry_free("ui").into();
        assert_eq!(err, HandlerError::RetryFree("ui".into()));
    }
}
