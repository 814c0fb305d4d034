// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Cooperative cancellation and deadlines for a route run.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::outcome::{Interrupt, PhaseResult};

/// Requests cancellation of every [`RunContext`] created alongside it.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Explicit context threaded through every phase of execution.
///
/// Each suspension point calls [`RunContext::check`] or
/// [`RunContext::sleep`], which turn a cancel request into
/// `Interrupt` with `Cancelled` classification and an elapsed deadline into a
/// `Fatal` one.
#[derive(Debug, Clone)]
pub struct RunContext {
    cancel_rx: watch::Receiver<bool>,
    deadline: Option<Instant>,
}

impl RunContext {
    pub fn new() -> (CancelHandle, RunContext) {
        let (tx, rx) = watch::channel(false);
        (
            CancelHandle { tx: Arc::new(tx) },
            RunContext {
                cancel_rx: rx,
                deadline: None,
            },
        )
    }

    /// Derive a context that additionally expires after `budget`.
    pub fn with_deadline(&self, budget: Duration) -> RunContext {
        RunContext {
            cancel_rx: self.cancel_rx.clone(),
            deadline: Some(Instant::now() + budget),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    pub fn deadline_exceeded(&self) -> bool {
        self.deadline
            .map(|deadline| Instant::now() >= deadline)
            .unwrap_or(false)
    }

    pub fn check(&self) -> PhaseResult {
        if self.is_cancelled() {
            return Err(Interrupt::cancelled());
        }
        if self.deadline_exceeded() {
            return Err(Interrupt::fatal("segment exceeded its time budget"));
        }
        Ok(())
    }

    /// Resolves once cancellation is requested. Never resolves if the
    /// cancel handle was dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.cancel_rx.clone();
        if *rx.borrow() {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
        std::future::pending::<()>().await;
    }

    /// Sleep for `duration` unless cancelled first.
    pub async fn sleep(&self, duration: Duration) -> PhaseResult {
        self.check()?;
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.cancelled() => return Err(Interrupt::cancelled()),
        }
        self.check()
    }

    pub async fn sleep_ms(&self, millis: u64) -> PhaseResult {
        self.sleep(Duration::from_millis(millis)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::RetryClassification;

    #[tokio::test(start_paused = true)]
    async fn test_sleep_completes_without_cancel() {
        let (_handle, ctx) = RunContext::new();
        assert!(ctx.sleep_ms(500).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_sleep() {
        let (handle, ctx) = RunContext::new();
        let sleeper = tokio::spawn(async move { ctx.sleep(Duration::from_secs(60)).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.cancel();
        let result = sleeper.await.unwrap();
        assert!(result.unwrap_err().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_is_fatal() {
        let (_handle, ctx) = RunContext::new();
        let ctx = ctx.with_deadline(Duration::from_secs(1));
        assert!(ctx.check().is_ok());
        let err = ctx.sleep(Duration::from_secs(2)).await.unwrap_err();
        assert_eq!(err.classification(), Some(RetryClassification::Fatal));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_wins_over_deadline() {
        let (handle, ctx) = RunContext::new();
        let ctx = ctx.with_deadline(Duration::from_millis(1));
        tokio::time::sleep(Duration::from_millis(5)).await;
        handle.cancel();
        assert!(ctx.check().unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_dropped_handle_never_cancels() {
        let (handle, ctx) = RunContext::new();
        drop(handle);
        assert!(!ctx.is_cancelled());
        let waited =
            tokio::time::timeout(Duration::from_millis(20), ctx.cancelled()).await;
        assert!(waited.is_err());
    }
}
