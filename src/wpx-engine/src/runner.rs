// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Route lifecycle: start, cancel, retry, and the terminal status.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use wpx_core::context::{CancelHandle, RunContext};
use wpx_core::controller::{FixedDelay, RetryPolicy, RunEventEmitter};
use wpx_core::outcome::{Failure, FailureContext, Interrupt, RetryClassification, RunStatus};
use wpx_core::route::{Route, Segment};
use wpx_core::sensor::{EndCondition, Sensor};

use crate::config::EngineConfig;
use crate::executor::WaypointExecutor;
use crate::handlers::HandlerRegistry;
use crate::router::ActuatorRouter;

/// Assembles everything a run needs; consumed by [`RouteRunner::start`].
pub struct RouteRunner {
    router: Arc<ActuatorRouter>,
    sensor: Arc<dyn Sensor>,
    handlers: HandlerRegistry,
    config: EngineConfig,
    events: RunEventEmitter,
    end_condition: Option<EndCondition>,
}

impl RouteRunner {
    pub fn new(
        router: Arc<ActuatorRouter>,
        sensor: Arc<dyn Sensor>,
        handlers: HandlerRegistry,
        config: EngineConfig,
    ) -> Self {
        Self {
            router,
            sensor,
            handlers,
            config,
            events: RunEventEmitter::new(),
            end_condition: None,
        }
    }

    pub fn events_mut(&mut self) -> &mut RunEventEmitter {
        &mut self.events
    }

    pub fn with_end_condition(mut self, condition: EndCondition) -> Self {
        self.end_condition = Some(condition);
        self
    }

    /// Spawn the control loop for `route` on the current runtime.
    pub fn start(self, route: Route) -> RunHandle {
        let run_id = Uuid::new_v4();
        let (cancel, ctx) = RunContext::new();
        let (status_tx, status_rx) = watch::channel(None);

        let events = Arc::new(self.events);
        let mut executor = WaypointExecutor::new(
            self.router.clone(),
            self.sensor,
            Arc::new(self.handlers),
            events.clone(),
            &self.config,
        );
        if let Some(condition) = self.end_condition {
            executor = executor.with_end_condition(condition);
        }
        let nav = self.config.navigation;
        let mut run = RouteRun {
            executor,
            router: self.router.clone(),
            events,
            policy: FixedDelay::new(nav.retry_times, Duration::from_millis(nav.retry_delay_ms))
                .with_free_retry_limit(nav.free_retry_limit),
            segment_timeout: nav.segment_timeout(),
        };

        info!(
            "Starting run {} of route '{}' ({} waypoints)",
            run_id,
            route.info.name,
            route.positions.len()
        );
        let task = tokio::spawn(async move {
            let status = run.run(&ctx, &route.segments()).await;
            info!("Run {} finished: {}", run_id, status);
            status_tx.send_replace(Some(status.clone()));
            status
        });

        RunHandle {
            run_id,
            router: self.router,
            cancel,
            status: status_rx,
            task,
        }
    }
}

/// Handle to a running route.
pub struct RunHandle {
    run_id: Uuid,
    router: Arc<ActuatorRouter>,
    cancel: CancelHandle,
    status: watch::Receiver<Option<RunStatus>>,
    task: JoinHandle<RunStatus>,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Ask the control loop to stop at its next suspension point.
    pub fn request_cancel(&self) {
        if !self.cancel.is_cancelled() {
            info!("Cancellation requested for run {}", self.run_id);
        }
        self.cancel.cancel();
    }

    /// Terminal status, once the run has ended.
    pub fn status(&self) -> Option<RunStatus> {
        self.status.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.status.borrow().is_some()
    }

    pub fn is_success_complete(&self) -> bool {
        matches!(*self.status.borrow(), Some(RunStatus::SuccessComplete))
    }

    /// Resolves once the run has a terminal status.
    pub async fn finished(&mut self) {
        let _ = self.status.wait_for(|status| status.is_some()).await;
    }

    /// Join the control task. A task that died without finishing has its
    /// held inputs released here.
    pub async fn wait(self) -> RunStatus {
        match self.task.await {
            Ok(status) => status,
            Err(e) => {
                error!("Run {} task failed: {}", self.run_id, e);
                if let Err(e) = self.router.release_all().await {
                    warn!("Release after failed run {} failed: {}", self.run_id, e);
                }
                RunStatus::Aborted(Failure {
                    classification: RetryClassification::Fatal,
                    reason: format!("control loop failed: {}", e),
                    context: FailureContext::default(),
                })
            }
        }
    }
}

enum SegmentFlow {
    Next,
    Stop(RunStatus),
}

struct RouteRun {
    executor: WaypointExecutor,
    router: Arc<ActuatorRouter>,
    events: Arc<RunEventEmitter>,
    policy: FixedDelay,
    segment_timeout: Duration,
}

impl RouteRun {
    async fn run(&mut self, ctx: &RunContext, segments: &[Segment]) -> RunStatus {
        let mut status = RunStatus::SuccessComplete;
        for segment in segments {
            if let SegmentFlow::Stop(stop) = self.run_segment(ctx, segment).await {
                status = stop;
                break;
            }
        }
        if let Err(e) = self.router.release_all().await {
            warn!("Release at end of run failed: {}", e);
        }
        self.events.notify_run_finished(&status);
        status
    }

    async fn run_segment(&mut self, ctx: &RunContext, segment: &Segment) -> SegmentFlow {
        let mut attempt = 1u32;
        let mut free_retries = 0u32;
        loop {
            info!(
                "Segment {} attempt {}/{}",
                segment.index,
                attempt,
                self.policy.max_attempts()
            );
            self.events.notify_segment_start(segment.index, attempt);

            let attempt_ctx = ctx.with_deadline(self.segment_timeout);
            let result = self.executor.run_segment(&attempt_ctx, segment).await;
            if let Err(e) = self.router.release_all().await {
                warn!("Release after segment {} failed: {}", segment.index, e);
            }
            if ctx.is_cancelled() {
                return SegmentFlow::Stop(RunStatus::Cancelled);
            }

            let failure = match result {
                Ok(()) => return SegmentFlow::Next,
                Err(Interrupt::Finished(reason)) => {
                    info!("Route ended early: {}", reason);
                    return SegmentFlow::Stop(RunStatus::SuccessComplete);
                }
                Err(Interrupt::Failed(failure)) => failure,
            };

            match failure.classification {
                RetryClassification::Cancelled => return SegmentFlow::Stop(RunStatus::Cancelled),
                RetryClassification::Fatal => {
                    error!("Segment {} failed: {}", segment.index, failure);
                    return SegmentFlow::Stop(RunStatus::Aborted(failure));
                }
                RetryClassification::RetryFree => {
                    free_retries += 1;
                    if free_retries > self.policy.free_retry_limit() {
                        error!(
                            "Segment {} kept losing track after {} free retries: {}",
                            segment.index, self.policy.free_retry_limit(), failure
                        );
                        return SegmentFlow::Stop(RunStatus::Aborted(Failure {
                            classification: RetryClassification::Fatal,
                            reason: format!("irrecoverable misrecognition: {}", failure.reason),
                            context: failure.context,
                        }));
                    }
                }
                RetryClassification::RetryWithBudget => {
                    if !self.policy.should_retry(attempt, failure.classification) {
                        error!(
                            "Segment {} out of attempts ({}): {}",
                            segment.index, attempt, failure
                        );
                        return SegmentFlow::Stop(RunStatus::Aborted(failure));
                    }
                    attempt += 1;
                }
            }

            warn!("Retrying segment {}: {}", segment.index, failure);
            self.events.notify_segment_retry(segment.index, &failure);
            if ctx.sleep(self.policy.delay(attempt)).await.is_err() {
                return SegmentFlow::Stop(RunStatus::Cancelled);
            }
        }
    }
}
