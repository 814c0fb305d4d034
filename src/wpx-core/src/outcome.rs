// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Failure taxonomy and terminal run status.
//!
//! Every phase of waypoint execution returns a [`PhaseResult`]. The error
//! side is an [`Interrupt`]: either a classified [`Failure`] or a request to
//! end the route early. The route runner pattern-matches on it to decide
//! between retrying, aborting and unwinding.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::geometry::Point2;

/// How the route runner reacts to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RetryClassification {
    /// Restart the segment, consuming one attempt.
    RetryWithBudget,
    /// Restart the segment without consuming an attempt.
    RetryFree,
    /// Stop the route and surface the failure.
    Fatal,
    /// Cooperative cancellation was observed.
    Cancelled,
}

/// Where a failure happened.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FailureContext {
    pub segment: Option<usize>,
    pub waypoint: Option<usize>,
    pub position: Option<Point2>,
    pub distance: Option<f64>,
}

impl fmt::Display for FailureContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = Vec::new();
        if let Some(s) = self.segment {
            parts.push(format!("segment={}", s));
        }
        if let Some(w) = self.waypoint {
            parts.push(format!("waypoint={}", w));
        }
        if let Some(p) = self.position {
            parts.push(format!("position={}", p));
        }
        if let Some(d) = self.distance {
            parts.push(format!("distance={:.1}", d));
        }
        f.write_str(&parts.join(" "))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Failure {
    pub classification: RetryClassification,
    pub reason: String,
    pub context: FailureContext,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.classification, self.reason)?;
        let ctx = self.context.to_string();
        if !ctx.is_empty() {
            write!(f, " ({})", ctx)?;
        }
        Ok(())
    }
}

/// Non-success exit from a phase.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Interrupt {
    #[error("{0}")]
    Failed(Failure),

    /// The route is done early, e.g. an end condition matched.
    #[error("route finished: {0}")]
    Finished(String),
}

impl Interrupt {
    fn failure(classification: RetryClassification, reason: impl Into<String>) -> Self {
        Self::Failed(Failure {
            classification,
            reason: reason.into(),
            context: FailureContext::default(),
        })
    }

    pub fn retry(reason: impl Into<String>) -> Self {
        Self::failure(RetryClassification::RetryWithBudget, reason)
    }

    pub fn retry_free(reason: impl Into<String>) -> Self {
        Self::failure(RetryClassification::RetryFree, reason)
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::failure(RetryClassification::Fatal, reason)
    }

    pub fn cancelled() -> Self {
        Self::failure(RetryClassification::Cancelled, "cancellation requested")
    }

    pub fn finished(reason: impl Into<String>) -> Self {
        Self::Finished(reason.into())
    }

    pub fn classification(&self) -> Option<RetryClassification> {
        match self {
            Self::Failed(f) => Some(f.classification),
            Self::Finished(_) => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.classification() == Some(RetryClassification::Cancelled)
    }

    /// Fill in location fields that are still unset.
    pub fn at(mut self, segment: usize, waypoint: usize) -> Self {
        if let Self::Failed(f) = &mut self {
            f.context.segment.get_or_insert(segment);
            f.context.waypoint.get_or_insert(waypoint);
        }
        self
    }

    /// Attach the last known position and distance to target.
    pub fn near(mut self, position: Point2, distance: f64) -> Self {
        if let Self::Failed(f) = &mut self {
            f.context.position.get_or_insert(position);
            f.context.distance.get_or_insert(distance);
        }
        self
    }
}

pub type PhaseResult<T = ()> = Result<T, Interrupt>;

/// Terminal state of a route run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "failure")]
pub enum RunStatus {
    SuccessComplete,
    Aborted(Failure),
    Cancelled,
}

impl RunStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::SuccessComplete)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SuccessComplete => write!(f, "SuccessComplete"),
            Self::Aborted(failure) => write!(f, "Aborted({})", failure),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_fills_only_unset_fields() {
        let interrupt = Interrupt::fatal("stuck").at(1, 4).at(7, 7);
        let Interrupt::Failed(failure) = interrupt else {
            panic!("expected failure");
        };
        assert_eq!(failure.context.segment, Some(1));
        assert_eq!(failure.context.waypoint, Some(4));
    }

    #[test]
    fn test_failure_display_includes_context() {
        let interrupt = Interrupt::retry("overshoot")
            .at(0, 2)
            .near(Point2::new(3.0, 4.0), 12.5);
        let text = interrupt.to_string();
        assert!(text.contains("RetryWithBudget: overshoot"));
        assert!(text.contains("segment=0"));
        assert!(text.contains("waypoint=2"));
        assert!(text.contains("distance=12.5"));
    }

    #[test]
    fn test_finished_has_no_classification() {
        assert_eq!(Interrupt::finished("done").classification(), None);
        assert!(Interrupt::cancelled().is_cancelled());
    }

    #[test]
    fn test_run_status_serializes_tagged() {
        let json = serde_json::to_string(&RunStatus::Cancelled).unwrap();
        assert_eq!(json, r#"{"status":"Cancelled"}"#);
    }
}
