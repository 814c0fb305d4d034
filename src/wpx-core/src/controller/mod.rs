// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Route controller components.
//!
//! This module contains the segment state machine, the run event emitter
//! and the retry and polling policies used by the route runner.

pub mod events;
pub mod machine;
pub mod policies;

pub use events::{ListenerId, RunEventEmitter, RunListener};
pub use machine::{SegmentEvent, SegmentMachine, SegmentState};
pub use policies::{
    FixedDelay, FixedPolling, PhasePolling, PollPhase, PollingPolicy, RetryPolicy,
};
