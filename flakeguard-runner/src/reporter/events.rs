// Copyright (c) The flakeguard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Events produced by the rerun scheduler.
//!
//! Events are how the scheduler integrates with the host's reporting: the host is expected to
//! render a synthetic "rerun" entry for every superseded attempt, and to replace the primary
//! pass's outcome with the final status carried by [`RerunEventKind::TestFinished`].

use super::RerunStatsSnapshot;
use crate::{
    config::RerunDelay,
    errors::{DependencyCycleError, TeardownError},
    fixture::{FixtureKey, RetainedBinding},
    host::{AttemptOutcome, Phase, PhaseResult, TestItemId},
    policy::RerunDecision,
    runner::{AttemptRecord, PhaseRecord, TestItem, TestStatus},
};
use chrono::{DateTime, FixedOffset};
use std::{fmt, time::Duration};

/// A rerun event.
///
/// Events are produced by a [`RerunScheduler`](crate::runner::RerunScheduler) and passed to the
/// callback supplied by the host.
#[derive(Clone, Debug)]
pub struct RerunEvent<'a> {
    /// The time at which the event was generated, including the offset from UTC.
    pub timestamp: DateTime<FixedOffset>,

    /// The amount of time elapsed since the scheduler was created.
    pub elapsed: Duration,

    /// The kind of event this is.
    pub kind: RerunEventKind<'a>,
}

/// The kind of rerun event this is.
///
/// Forms part of [`RerunEvent`].
#[derive(Clone, Debug)]
pub enum RerunEventKind<'a> {
    /// An attempt of a test finished, and the scheduler has decided what happens next.
    AttemptFinished {
        /// The test.
        test_id: &'a TestItemId,

        /// The attempt that finished.
        attempt: &'a AttemptRecord,

        /// The maximum number of attempts for the test.
        max_attempts: usize,

        /// How the attempt should be reported. Failing attempts that will be rerun are reported
        /// as [`ReportOutcome::Rerun`].
        report_outcome: ReportOutcome,
    },

    /// The rerun policy made a decision for a failed test.
    RerunDecided {
        /// The test.
        test_id: &'a TestItemId,

        /// The decision.
        decision: RerunDecision,

        /// The test's attempt count after the decision.
        attempt_count: usize,

        /// The maximum number of attempts for the test.
        max_attempts: usize,

        /// The number of distinct tests that have failed in this session so far.
        distinct_failed: usize,
    },

    /// The primary pass is complete, and queued reruns are about to start.
    RerunPassStarted {
        /// The number of tests waiting in the queue.
        queued: usize,
    },

    /// A rerun of a test is starting. Fixtures haven't been invalidated yet.
    RerunStarted {
        /// The test.
        test_id: &'a TestItemId,

        /// The attempt number of the rerun.
        attempt: usize,

        /// The maximum number of attempts for the test.
        max_attempts: usize,

        /// The delay that will be waited after invalidation.
        delay: RerunDelay,
    },

    /// A test's fixtures were invalidated ahead of a rerun.
    FixturesInvalidated {
        /// The test.
        test_id: &'a TestItemId,

        /// The attempt the invalidation precedes.
        attempt: usize,

        /// Fixtures whose finalizers ran successfully.
        invalidated: &'a [FixtureKey],

        /// Fixtures that were kept, with the reason.
        retained: &'a [RetainedBinding],
    },

    /// A fixture finalizer raised during invalidation.
    ///
    /// This is reported separately from the test's own failure.
    TeardownFailed {
        /// The error.
        error: &'a TeardownError,
    },

    /// A dependency cycle was found between a test's fixtures. Only reported the first time a
    /// cycle is seen.
    DependencyCycle {
        /// The error.
        error: &'a DependencyCycleError,
    },

    /// A test reached its final status.
    ///
    /// This status supersedes the outcome recorded by the primary pass.
    TestFinished {
        /// The test.
        item: &'a TestItem,

        /// The final status.
        status: TestStatus,
    },

    /// The session was aborted by the host while tests were still queued.
    RunAborted {
        /// The number of queued tests that will not be rerun.
        pending: usize,
    },

    /// The run finished.
    RunFinished {
        /// The time at which the scheduler was created.
        start_time: DateTime<FixedOffset>,

        /// Statistics for the run.
        stats: RerunStatsSnapshot,
    },
}

impl RerunEventKind<'_> {
    /// Returns a short, stable name for the kind of event.
    pub fn name(&self) -> &'static str {
        match self {
            RerunEventKind::AttemptFinished { .. } => "attempt-finished",
            RerunEventKind::RerunDecided { .. } => "rerun-decided",
            RerunEventKind::RerunPassStarted { .. } => "rerun-pass-started",
            RerunEventKind::RerunStarted { .. } => "rerun-started",
            RerunEventKind::FixturesInvalidated { .. } => "fixtures-invalidated",
            RerunEventKind::TeardownFailed { .. } => "teardown-failed",
            RerunEventKind::DependencyCycle { .. } => "dependency-cycle",
            RerunEventKind::TestFinished { .. } => "test-finished",
            RerunEventKind::RunAborted { .. } => "run-aborted",
            RerunEventKind::RunFinished { .. } => "run-finished",
        }
    }
}

/// How a single phase or attempt is reported.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ReportOutcome {
    /// Passed.
    Passed,

    /// The test body failed.
    Failed,

    /// Setup or teardown failed.
    Error,

    /// Skipped.
    Skipped,

    /// Failed as expected.
    ExpectedFailure,

    /// Passed, but was expected to fail.
    UnexpectedPass,

    /// Failed, and was superseded by a rerun.
    Rerun,
}

impl ReportOutcome {
    /// Returns the outcome for an attempt, given whether it is going to be rerun.
    pub fn for_attempt(outcome: AttemptOutcome, rerun: bool) -> Self {
        match outcome {
            AttemptOutcome::Passed => ReportOutcome::Passed,
            AttemptOutcome::Failed | AttemptOutcome::Error if rerun => ReportOutcome::Rerun,
            AttemptOutcome::Failed => ReportOutcome::Failed,
            AttemptOutcome::Error => ReportOutcome::Error,
        }
    }

    /// Returns the outcome for a single phase, given whether the attempt it belongs to is going to
    /// be rerun.
    pub fn for_phase(record: &PhaseRecord, rerun: bool) -> Self {
        if record.failed {
            if rerun {
                ReportOutcome::Rerun
            } else if record.phase == Phase::Call {
                ReportOutcome::Failed
            } else {
                ReportOutcome::Error
            }
        } else {
            match record.result {
                PhaseResult::Passed | PhaseResult::Failed => ReportOutcome::Passed,
                PhaseResult::Skipped => ReportOutcome::Skipped,
                PhaseResult::ExpectedFailure => ReportOutcome::ExpectedFailure,
                PhaseResult::UnexpectedPass => ReportOutcome::UnexpectedPass,
            }
        }
    }

    /// Returns the short code used in the result log.
    pub fn code(self) -> char {
        match self {
            ReportOutcome::Passed => '.',
            ReportOutcome::Failed => 'F',
            ReportOutcome::Error => 'E',
            ReportOutcome::Skipped => 's',
            ReportOutcome::ExpectedFailure => 'x',
            ReportOutcome::UnexpectedPass => 'X',
            ReportOutcome::Rerun => 'R',
        }
    }

    /// Returns the word used for the outcome in verbose output.
    pub fn word(self) -> &'static str {
        match self {
            ReportOutcome::Passed => "PASSED",
            ReportOutcome::Failed => "FAILED",
            ReportOutcome::Error => "ERROR",
            ReportOutcome::Skipped => "SKIPPED",
            ReportOutcome::ExpectedFailure => "XFAIL",
            ReportOutcome::UnexpectedPass => "XPASS",
            ReportOutcome::Rerun => "RERUN",
        }
    }
}

impl fmt::Display for ReportOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.word())
    }
}
