// Copyright (c) The flakeguard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    config::{RerunDelay, TestSettings},
    errors::TeardownError,
    host::{
        AttemptOutcome, AttemptReports, Phase, PhaseReport, PhaseResult, TestHost, TestItemId,
    },
    time::StopwatchSnapshot,
};
use chrono::{DateTime, Local};
use flakeguard_metadata::{PhaseTraces, RerunTestStatus};
use std::{fmt, time::Duration};

/// One test tracked by the scheduler.
///
/// Created when the test is registered with the scheduler, and mutated only by it.
#[derive(Clone, Debug)]
pub struct TestItem {
    id: TestItemId,
    settings: TestSettings,
    attempt_count: usize,
    state: RerunState,
    attempts: Vec<AttemptRecord>,
    teardown_errors: Vec<TeardownError>,
    caveats: Vec<String>,
    status: Option<TestStatus>,
}

impl TestItem {
    /// Creates a new item that hasn't run yet.
    pub fn new(id: TestItemId, settings: TestSettings) -> Self {
        Self {
            id,
            settings,
            attempt_count: 0,
            state: RerunState::FirstRun,
            attempts: Vec::new(),
            teardown_errors: Vec::new(),
            caveats: Vec::new(),
            status: None,
        }
    }

    /// Returns the identifier of the test.
    pub fn id(&self) -> &TestItemId {
        &self.id
    }

    /// Returns the resolved settings for this test.
    pub fn settings(&self) -> &TestSettings {
        &self.settings
    }

    /// Returns the number of attempts counted so far, including the primary attempt and any
    /// accepted rerun that hasn't run yet.
    pub fn attempt_count(&self) -> usize {
        self.attempt_count
    }

    /// Returns the maximum number of attempts for this test.
    pub fn max_attempts(&self) -> usize {
        self.settings.max_attempts()
    }

    /// Returns the delay to wait before each rerun of this test.
    pub fn delay(&self) -> RerunDelay {
        self.settings.delay()
    }

    /// Returns the current state of the test.
    pub fn state(&self) -> RerunState {
        self.state
    }

    /// Returns the final status of the test, or `None` if it hasn't finished.
    pub fn status(&self) -> Option<TestStatus> {
        self.status
    }

    /// Returns every attempt that was executed, the primary attempt first.
    pub fn attempts(&self) -> &[AttemptRecord] {
        &self.attempts
    }

    /// Returns the primary attempt, if it has been recorded.
    pub fn primary_attempt(&self) -> Option<&AttemptRecord> {
        self.attempts.first()
    }

    /// Returns the rerun attempts that were executed.
    pub fn reruns(&self) -> &[AttemptRecord] {
        self.attempts.get(1..).unwrap_or_default()
    }

    /// Returns the last attempt that was executed.
    pub fn last_attempt(&self) -> Option<&AttemptRecord> {
        self.attempts.last()
    }

    /// Returns the errors raised by fixture finalizers while this test's fixtures were being
    /// invalidated.
    pub fn teardown_errors(&self) -> &[TeardownError] {
        &self.teardown_errors
    }

    /// Returns caveats about how this test was rerun, such as fixtures that could not be
    /// invalidated.
    pub fn caveats(&self) -> &[String] {
        &self.caveats
    }

    /// Returns true if any attempt of this test did not pass.
    pub fn ever_failed(&self) -> bool {
        self.attempts
            .iter()
            .any(|attempt| !attempt.outcome.is_success())
    }

    // ---
    // Mutators, used by the policy and the scheduler
    // ---

    pub(crate) fn start_primary(&mut self) {
        debug_assert_eq!(self.attempt_count, 0, "primary attempt runs once");
        self.attempt_count = 1;
    }

    pub(crate) fn accept_attempt(&mut self) {
        debug_assert!(
            self.attempt_count < self.max_attempts(),
            "accepted attempt exceeds max attempts"
        );
        self.attempt_count += 1;
    }

    /// Gives back an accepted attempt that will never run, for example because the session was
    /// aborted before the rerun started.
    pub(crate) fn cancel_pending_attempt(&mut self) {
        self.attempt_count = self.attempt_count.saturating_sub(1).max(self.attempts.len());
    }

    pub(crate) fn set_state(&mut self, state: RerunState) {
        self.state = state;
    }

    pub(crate) fn push_attempt(&mut self, record: AttemptRecord) {
        self.attempts.push(record);
    }

    pub(crate) fn extend_teardown_errors(
        &mut self,
        errors: impl IntoIterator<Item = TeardownError>,
    ) {
        self.teardown_errors.extend(errors);
    }

    pub(crate) fn push_caveat(&mut self, caveat: String) {
        if !self.caveats.contains(&caveat) {
            self.caveats.push(caveat);
        }
    }

    /// Marks the test as finished, computing its final status from its attempts.
    pub(crate) fn finish(&mut self) -> TestStatus {
        let status = TestStatus::from_attempts(&self.attempts);
        self.state = match status {
            TestStatus::Passed => RerunState::Passed,
            TestStatus::Flaky => RerunState::Resolved,
            TestStatus::Failed | TestStatus::Error => RerunState::FailedFinal,
        };
        self.status = Some(status);
        status
    }
}

/// The state of a [`TestItem`] within the scheduler.
///
/// ```text
/// FirstRun -> PendingRerun -> Retrying -> Resolved
///                  ^             |
///                  +-------------+-----> FailedFinal
/// ```
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RerunState {
    /// The primary attempt hasn't completed yet.
    FirstRun,

    /// The test failed and is waiting in the deferred queue.
    PendingRerun,

    /// A rerun of the test is in progress.
    Retrying,

    /// The test passed after failing at least once.
    Resolved,

    /// The test failed, and will not be rerun again.
    FailedFinal,

    /// The primary attempt passed.
    Passed,
}

impl RerunState {
    /// Returns true if the test won't run again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RerunState::Resolved | RerunState::FailedFinal | RerunState::Passed
        )
    }
}

/// The final status of a test.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TestStatus {
    /// The test passed on its primary attempt.
    Passed,

    /// The test failed at least once, then passed.
    Flaky,

    /// The test body failed on the last attempt.
    Failed,

    /// Setup or teardown failed on the last attempt.
    Error,
}

impl TestStatus {
    /// Computes the final status from a list of attempts, the primary attempt first.
    pub fn from_attempts(attempts: &[AttemptRecord]) -> Self {
        match attempts.split_last() {
            None => TestStatus::Failed,
            Some((last, earlier)) => match last.outcome {
                AttemptOutcome::Passed if earlier.is_empty() => TestStatus::Passed,
                AttemptOutcome::Passed => TestStatus::Flaky,
                AttemptOutcome::Failed => TestStatus::Failed,
                AttemptOutcome::Error => TestStatus::Error,
            },
        }
    }

    /// Returns true if the test ultimately passed.
    pub fn is_success(self) -> bool {
        matches!(self, TestStatus::Passed | TestStatus::Flaky)
    }

    /// Returns the name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            TestStatus::Passed => "passed",
            TestStatus::Flaky => "flaky",
            TestStatus::Failed => "failed",
            TestStatus::Error => "error",
        }
    }

    /// Returns the status written to the statistics artifact. Tests that never failed aren't
    /// written there.
    pub fn to_summary(self) -> Option<RerunTestStatus> {
        match self {
            TestStatus::Passed => None,
            TestStatus::Flaky => Some(RerunTestStatus::Flaky),
            TestStatus::Failed | TestStatus::Error => Some(RerunTestStatus::Failed),
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One executed attempt of a test. Immutable once created.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AttemptRecord {
    /// The 1-based attempt number. The primary attempt is attempt 1.
    pub attempt: usize,

    /// The classified outcome.
    pub outcome: AttemptOutcome,

    /// The setup phase.
    pub setup: PhaseRecord,

    /// The call phase. Absent if setup failed.
    pub call: Option<PhaseRecord>,

    /// The teardown phase.
    pub teardown: PhaseRecord,

    /// The time at which the attempt started.
    pub start_time: DateTime<Local>,

    /// The time the attempt took.
    pub duration: Duration,

    /// The delay that was waited before the attempt. Zero for the primary attempt.
    pub delay: Duration,
}

impl AttemptRecord {
    pub(crate) fn new<H: TestHost + ?Sized>(
        host: &H,
        attempt: usize,
        reports: &AttemptReports,
        time_taken: StopwatchSnapshot,
        delay: Duration,
    ) -> Self {
        let outcome = AttemptOutcome::classify(reports, |report| host.is_failure(report));
        Self {
            attempt,
            outcome,
            setup: PhaseRecord::new(host, &reports.setup),
            call: reports
                .call
                .as_ref()
                .map(|report| PhaseRecord::new(host, report)),
            teardown: PhaseRecord::new(host, &reports.teardown),
            start_time: time_taken.start_time,
            duration: time_taken.duration,
            delay,
        }
    }

    /// Returns true if this is the primary attempt.
    pub fn is_primary(&self) -> bool {
        self.attempt == 1
    }

    /// Iterates over the phases that ran, in order.
    pub fn phases(&self) -> impl Iterator<Item = &PhaseRecord> {
        std::iter::once(&self.setup)
            .chain(self.call.as_ref())
            .chain(std::iter::once(&self.teardown))
    }

    /// Returns the trace texts of the attempt, as written to the statistics artifact.
    pub fn traces(&self) -> PhaseTraces {
        PhaseTraces {
            setup: self.setup.trace.clone(),
            call: self
                .call
                .as_ref()
                .map(|call| call.trace.clone())
                .unwrap_or_default(),
            teardown: self.teardown.trace.clone(),
        }
    }
}

/// The recorded result of one phase of an attempt.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PhaseRecord {
    /// The phase.
    pub phase: Phase,

    /// The raw result reported by the host.
    pub result: PhaseResult,

    /// Whether the host considered the phase a failure.
    pub failed: bool,

    /// The trace text captured by the host.
    pub trace: String,

    /// The time the phase took.
    pub duration: Duration,
}

impl PhaseRecord {
    fn new<H: TestHost + ?Sized>(host: &H, report: &PhaseReport) -> Self {
        Self {
            phase: report.phase,
            result: report.result,
            failed: host.is_failure(report),
            trace: host.capture_trace(report),
            duration: report.duration,
        }
    }
}
