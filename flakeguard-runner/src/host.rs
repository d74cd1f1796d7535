// Copyright (c) The flakeguard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The boundary with the host test runner.
//!
//! flakeguard does not collect tests, create fixtures or invoke test functions itself. All of that
//! is owned by the host, which is accessed through the [`TestHost`] trait.

use crate::fixture::{FixtureBinding, FixtureKey};
use smol_str::SmolStr;
use std::{fmt, time::Duration};

/// A stable identifier for a test, for example `tests/test_db.py::TestPool::test_acquire`.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct TestItemId(SmolStr);

impl TestItemId {
    /// Creates a new identifier.
    pub fn new(id: impl Into<SmolStr>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the part of the identifier before the first `::`, typically the file the test is
    /// defined in.
    pub fn file_part(&self) -> &str {
        match self.0.split_once("::") {
            Some((file, _)) => file,
            None => &self.0,
        }
    }

    /// Returns the part of the identifier after the first `::`, or the whole identifier if there
    /// is no separator.
    pub fn name_part(&self) -> &str {
        match self.0.split_once("::") {
            Some((_, name)) => name,
            None => &self.0,
        }
    }
}

impl fmt::Display for TestItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TestItemId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A phase of a single test attempt.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Phase {
    /// Fixture setup.
    Setup,

    /// The test body.
    Call,

    /// Fixture teardown.
    Teardown,
}

impl Phase {
    /// All phases, in execution order.
    pub const ALL: [Phase; 3] = [Phase::Setup, Phase::Call, Phase::Teardown];

    /// Returns the name of the phase.
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Setup => "setup",
            Phase::Call => "call",
            Phase::Teardown => "teardown",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The raw result of a single phase, as reported by the host.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PhaseResult {
    /// The phase passed.
    Passed,

    /// The phase failed.
    Failed,

    /// The phase was skipped.
    Skipped,

    /// The phase failed, but the test is marked as expected to fail.
    ExpectedFailure,

    /// The phase passed, but the test is marked as expected to fail.
    UnexpectedPass,
}

impl PhaseResult {
    /// Returns true if this result counts as a failure.
    ///
    /// Expected failures do not count as failures.
    pub fn is_failure(self) -> bool {
        matches!(self, PhaseResult::Failed)
    }
}

/// The report for a single phase of a test attempt.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PhaseReport {
    /// The phase this report is for.
    pub phase: Phase,

    /// The result of the phase.
    pub result: PhaseResult,

    /// The trace text (failure representation, captured output) for the phase.
    pub trace: String,

    /// The time it took to run the phase.
    pub duration: Duration,
}

impl PhaseReport {
    /// Creates a new report with the given result and no trace text.
    pub fn new(phase: Phase, result: PhaseResult) -> Self {
        Self {
            phase,
            result,
            trace: String::new(),
            duration: Duration::ZERO,
        }
    }

    /// Creates a passing report.
    pub fn passed(phase: Phase) -> Self {
        Self::new(phase, PhaseResult::Passed)
    }

    /// Creates a failing report with the given trace text.
    pub fn failed(phase: Phase, trace: impl Into<String>) -> Self {
        Self::new(phase, PhaseResult::Failed).with_trace(trace)
    }

    /// Sets the trace text.
    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = trace.into();
        self
    }

    /// Sets the duration.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }
}

/// The reports for all phases of one attempt.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AttemptReports {
    /// The setup report.
    pub setup: PhaseReport,

    /// The call report. Absent if setup failed and the test body was never invoked.
    pub call: Option<PhaseReport>,

    /// The teardown report.
    pub teardown: PhaseReport,
}

impl AttemptReports {
    /// Reports for an attempt in which every phase passed.
    pub fn passed() -> Self {
        Self {
            setup: PhaseReport::passed(Phase::Setup),
            call: Some(PhaseReport::passed(Phase::Call)),
            teardown: PhaseReport::passed(Phase::Teardown),
        }
    }

    /// Reports for an attempt in which the test body failed with the given trace.
    pub fn call_failed(trace: impl Into<String>) -> Self {
        Self {
            setup: PhaseReport::passed(Phase::Setup),
            call: Some(PhaseReport::failed(Phase::Call, trace)),
            teardown: PhaseReport::passed(Phase::Teardown),
        }
    }

    /// Reports for an attempt in which setup failed with the given trace.
    pub fn setup_failed(trace: impl Into<String>) -> Self {
        Self {
            setup: PhaseReport::failed(Phase::Setup, trace),
            call: None,
            teardown: PhaseReport::passed(Phase::Teardown),
        }
    }

    /// Iterates over the reports that are present, in phase order.
    pub fn iter(&self) -> impl Iterator<Item = &PhaseReport> {
        std::iter::once(&self.setup)
            .chain(self.call.as_ref())
            .chain(std::iter::once(&self.teardown))
    }

    /// Returns the total time taken across all phases.
    pub fn duration(&self) -> Duration {
        self.iter().map(|report| report.duration).sum()
    }
}

/// The classified outcome of a single attempt.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AttemptOutcome {
    /// No phase failed.
    Passed,

    /// The test body failed.
    Failed,

    /// Setup or teardown failed, and the test body did not.
    Error,
}

impl AttemptOutcome {
    /// Classifies an attempt, given a predicate that determines whether a phase report counts as
    /// a failure.
    pub fn classify(
        reports: &AttemptReports,
        mut is_failure: impl FnMut(&PhaseReport) -> bool,
    ) -> Self {
        if reports.call.as_ref().is_some_and(&mut is_failure) {
            AttemptOutcome::Failed
        } else if is_failure(&reports.setup) || is_failure(&reports.teardown) {
            AttemptOutcome::Error
        } else {
            AttemptOutcome::Passed
        }
    }

    /// Returns true if the attempt passed.
    pub fn is_success(self) -> bool {
        matches!(self, AttemptOutcome::Passed)
    }

    /// Returns the name of the outcome.
    pub fn as_str(self) -> &'static str {
        match self {
            AttemptOutcome::Passed => "passed",
            AttemptOutcome::Failed => "failed",
            AttemptOutcome::Error => "error",
        }
    }
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The failure produced by a fixture finalizer, as reported by the host.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FinalizerFailure {
    /// Trace text for the failure.
    pub trace: String,
}

impl FinalizerFailure {
    /// Creates a new failure with the given trace text.
    pub fn new(trace: impl Into<String>) -> Self {
        Self {
            trace: trace.into(),
        }
    }
}

/// The host test runner.
///
/// Every method is called from a single thread, one at a time. Implementations do not need to be
/// reentrant.
pub trait TestHost {
    /// Runs one attempt of the given test and returns reports for each phase.
    fn execute(&mut self, item: &TestItemId) -> AttemptReports;

    /// Returns true if the given report counts as a failure.
    ///
    /// The default implementation defers to [`PhaseResult::is_failure`].
    fn is_failure(&self, report: &PhaseReport) -> bool {
        report.result.is_failure()
    }

    /// Returns the trace text to record for the given report.
    fn capture_trace(&self, report: &PhaseReport) -> String {
        report.trace.clone()
    }

    /// Returns the fixture bindings currently held by the given test.
    ///
    /// Returns `None` if the host cannot report bindings for the test, for example because it has
    /// already been torn down completely.
    fn active_fixture_bindings(&self, item: &TestItemId) -> Option<Vec<FixtureBinding>>;

    /// Runs the finalizer for the given binding.
    fn finalize(&mut self, binding: &FixtureBinding) -> Result<(), FinalizerFailure>;

    /// Drops the given binding from the host's registry of active fixtures, so that the next
    /// attempt re-creates it.
    fn drop_binding(&mut self, key: &FixtureKey);

    /// Returns true if the session has been asked to stop, for example because a signal was
    /// received.
    ///
    /// Polled between attempts. The attempt in flight is always allowed to complete.
    fn should_abort(&self) -> bool {
        false
    }
}

impl<H: TestHost + ?Sized> TestHost for &mut H {
    fn execute(&mut self, item: &TestItemId) -> AttemptReports {
        (**self).execute(item)
    }

    fn is_failure(&self, report: &PhaseReport) -> bool {
        (**self).is_failure(report)
    }

    fn capture_trace(&self, report: &PhaseReport) -> String {
        (**self).capture_trace(report)
    }

    fn active_fixture_bindings(&self, item: &TestItemId) -> Option<Vec<FixtureBinding>> {
        (**self).active_fixture_bindings(item)
    }

    fn finalize(&mut self, binding: &FixtureBinding) -> Result<(), FinalizerFailure> {
        (**self).finalize(binding)
    }

    fn drop_binding(&mut self, key: &FixtureKey) {
        (**self).drop_binding(key)
    }

    fn should_abort(&self) -> bool {
        (**self).should_abort()
    }
}
