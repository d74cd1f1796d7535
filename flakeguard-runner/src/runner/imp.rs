// Copyright (c) The flakeguard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{AttemptRecord, RerunState, TestItem};
use crate::{
    config::{FailureThreshold, FlakyMarker, RerunDelay, RerunProfile},
    errors::{DisplayErrorChain, RecordPrimaryError, RerunBuildError, WriteReportError},
    fixture::{FixtureGraphTracker, FixtureInvalidator},
    helpers::plural,
    host::{AttemptReports, TestHost, TestItemId},
    policy::{RerunDecision, RerunPolicy, SessionState},
    reporter::{
        EventAggregator, FlushStatus, ReportOutcome, RerunEvent, RerunEventKind,
        RerunStatsSnapshot, StatsCollector, StatsEvent,
    },
    time::{StopwatchSnapshot, StopwatchStart, blocking_delay, stopwatch},
};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{Local, TimeDelta};
use flakeguard_metadata::RerunReportSummary;
use indexmap::IndexMap;
use std::{collections::VecDeque, time::Duration};
use tracing::{debug, info, warn};

/// Values resolved by [`RerunSchedulerBuilder`](super::RerunSchedulerBuilder).
#[derive(Debug)]
pub(super) struct SchedulerOptions {
    pub(super) cli_reruns: Option<u32>,
    pub(super) cli_delay: Option<RerunDelay>,
    pub(super) threshold: FailureThreshold,
    pub(super) artifact_path: Option<Utf8PathBuf>,
}

/// Drives failed tests through their reruns.
///
/// A session has three stages:
///
/// 1. Every test is registered with [`Self::add_item`]. Invalid `flaky` markers are reported at
///    this point, before any test executes.
/// 2. The primary pass: the outcome of each test's first attempt is handed to the scheduler
///    through [`Self::run_primary`] or [`Self::record_primary`]. Failing tests are queued rather
///    than retried immediately.
/// 3. [`Self::drain`] reruns queued tests until each of them passes or is denied another attempt,
///    and [`Self::finish`] writes out reports and the statistics artifact.
///
/// Created through a [`RerunSchedulerBuilder`](super::RerunSchedulerBuilder).
#[derive(Debug)]
pub struct RerunScheduler<'cfg> {
    profile: RerunProfile<'cfg>,
    cli_reruns: Option<u32>,
    cli_delay: Option<RerunDelay>,
    policy: RerunPolicy,
    session: SessionState,
    items: IndexMap<TestItemId, TestItem>,
    queue: VecDeque<TestItemId>,
    tracker: FixtureGraphTracker,
    invalidator: FixtureInvalidator,
    stats: StatsCollector,
    artifact_path: Option<Utf8PathBuf>,
    events: EventContext<'cfg>,
}

impl<'cfg> RerunScheduler<'cfg> {
    pub(super) fn new(profile: RerunProfile<'cfg>, options: SchedulerOptions) -> Self {
        let aggregator = EventAggregator::new(&profile);
        Self {
            profile,
            cli_reruns: options.cli_reruns,
            cli_delay: options.cli_delay,
            policy: RerunPolicy::new(options.threshold),
            session: SessionState::new(),
            items: IndexMap::new(),
            queue: VecDeque::new(),
            tracker: FixtureGraphTracker::new(),
            invalidator: FixtureInvalidator::new(),
            stats: StatsCollector::new(),
            artifact_path: options.artifact_path,
            events: EventContext {
                stopwatch: stopwatch(),
                aggregator,
                report_errors: Vec::new(),
            },
        }
    }

    /// Returns the profile this scheduler was built for.
    pub fn profile(&self) -> &RerunProfile<'cfg> {
        &self.profile
    }

    /// Returns the distinct-failed-test threshold in effect.
    pub fn threshold(&self) -> FailureThreshold {
        self.policy.threshold()
    }

    /// Returns the path the statistics artifact will be written to, if any.
    pub fn artifact_path(&self) -> Option<&Utf8Path> {
        self.artifact_path.as_deref()
    }

    /// Returns the session-wide failure state.
    pub fn session(&self) -> &SessionState {
        &self.session
    }

    /// Returns the statistics collected so far.
    pub fn stats(&self) -> &StatsCollector {
        &self.stats
    }

    /// Returns the test with the given identifier, if it was added.
    pub fn item(&self, id: &TestItemId) -> Option<&TestItem> {
        self.items.get(id)
    }

    /// Iterates over all tests, in the order they were added.
    pub fn items(&self) -> impl ExactSizeIterator<Item = &TestItem> {
        self.items.values()
    }

    /// Iterates over the tests waiting to be rerun, in the order they will run.
    pub fn queued(&self) -> impl ExactSizeIterator<Item = &TestItemId> {
        self.queue.iter()
    }

    /// Registers a test with the scheduler, resolving its rerun settings.
    ///
    /// Settings are resolved from, in increasing order of precedence: the profile, command-line
    /// values, the profile's overrides and the test's `flaky` marker.
    pub fn add_item(
        &mut self,
        id: TestItemId,
        marker: Option<&FlakyMarker>,
    ) -> Result<&TestItem, RerunBuildError> {
        if self.items.contains_key(&id) {
            return Err(RerunBuildError::DuplicateItem(id));
        }

        let settings = self
            .profile
            .settings_for(&id)
            .with_cli(self.cli_reruns, self.cli_delay)
            .with_marker(&id, marker)?;
        debug!(
            "added {id}: {} {} ({:?}), delay {} ({:?})",
            settings.reruns(),
            plural::reruns_str(settings.reruns() as usize),
            settings.reruns_source(),
            settings.delay(),
            settings.delay_source(),
        );

        let item = TestItem::new(id.clone(), settings);
        Ok(self.items.entry(id).or_insert(item))
    }

    /// Executes the primary attempt of a test through the host, and records its outcome.
    ///
    /// Returns the state of the test afterwards: [`RerunState::PendingRerun`] if it was queued for
    /// a rerun.
    pub fn run_primary<H, F>(
        &mut self,
        host: &mut H,
        id: &TestItemId,
        mut callback: F,
    ) -> Result<RerunState, RecordPrimaryError>
    where
        H: TestHost + ?Sized,
        F: FnMut(RerunEvent<'_>),
    {
        self.check_primary(id)?;

        let start = stopwatch();
        let reports = host.execute(id);
        let time_taken = start.snapshot();
        self.record_primary_impl(&*host, id, &reports, time_taken, &mut callback)
    }

    /// Records the outcome of a primary attempt that the host executed by itself.
    ///
    /// `duration` is the time the attempt took. The attempt is assumed to have just finished.
    pub fn record_primary<H, F>(
        &mut self,
        host: &H,
        id: &TestItemId,
        reports: &AttemptReports,
        duration: Duration,
        mut callback: F,
    ) -> Result<RerunState, RecordPrimaryError>
    where
        H: TestHost + ?Sized,
        F: FnMut(RerunEvent<'_>),
    {
        self.check_primary(id)?;

        let elapsed = TimeDelta::from_std(duration).unwrap_or_default();
        let time_taken = StopwatchSnapshot {
            start_time: Local::now() - elapsed,
            duration,
        };
        self.record_primary_impl(host, id, reports, time_taken, &mut callback)
    }

    /// Reruns queued tests until the queue is empty.
    ///
    /// Tests that fail again are queued at the back, so reruns of different tests interleave. The
    /// host is polled for an abort before every attempt. If it asks to stop, all remaining tests
    /// are finalized with the outcome of their last attempt.
    pub fn drain<H, F>(&mut self, host: &mut H, mut callback: F)
    where
        H: TestHost + ?Sized,
        F: FnMut(RerunEvent<'_>),
    {
        if self.queue.is_empty() {
            debug!("no tests queued for rerun");
            return;
        }

        info!(
            "rerunning {} failed {}",
            self.queue.len(),
            plural::tests_str(self.queue.len()),
        );
        self.events.emit(
            &mut callback,
            RerunEventKind::RerunPassStarted {
                queued: self.queue.len(),
            },
        );

        while let Some(id) = self.queue.front().cloned() {
            if host.should_abort() {
                self.abort_pending(&mut callback);
                return;
            }
            self.queue.pop_front();
            self.rerun_one(host, &id, &mut callback);
        }
    }

    /// Ends the session: writes reports, and flushes statistics to the artifact path.
    ///
    /// Tests that are still queued are finalized without being rerun, as if the session had been
    /// aborted. Failing to write reports or the artifact never fails the session. Errors are
    /// logged and returned in the [`SessionOutcome`].
    pub fn finish<F>(mut self, mut callback: F) -> SessionOutcome
    where
        F: FnMut(RerunEvent<'_>),
    {
        if !self.queue.is_empty() {
            warn!(
                "session finished with {} {} still queued for rerun",
                self.queue.len(),
                plural::tests_str(self.queue.len()),
            );
            self.abort_pending(&mut callback);
        }

        let stats = self.stats.snapshot();
        let start_time = self.events.stopwatch.start_time().fixed_offset();
        self.events.emit(
            &mut callback,
            RerunEventKind::RunFinished { start_time, stats },
        );

        let flush = match &self.artifact_path {
            Some(path) => self.stats.flush(path),
            None => {
                debug!("no artifact path configured, not writing rerun statistics");
                FlushStatus::Skipped
            }
        };

        SessionOutcome {
            stats,
            summary: self.stats.summary(),
            flush,
            report_errors: self.events.report_errors,
            items: self.items,
        }
    }

    // ---
    // Helper methods
    // ---

    fn check_primary(&self, id: &TestItemId) -> Result<(), RecordPrimaryError> {
        match self.items.get(id) {
            None => Err(RecordPrimaryError::UnknownItem(id.clone())),
            Some(item) if item.attempt_count() > 0 => {
                Err(RecordPrimaryError::AlreadyRecorded(id.clone()))
            }
            Some(_) => Ok(()),
        }
    }

    fn record_primary_impl<H, F>(
        &mut self,
        host: &H,
        id: &TestItemId,
        reports: &AttemptReports,
        time_taken: StopwatchSnapshot,
        callback: &mut F,
    ) -> Result<RerunState, RecordPrimaryError>
    where
        H: TestHost + ?Sized,
        F: FnMut(RerunEvent<'_>),
    {
        let item = self
            .items
            .get_mut(id)
            .ok_or_else(|| RecordPrimaryError::UnknownItem(id.clone()))?;
        item.start_primary();
        let record = AttemptRecord::new(host, 1, reports, time_taken, Duration::ZERO);

        if record.outcome.is_success() {
            self.events.emit(
                callback,
                RerunEventKind::AttemptFinished {
                    test_id: item.id(),
                    attempt: &record,
                    max_attempts: item.max_attempts(),
                    report_outcome: ReportOutcome::Passed,
                },
            );
            item.push_attempt(record);
            self.finish_item(id, callback);
        } else {
            // Snapshot the fixtures now, while the host still holds them.
            let snapshot = self.tracker.snapshot(host, id);
            let decision = self.policy.decide(item, &mut self.session);
            if decision == RerunDecision::Accept {
                self.tracker.track(&snapshot);
            }
            self.record_failure(id, record, decision, callback);
        }

        Ok(self
            .items
            .get(id)
            .map_or(RerunState::FirstRun, TestItem::state))
    }

    fn rerun_one<H, F>(&mut self, host: &mut H, id: &TestItemId, callback: &mut F)
    where
        H: TestHost + ?Sized,
        F: FnMut(RerunEvent<'_>),
    {
        let Some(item) = self.items.get_mut(id) else {
            warn!("queued test {id} is not known to the scheduler, skipping");
            return;
        };

        let attempt = item.attempt_count();
        let delay = item.delay();
        item.set_state(RerunState::Retrying);
        debug!(
            "rerunning {id}: attempt {attempt}/{}",
            item.max_attempts()
        );
        self.events.emit(
            callback,
            RerunEventKind::RerunStarted {
                test_id: item.id(),
                attempt,
                max_attempts: item.max_attempts(),
                delay,
            },
        );

        let result = self
            .invalidator
            .invalidate(&mut *host, &self.tracker, id, attempt);
        self.events.emit(
            callback,
            RerunEventKind::FixturesInvalidated {
                test_id: item.id(),
                attempt,
                invalidated: &result.invalidated,
                retained: &result.retained,
            },
        );
        for cycle in result.cycles.iter().filter(|cycle| cycle.first_report) {
            self.events.emit(
                callback,
                RerunEventKind::DependencyCycle {
                    error: &cycle.error,
                },
            );
        }
        for error in &result.teardown_errors {
            self.events
                .emit(callback, RerunEventKind::TeardownFailed { error });
        }
        for caveat in result.caveats() {
            item.push_caveat(caveat);
        }
        item.extend_teardown_errors(result.teardown_errors);

        let slept = blocking_delay(delay.duration());
        if !slept.is_zero() {
            debug!("waited {slept:?} before rerunning {id}");
        }

        let start = stopwatch();
        let reports = host.execute(id);
        let time_taken = start.snapshot();
        let record = AttemptRecord::new(&*host, attempt, &reports, time_taken, slept);
        self.stats.record(item, StatsEvent::RerunFinished);

        if record.outcome.is_success() {
            self.events.emit(
                callback,
                RerunEventKind::AttemptFinished {
                    test_id: item.id(),
                    attempt: &record,
                    max_attempts: item.max_attempts(),
                    report_outcome: ReportOutcome::Passed,
                },
            );
            item.push_attempt(record);
            self.finish_item(id, callback);
        } else {
            let decision = self.policy.decide(item, &mut self.session);
            self.record_failure(id, record, decision, callback);
        }
    }

    /// Records a failed attempt along with the policy's decision, then queues or finishes the
    /// test.
    fn record_failure<F>(
        &mut self,
        id: &TestItemId,
        record: AttemptRecord,
        decision: RerunDecision,
        callback: &mut F,
    ) where
        F: FnMut(RerunEvent<'_>),
    {
        let Some(item) = self.items.get_mut(id) else {
            return;
        };
        let accepted = decision == RerunDecision::Accept;

        self.events.emit(
            callback,
            RerunEventKind::AttemptFinished {
                test_id: item.id(),
                attempt: &record,
                max_attempts: item.max_attempts(),
                report_outcome: ReportOutcome::for_attempt(record.outcome, accepted),
            },
        );
        self.events.emit(
            callback,
            RerunEventKind::RerunDecided {
                test_id: item.id(),
                decision,
                attempt_count: item.attempt_count(),
                max_attempts: item.max_attempts(),
                distinct_failed: self.session.distinct_failed(),
            },
        );
        item.push_attempt(record);

        if accepted {
            item.set_state(RerunState::PendingRerun);
            self.queue.push_back(id.clone());
            debug!("queued {id} for rerun ({} queued)", self.queue.len());
        } else {
            self.finish_item(id, callback);
        }
    }

    fn finish_item<F>(&mut self, id: &TestItemId, callback: &mut F)
    where
        F: FnMut(RerunEvent<'_>),
    {
        let Some(item) = self.items.get_mut(id) else {
            return;
        };
        let status = item.finish();
        self.tracker.release(id);
        self.stats.record(item, StatsEvent::TestFinished);
        debug!("{id} finished: {status}");

        self.events.emit(
            callback,
            RerunEventKind::TestFinished {
                item: &*item,
                status,
            },
        );
    }

    /// Finalizes every queued test without rerunning it.
    fn abort_pending<F>(&mut self, callback: &mut F)
    where
        F: FnMut(RerunEvent<'_>),
    {
        let pending = self.queue.len();
        warn!(
            "session aborted: {pending} {} will not be rerun",
            plural::tests_str(pending),
        );
        self.events
            .emit(callback, RerunEventKind::RunAborted { pending });

        while let Some(id) = self.queue.pop_front() {
            if let Some(item) = self.items.get_mut(&id) {
                item.cancel_pending_attempt();
                item.push_caveat("session was aborted before the test could be rerun".to_owned());
            }
            self.finish_item(&id, callback);
        }
    }
}

/// Produces events, feeding them to the configured reports before handing them to the host.
#[derive(Debug)]
struct EventContext<'cfg> {
    stopwatch: StopwatchStart,
    aggregator: EventAggregator<'cfg>,
    report_errors: Vec<WriteReportError>,
}

impl EventContext<'_> {
    fn emit<F>(&mut self, callback: &mut F, kind: RerunEventKind<'_>)
    where
        F: FnMut(RerunEvent<'_>),
    {
        let event = RerunEvent {
            timestamp: Local::now().fixed_offset(),
            elapsed: self.stopwatch.snapshot().duration,
            kind,
        };
        for error in self.aggregator.write_event(&event) {
            warn!("error writing report: {}", DisplayErrorChain::new(&error));
            self.report_errors.push(error);
        }
        callback(event);
    }
}

/// The result of [`RerunScheduler::finish`].
#[derive(Debug)]
pub struct SessionOutcome {
    /// The final totals.
    pub stats: RerunStatsSnapshot,

    /// The statistics, in the form written to the artifact.
    pub summary: RerunReportSummary,

    /// Whether the artifact was written.
    pub flush: FlushStatus,

    /// Errors that occurred while writing the JUnit report or the result log.
    pub report_errors: Vec<WriteReportError>,

    /// Every test registered with the scheduler, in the order they were added.
    pub items: IndexMap<TestItemId, TestItem>,
}

impl SessionOutcome {
    /// Returns true if every test that ran ultimately passed.
    pub fn is_success(&self) -> bool {
        self.items
            .values()
            .filter_map(TestItem::status)
            .all(|status| status.is_success())
    }
}
