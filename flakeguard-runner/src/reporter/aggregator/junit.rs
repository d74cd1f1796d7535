// Copyright (c) The flakeguard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Code to generate JUnit XML reports from rerun events.

use crate::{
    config::JunitConfig,
    errors::WriteReportError,
    helpers::indent_lines,
    host::AttemptOutcome,
    reporter::events::{RerunEvent, RerunEventKind},
    runner::{AttemptRecord, TestItem, TestStatus},
};
use indexmap::IndexMap;
use quick_junit::{NonSuccessKind, Report, TestCase, TestCaseStatus, TestRerun, TestSuite};
use std::fs::File;

#[derive(Clone, Debug)]
pub(super) struct MetadataJunit<'cfg> {
    config: JunitConfig<'cfg>,
    test_suites: IndexMap<String, TestSuite>,
}

impl<'cfg> MetadataJunit<'cfg> {
    pub(super) fn new(config: JunitConfig<'cfg>) -> Self {
        Self {
            config,
            test_suites: IndexMap::new(),
        }
    }

    pub(super) fn write_event(&mut self, event: &RerunEvent<'_>) -> Result<(), WriteReportError> {
        match &event.kind {
            RerunEventKind::AttemptFinished { .. }
            | RerunEventKind::RerunDecided { .. }
            | RerunEventKind::RerunPassStarted { .. }
            | RerunEventKind::RerunStarted { .. }
            | RerunEventKind::FixturesInvalidated { .. }
            | RerunEventKind::DependencyCycle { .. }
            | RerunEventKind::RunAborted { .. } => {}
            RerunEventKind::TeardownFailed { .. } => {
                // Teardown errors are recorded on the test in TestFinished.
            }
            RerunEventKind::TestFinished { item, status } => {
                let testcase = testcase_for(item, *status);
                let suite_name = item.id().file_part().to_owned();
                self.test_suites
                    .entry(suite_name.clone())
                    .or_insert_with(|| TestSuite::new(suite_name))
                    .add_test_case(testcase);
            }
            RerunEventKind::RunFinished { start_time, .. } => {
                // Write out the report to the given file.
                let mut report = Report::new(self.config.report_name());
                report
                    .set_timestamp(*start_time)
                    .set_time(event.elapsed)
                    .add_test_suites(self.test_suites.drain(..).map(|(_, testsuite)| testsuite));

                let junit_path = self.config.path();
                if let Some(junit_dir) = junit_path.parent() {
                    std::fs::create_dir_all(junit_dir).map_err(|error| WriteReportError::Fs {
                        file: junit_dir.to_path_buf(),
                        error,
                    })?;
                }

                let f = File::create(junit_path).map_err(|error| WriteReportError::Fs {
                    file: junit_path.to_path_buf(),
                    error,
                })?;
                report
                    .serialize(f)
                    .map_err(|error| WriteReportError::Junit {
                        file: junit_path.to_path_buf(),
                        error,
                    })?;
            }
        }
        Ok(())
    }
}

fn testcase_for(item: &TestItem, status: TestStatus) -> TestCase {
    let attempts = item.attempts();
    // Flaky tests are reported as successes carrying their failed attempts as flaky failures.
    // Failed tests are reported with their first failure, carrying later attempts as reruns.
    let (mut testcase_status, main, reruns) = match (status, attempts.split_first()) {
        (_, None) => (TestCaseStatus::non_success(NonSuccessKind::Error), None, attempts),
        (TestStatus::Passed | TestStatus::Flaky, Some(_)) => {
            let (last, prior) = attempts.split_last().map_or((None, attempts), |(last, prior)| {
                (Some(last), prior)
            });
            (TestCaseStatus::success(), last, prior)
        }
        (TestStatus::Failed | TestStatus::Error, Some((first, rest))) => {
            let mut testcase_status = TestCaseStatus::non_success(non_success_kind(first.outcome));
            testcase_status.set_type(first.outcome.as_str());
            if let Some(message) = first_line(failure_trace(first)) {
                testcase_status.set_message(message);
            }
            testcase_status.set_description(failure_trace(first));
            (testcase_status, Some(first), rest)
        }
    };

    for rerun in reruns {
        if rerun.outcome.is_success() {
            // Only the last attempt of a flaky test can pass, and it's the main status.
            continue;
        }
        let mut test_rerun = TestRerun::new(non_success_kind(rerun.outcome));
        test_rerun
            .set_timestamp(rerun.start_time.fixed_offset())
            .set_time(rerun.duration)
            .set_type(rerun.outcome.as_str())
            .set_description(failure_trace(rerun));
        if let Some(message) = first_line(failure_trace(rerun)) {
            test_rerun.set_message(message);
        }
        testcase_status.add_rerun(test_rerun);
    }

    let mut testcase = TestCase::new(item.id().name_part(), testcase_status);
    testcase.set_classname(item.id().file_part());
    if let Some(main) = main {
        testcase
            .set_timestamp(main.start_time.fixed_offset())
            .set_time(main.duration);
    }

    if !item.teardown_errors().is_empty() {
        let mut system_err = String::new();
        for error in item.teardown_errors() {
            system_err.push_str(&error.to_string());
            system_err.push('\n');
            system_err.push_str(&indent_lines(error.trace(), "  "));
        }
        testcase.set_system_err(system_err);
    }

    testcase
}

fn non_success_kind(outcome: AttemptOutcome) -> NonSuccessKind {
    match outcome {
        AttemptOutcome::Error => NonSuccessKind::Error,
        AttemptOutcome::Failed | AttemptOutcome::Passed => NonSuccessKind::Failure,
    }
}

/// Returns the trace of the phase that failed, preferring the test body.
fn failure_trace(attempt: &AttemptRecord) -> &str {
    attempt
        .phases()
        .filter(|phase| phase.failed)
        .map(|phase| phase.trace.as_str())
        .next()
        .unwrap_or_default()
}

fn first_line(trace: &str) -> Option<&str> {
    trace.lines().map(str::trim).find(|line| !line.is_empty())
}
