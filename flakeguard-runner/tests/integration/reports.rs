// Copyright (c) The flakeguard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use flakeguard_metadata::{AttemptOutcomeSummary, RerunReportSummary, RerunTestStatus};
use flakeguard_runner::{
    config::FlakeguardConfig,
    host::AttemptReports,
    reporter::FlushStatus,
    runner::RerunSchedulerBuilder,
};
use indoc::indoc;
use pretty_assertions::assert_eq;

#[test]
fn artifact_is_readable_by_metadata_crate() {
    test_init();
    let (dir, config) = config_with(indoc! {r#"
        [profile.default]
        reruns = 1
        artifact-path = "target/flakeguard/rerun-stats.json"
    "#});
    let profile = config.profile(FlakeguardConfig::DEFAULT_PROFILE).unwrap();
    let scheduler = RerunSchedulerBuilder::default().build(&profile).unwrap();

    let upload = "tests/test_files.py::test_upload";
    let mut host = FakeHost::new();
    host.fail_finalizer("tmp_dir", "PermissionError: [Errno 13]");
    host.add_test(
        "tests/test_api.py::test_flaky",
        [],
        [AttemptReports::call_failed("AssertionError: flaky")],
    );
    host.add_test(
        "tests/test_api.py::test_broken",
        [],
        [
            AttemptReports::call_failed("AssertionError: broken"),
            AttemptReports::setup_failed("ConnectionRefusedError"),
        ],
    );
    host.add_test("tests/test_api.py::test_ok", [], []);
    host.add_test(
        upload,
        [function_fixture("tmp_dir", upload)],
        [AttemptReports::call_failed("AssertionError: upload")],
    );
    let (outcome, _) = host.run(scheduler);

    assert!(
        matches!(outcome.flush, FlushStatus::Written),
        "artifact written: {:?}",
        outcome.flush
    );
    let summary =
        RerunReportSummary::read_from_path(&dir.path().join("target/flakeguard/rerun-stats.json"))
            .expect("artifact is valid");
    assert_eq!(summary, outcome.summary);

    assert_eq!(summary.total_reruns, 3);
    assert_eq!(summary.total_failed, 1);
    assert_eq!(summary.total_resolved_by_reruns, 2);
    assert_eq!(summary.rerun_tests.len(), 3);
    assert!(summary.test("tests/test_api.py::test_ok").is_none());

    let flaky = summary.test("tests/test_api.py::test_flaky").unwrap();
    assert_eq!(flaky.status, RerunTestStatus::Flaky);
    assert_eq!(flaky.original_trace.call, "AssertionError: flaky");
    assert!(flaky.rerun_trace.is_empty());
    assert_eq!(flaky.attempts.len(), 1);
    assert_eq!(flaky.attempts[0].attempt, 2);
    assert_eq!(flaky.attempts[0].outcome, AttemptOutcomeSummary::Passed);

    let broken = summary.test("tests/test_api.py::test_broken").unwrap();
    assert_eq!(broken.status, RerunTestStatus::Failed);
    assert_eq!(broken.original_trace.call, "AssertionError: broken");
    assert_eq!(broken.rerun_trace.setup, "ConnectionRefusedError");
    assert_eq!(broken.attempts[0].outcome, AttemptOutcomeSummary::Error);

    let upload = summary.test(upload).unwrap();
    assert_eq!(upload.status, RerunTestStatus::Flaky);
    assert_eq!(upload.original_trace.call, "AssertionError: upload");
    let [teardown] = upload.teardown_errors.as_slice() else {
        panic!("expected one teardown error: {:?}", upload.teardown_errors);
    };
    assert_eq!(teardown.attempt, 2);
    assert_eq!(teardown.fixture, "tmp_dir");
    assert_eq!(teardown.scope, "function");
    assert_eq!(teardown.trace, "PermissionError: [Errno 13]");
}

#[test]
fn unwritable_artifact_does_not_fail_session() {
    test_init();
    let (dir, config) = config_with("");
    let profile = config.profile(FlakeguardConfig::DEFAULT_PROFILE).unwrap();

    // A file where a directory is expected.
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, "").unwrap();
    let mut builder = RerunSchedulerBuilder::default();
    builder
        .set_reruns(1)
        .set_artifact_path(blocker.join("rerun-stats.json"));
    let scheduler = builder.build(&profile).unwrap();

    let mut host = FakeHost::new();
    host.add_test(
        "tests/test_api.py::test_flaky",
        [],
        [AttemptReports::call_failed("AssertionError")],
    );
    let (outcome, _) = host.run(scheduler);

    assert!(matches!(outcome.flush, FlushStatus::Failed(_)));
    assert!(outcome.is_success());
    assert_eq!(outcome.stats.total_resolved_by_reruns, 1);
}

#[test]
fn junit_report_and_result_log() {
    test_init();
    let (dir, config) = config_with(indoc! {r#"
        [profile.default]
        reruns = 1

        [profile.default.junit]
        path = "target/flakeguard/junit.xml"

        [profile.default.result-log]
        path = "target/flakeguard/result.log"
    "#});
    let profile = config.profile(FlakeguardConfig::DEFAULT_PROFILE).unwrap();
    let scheduler = RerunSchedulerBuilder::default().build(&profile).unwrap();

    let mut host = FakeHost::new();
    host.add_test(
        "tests/test_api.py::test_flaky",
        [],
        [AttemptReports::call_failed("AssertionError: flaky")],
    );
    host.add_test(
        "tests/test_api.py::test_broken",
        [],
        [
            AttemptReports::call_failed("AssertionError: broken"),
            AttemptReports::call_failed("AssertionError: broken"),
        ],
    );
    host.add_test("tests/test_api.py::test_ok", [], []);
    let (outcome, _) = host.run(scheduler);
    assert!(outcome.report_errors.is_empty(), "{:?}", outcome.report_errors);
    assert!(matches!(outcome.flush, FlushStatus::Skipped));

    let result_log =
        std::fs::read_to_string(dir.path().join("target/flakeguard/result.log")).unwrap();
    assert_eq!(
        result_log,
        indoc! {"
            R tests/test_api.py::test_flaky
             AssertionError: flaky
            R tests/test_api.py::test_broken
             AssertionError: broken
            . tests/test_api.py::test_ok
            . tests/test_api.py::test_flaky
            F tests/test_api.py::test_broken
             AssertionError: broken
        "}
    );

    let junit = std::fs::read_to_string(dir.path().join("target/flakeguard/junit.xml")).unwrap();
    assert!(junit.contains(r#"<testsuites name="flakeguard-run""#), "{junit}");
    assert!(junit.contains(r#"<testsuite name="tests/test_api.py""#), "{junit}");
    assert_eq!(junit.matches("<flakyFailure").count(), 1, "{junit}");
    assert_eq!(junit.matches("<rerunFailure").count(), 1, "{junit}");
    assert_eq!(junit.matches("<failure").count(), 1, "{junit}");
}
