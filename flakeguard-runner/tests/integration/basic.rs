// Copyright (c) The flakeguard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use flakeguard_runner::{
    config::{FailureThreshold, FlakeguardConfig, FlakyMarker},
    host::AttemptReports,
    runner::{RerunSchedulerBuilder, RerunState, TestStatus},
};
use indoc::indoc;
use pretty_assertions::assert_eq;
use std::time::Duration;
use test_strategy::proptest;

fn failing(times: usize) -> impl Iterator<Item = AttemptReports> {
    std::iter::repeat_with(|| AttemptReports::call_failed("AssertionError: expected 200")).take(times)
}

#[test]
fn threshold_suppresses_further_reruns() {
    test_init();
    let (_dir, config) = config_with(indoc! {r#"
        [profile.default]
        reruns = 2
        rerun-threshold = 2
    "#});
    let profile = config.profile(FlakeguardConfig::DEFAULT_PROFILE).unwrap();
    let scheduler = RerunSchedulerBuilder::default().build(&profile).unwrap();

    let mut host = FakeHost::new();
    let a = host.add_test("tests/test_a.py::test_a", [session_fixture("db")], failing(3));
    let b = host.add_test("tests/test_b.py::test_b", [session_fixture("db")], failing(3));
    let c = host.add_test("tests/test_c.py::test_c", [session_fixture("db")], failing(3));
    let (outcome, events) = host.run(scheduler);

    // The third distinct failure goes over the threshold, so C never reruns, and the reruns
    // already queued for A and B are not repeated once they fail again.
    for id in [&a, &b] {
        let item = &outcome.items[id];
        assert_eq!(item.status(), Some(TestStatus::Failed));
        assert_eq!(item.reruns().len(), 1, "{id} was rerun once");
        assert_eq!(host.executions(id), 2);
    }
    let c_item = &outcome.items[&c];
    assert_eq!(c_item.status(), Some(TestStatus::Failed));
    assert_eq!(c_item.state(), RerunState::FailedFinal);
    assert!(c_item.reruns().is_empty());
    assert_eq!(host.executions(&c), 1);

    assert_eq!(outcome.stats.total_reruns, 2);
    assert_eq!(outcome.stats.total_failed, 3);
    assert_eq!(outcome.stats.total_resolved_by_reruns, 0);
    assert!(!outcome.is_success());

    // The session fixture isn't marked for invalidation, so it is never torn down.
    assert!(host.finalized().is_empty());
    assert_eq!(
        events.iter().filter(|event| event.name == "rerun-started").count(),
        2
    );
}

#[test]
fn reruns_are_deferred_until_primary_pass_is_over() {
    test_init();
    let (_dir, config) = config_with(indoc! {r#"
        [profile.default]
        reruns = 1
    "#});
    let profile = config.profile(FlakeguardConfig::DEFAULT_PROFILE).unwrap();
    let scheduler = RerunSchedulerBuilder::default().build(&profile).unwrap();

    let mut host = FakeHost::new();
    let first = host.add_test("tests/test_api.py::test_get", [], failing(1));
    let second = host.add_test("tests/test_api.py::test_put", [], []);
    let (outcome, events) = host.run(scheduler);

    let executed: Vec<_> = host
        .calls
        .iter()
        .filter_map(|call| match call {
            HostCall::Execute(id, _) => Some(id.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(executed, vec![first.clone(), second.clone(), first.clone()]);

    assert_eq!(outcome.items[&first].status(), Some(TestStatus::Flaky));
    assert_eq!(outcome.items[&first].state(), RerunState::Resolved);
    assert_eq!(outcome.items[&second].status(), Some(TestStatus::Passed));
    assert!(outcome.is_success());

    let pass_started = events
        .iter()
        .position(|event| event.name == "rerun-pass-started")
        .expect("rerun pass started");
    let second_finished = events
        .iter()
        .position(|event| event.name == "test-finished" && event.test_id.as_ref() == Some(&second))
        .expect("second test finished");
    assert!(second_finished < pass_started);
}

#[test]
fn delay_is_waited_after_invalidation() {
    test_init();
    let (_dir, config) = config_with(indoc! {r#"
        [profile.default]
        reruns = { count = 1, delay = "1s" }
    "#});
    let profile = config.profile(FlakeguardConfig::DEFAULT_PROFILE).unwrap();
    let scheduler = RerunSchedulerBuilder::default().build(&profile).unwrap();

    let mut host = FakeHost::new();
    let id = host.add_test(
        "tests/test_cache.py::test_warm",
        [function_fixture("tmp_path", "tests/test_cache.py::test_warm")],
        failing(1),
    );
    let (outcome, _) = host.run(scheduler);

    let item = &outcome.items[&id];
    assert_eq!(item.status(), Some(TestStatus::Flaky));
    assert_eq!(item.reruns().len(), 1);
    assert!(item.reruns()[0].delay >= Duration::from_secs(1));

    let dropped_at = host
        .calls
        .iter()
        .find_map(|call| match call {
            HostCall::Drop(_, at) => Some(*at),
            _ => None,
        })
        .expect("function fixture was dropped");
    let rerun_at = host
        .calls
        .iter()
        .filter_map(|call| match call {
            HostCall::Execute(_, at) => Some(*at),
            _ => None,
        })
        .nth(1)
        .expect("test was rerun");
    assert!(rerun_at.duration_since(dropped_at) >= Duration::from_secs(1));
}

#[test]
fn marker_and_cli_settings() {
    test_init();
    let (_dir, config) = config_with(indoc! {r#"
        [profile.default]
        reruns = 1

        [[profile.default.overrides]]
        filter = "tests/test_network.py::*"
        reruns = 3
    "#});
    let profile = config.profile(FlakeguardConfig::DEFAULT_PROFILE).unwrap();
    let mut builder = RerunSchedulerBuilder::default();
    builder.set_reruns(2).set_threshold(FailureThreshold::Unlimited);
    let mut scheduler = builder.build(&profile).unwrap();

    let mut host = FakeHost::new();
    let network = host.add_test("tests/test_network.py::test_dns", [], failing(10));
    let marked = host.add_test("tests/test_db.py::test_pool", [], failing(10));
    let plain = host.add_test("tests/test_db.py::test_query", [], failing(10));
    scheduler
        .add_item(marked.clone(), Some(&FlakyMarker::new(4)))
        .unwrap();
    let (outcome, _) = host.run(scheduler);

    // The override wins over the command line, which only replaces the profile's value. The
    // marker wins over everything.
    assert_eq!(host.executions(&network), 4);
    assert_eq!(host.executions(&marked), 5);
    assert_eq!(host.executions(&plain), 3);
    assert_eq!(outcome.stats.total_reruns, 3 + 4 + 2);
}

#[test]
fn abort_finalizes_queued_tests() {
    test_init();
    let (_dir, config) = config_with(indoc! {r#"
        [profile.default]
        reruns = 2
    "#});
    let profile = config.profile(FlakeguardConfig::DEFAULT_PROFILE).unwrap();
    let scheduler = RerunSchedulerBuilder::default().build(&profile).unwrap();

    let mut host = FakeHost::new();
    let first = host.add_test("tests/test_a.py::test_one", [], failing(3));
    let second = host.add_test("tests/test_a.py::test_two", [], failing(3));
    host.abort_after(2);
    let (outcome, events) = host.run(scheduler);

    assert_eq!(host.executions(&first), 1);
    assert_eq!(host.executions(&second), 1);
    assert_eq!(
        events.iter().filter(|event| event.name == "run-aborted").count(),
        1
    );
    for id in [&first, &second] {
        let item = &outcome.items[id];
        assert_eq!(item.state(), RerunState::FailedFinal);
        assert_eq!(item.attempts().len(), item.attempt_count());
        assert_eq!(item.caveats().len(), 1, "{id} has an abort caveat");
    }
    assert_eq!(outcome.stats.total_reruns, 0);
    assert_eq!(outcome.stats.total_failed, 2);
}

#[proptest(cases = 32)]
fn session_totals_are_consistent(
    #[strategy(proptest::collection::vec(0usize..5, 1..8))] failures: Vec<usize>,
    #[strategy(0i64..4)] reruns: i64,
    #[strategy(0usize..5)] threshold: usize,
) {
    let (_dir, config) = config_with("");
    let profile = config.profile(FlakeguardConfig::DEFAULT_PROFILE).unwrap();
    let mut builder = RerunSchedulerBuilder::default();
    builder
        .set_reruns(reruns)
        .set_threshold(FailureThreshold::from_count(threshold));
    let scheduler = builder.build(&profile).unwrap();

    let mut host = FakeHost::new();
    for (index, &times) in failures.iter().enumerate() {
        host.add_test(&format!("tests/test_prop.py::test_{index}"), [], failing(times));
    }
    let (outcome, _) = host.run(scheduler);

    let mut expected_reruns = 0;
    let mut flaky = 0;
    let mut failed = 0;
    let mut ever_failed = 0;
    for item in outcome.items.values() {
        proptest::prop_assert!(item.state().is_terminal());
        proptest::prop_assert_eq!(item.attempts().len(), item.attempt_count());
        proptest::prop_assert!(item.attempt_count() <= item.max_attempts());
        proptest::prop_assert_eq!(host.executions(item.id()), item.attempt_count());

        expected_reruns += item.attempt_count() - 1;
        match item.status() {
            Some(TestStatus::Flaky) => flaky += 1,
            Some(TestStatus::Failed | TestStatus::Error) => failed += 1,
            Some(TestStatus::Passed) => {}
            None => proptest::prop_assert!(false, "{} has no final status", item.id()),
        }
        if item.ever_failed() {
            ever_failed += 1;
        }
    }
    proptest::prop_assert_eq!(outcome.stats.total_reruns, expected_reruns);
    proptest::prop_assert_eq!(outcome.stats.total_resolved_by_reruns, flaky);
    proptest::prop_assert_eq!(outcome.stats.total_failed, failed);
    proptest::prop_assert_eq!(outcome.stats.rerun_tests, ever_failed);
}
