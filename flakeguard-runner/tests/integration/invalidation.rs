// Copyright (c) The flakeguard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use flakeguard_metadata::RerunReportSummary;
use flakeguard_runner::{
    config::FlakeguardConfig,
    fixture::{FixtureKey, FixtureScope},
    host::AttemptReports,
    runner::{RerunSchedulerBuilder, TestStatus},
};
use indoc::indoc;
use pretty_assertions::assert_eq;

fn config_with_reruns(reruns: u32) -> (camino_tempfile::Utf8TempDir, FlakeguardConfig) {
    config_with(&format!("[profile.default]\nreruns = {reruns}\n"))
}

#[test]
fn shared_fixture_is_kept_while_another_test_is_pending() {
    test_init();
    let (_dir, config) = config_with_reruns(1);
    let profile = config.profile(FlakeguardConfig::DEFAULT_PROFILE).unwrap();
    let scheduler = RerunSchedulerBuilder::default().build(&profile).unwrap();

    let db = session_fixture("db").with_invalidate_on_rerun(true);
    let mut host = FakeHost::new();
    let first = host.add_test(
        "tests/test_db.py::test_insert",
        [db.clone()],
        [AttemptReports::call_failed("IntegrityError")],
    );
    let second = host.add_test(
        "tests/test_db.py::test_delete",
        [db],
        [AttemptReports::call_failed("IntegrityError")],
    );
    let (outcome, events) = host.run(scheduler);

    assert_eq!(outcome.items[&first].status(), Some(TestStatus::Flaky));
    assert_eq!(outcome.items[&second].status(), Some(TestStatus::Flaky));

    // While the first test reruns, the second one still holds `db`. By the time the second one
    // reruns, the first one is done with it.
    assert_eq!(host.finalized(), vec![&FixtureKey::session("db")]);
    assert_eq!(host.creations(&FixtureKey::session("db")), 2);
    assert_eq!(
        outcome.items[&first].caveats(),
        ["fixture db (session) was not invalidated because pending test \
          `tests/test_db.py::test_delete` still uses it"]
    );
    assert!(outcome.items[&second].caveats().is_empty());

    let invalidations: Vec<_> = events
        .iter()
        .filter(|event| event.name == "fixtures-invalidated")
        .filter_map(|event| event.test_id.clone())
        .collect();
    assert_eq!(invalidations, vec![first, second]);
}

#[test]
fn dependents_are_finalized_before_their_dependencies() {
    test_init();
    let (_dir, config) = config_with_reruns(1);
    let profile = config.profile(FlakeguardConfig::DEFAULT_PROFILE).unwrap();
    let scheduler = RerunSchedulerBuilder::default().build(&profile).unwrap();

    let test_id = "tests/test_http.py::test_fetch";
    let server = module_fixture("server", "tests/test_http.py").with_invalidate_on_rerun(true);
    let client = function_fixture("client", test_id).with_requires([server.key.clone()]);
    let cache = session_fixture("cache");

    let mut host = FakeHost::new();
    let id = host.add_test(
        test_id,
        [server.clone(), client.clone(), cache.clone()],
        [AttemptReports::call_failed("ConnectionResetError")],
    );
    let (outcome, _) = host.run(scheduler);

    assert_eq!(outcome.items[&id].status(), Some(TestStatus::Flaky));
    assert_eq!(host.finalized(), vec![&client.key, &server.key]);
    assert_eq!(host.creations(&server.key), 2);
    assert_eq!(host.creations(&client.key), 2);
    assert_eq!(host.creations(&cache.key), 1, "session fixture is kept");
}

#[test]
fn failing_finalizer_does_not_prevent_rerun() {
    test_init();
    let (_dir, config) = config_with(indoc! {r#"
        [profile.default]
        reruns = 2
    "#});
    let profile = config.profile(FlakeguardConfig::DEFAULT_PROFILE).unwrap();
    let scheduler = RerunSchedulerBuilder::default().build(&profile).unwrap();

    let test_id = "tests/test_files.py::test_upload";
    let tmp = function_fixture("tmp_dir", test_id);
    let mut host = FakeHost::new();
    host.fail_finalizer("tmp_dir", "PermissionError: [Errno 13]");
    let id = host.add_test(
        test_id,
        [tmp.clone()],
        [
            AttemptReports::call_failed("AssertionError"),
            AttemptReports::call_failed("AssertionError"),
        ],
    );
    let (outcome, events) = host.run(scheduler);

    let item = &outcome.items[&id];
    assert_eq!(item.status(), Some(TestStatus::Flaky));
    assert_eq!(host.executions(&id), 3);
    assert_eq!(host.creations(&tmp.key), 3, "fixture re-created despite the error");

    let attempts: Vec<_> = item
        .teardown_errors()
        .iter()
        .map(|error| error.attempt())
        .collect();
    assert_eq!(attempts, vec![2, 3]);
    assert!(
        item.teardown_errors()
            .iter()
            .all(|error| error.fixture() == &tmp.key && error.trace() == "PermissionError: [Errno 13]")
    );
    assert_eq!(
        events.iter().filter(|event| event.name == "teardown-failed").count(),
        2
    );
}

#[test]
fn fixtures_in_a_dependency_cycle_are_kept() {
    test_init();
    let (dir, config) = config_with(indoc! {r#"
        [profile.default]
        reruns = 2
        artifact-path = "target/flakeguard/rerun-stats.json"
    "#});
    let profile = config.profile(FlakeguardConfig::DEFAULT_PROFILE).unwrap();
    let scheduler = RerunSchedulerBuilder::default().build(&profile).unwrap();

    let module = "tests/test_app.py";
    let test_id = "tests/test_app.py::test_startup";
    let config_key = FixtureKey::new("config", FixtureScope::Module, module);
    let settings_key = FixtureKey::new("settings", FixtureScope::Module, module);
    let app_config = module_fixture("config", module)
        .with_invalidate_on_rerun(true)
        .with_requires([settings_key.clone()]);
    let app_settings = module_fixture("settings", module)
        .with_invalidate_on_rerun(true)
        .with_requires([config_key.clone()]);
    let tmp = function_fixture("tmp_path", test_id);

    let mut host = FakeHost::new();
    let id = host.add_test(
        test_id,
        [app_config, app_settings, tmp.clone()],
        [
            AttemptReports::call_failed("KeyError: 'debug'"),
            AttemptReports::call_failed("KeyError: 'debug'"),
        ],
    );
    let (outcome, events) = host.run(scheduler);

    // The session carries on: the test is rerun twice and passes on the second rerun.
    let item = &outcome.items[&id];
    assert_eq!(item.status(), Some(TestStatus::Flaky));
    assert_eq!(host.executions(&id), 3);

    // Only the fixture outside the cycle is torn down, before each rerun.
    assert_eq!(host.finalized(), vec![&tmp.key, &tmp.key]);
    assert_eq!(host.creations(&config_key), 1);
    assert_eq!(host.creations(&settings_key), 1);
    assert_eq!(host.creations(&tmp.key), 3);

    // The cycle is reported once per session, even though it's seen before every rerun.
    let cycle_events: Vec<_> = events
        .iter()
        .filter(|event| event.name == "dependency-cycle")
        .collect();
    assert_eq!(cycle_events.len(), 1);
    assert_eq!(cycle_events[0].test_id.as_ref(), Some(&id));

    let caveat = "fixtures were not invalidated before the rerun: dependency cycle between \
                  fixtures of `tests/test_app.py::test_startup`: \
                  config (module tests/test_app.py), settings (module tests/test_app.py)";
    assert_eq!(item.caveats(), [caveat]);

    let summary =
        RerunReportSummary::read_from_path(&dir.path().join("target/flakeguard/rerun-stats.json"))
            .expect("artifact is valid");
    let entry = summary.test(test_id).expect("test is in the artifact");
    assert_eq!(entry.caveats, vec![caveat.to_owned()]);
}
