// Copyright (c) The flakeguard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino_tempfile::Utf8TempDir;
use flakeguard_runner::{
    config::FlakeguardConfig,
    fixture::{BindingSource, FinalizerHandle, FixtureBinding, FixtureKey, FixtureScope},
    host::{AttemptReports, FinalizerFailure, TestHost, TestItemId},
    reporter::RerunEvent,
    runner::{RerunScheduler, SessionOutcome},
};
use indexmap::IndexMap;
use std::{
    collections::{HashMap, VecDeque},
    time::Instant,
};

pub(crate) fn test_init() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Writes `contents` to the config file of a fresh temporary root, and reads it back.
pub(crate) fn config_with(contents: &str) -> (Utf8TempDir, FlakeguardConfig) {
    let dir = camino_tempfile::tempdir().expect("created temp dir");
    let config_file = dir.path().join(FlakeguardConfig::CONFIG_PATH);
    std::fs::create_dir_all(config_file.parent().expect("config path has a parent"))
        .expect("created config dir");
    std::fs::write(&config_file, contents).expect("wrote config file");

    let config = FlakeguardConfig::from_sources(dir.path(), None).expect("config is valid");
    (dir, config)
}

pub(crate) fn session_fixture(name: &str) -> FixtureBinding {
    FixtureBinding::new(
        FixtureKey::session(name),
        BindingSource::Argument,
        FinalizerHandle(0),
    )
}

pub(crate) fn module_fixture(name: &str, module: &str) -> FixtureBinding {
    FixtureBinding::new(
        FixtureKey::new(name, FixtureScope::Module, module),
        BindingSource::Autouse,
        FinalizerHandle(0),
    )
}

pub(crate) fn function_fixture(name: &str, test: &str) -> FixtureBinding {
    FixtureBinding::new(
        FixtureKey::function(name, test),
        BindingSource::Argument,
        FinalizerHandle(0),
    )
}

/// A call made by the scheduler into the host.
#[derive(Clone, Debug)]
pub(crate) enum HostCall {
    Execute(TestItemId, Instant),
    Finalize(FixtureKey, Instant),
    Drop(FixtureKey, Instant),
}

#[derive(Debug, Default)]
struct FakeTest {
    fixtures: Vec<FixtureBinding>,
    script: VecDeque<AttemptReports>,
}

/// A host whose tests follow a script of attempt outcomes, and which keeps a registry of active
/// fixtures the way a real test framework would.
///
/// Tests without any outcomes left in their script pass.
#[derive(Debug, Default)]
pub(crate) struct FakeHost {
    tests: IndexMap<TestItemId, FakeTest>,
    active: HashMap<FixtureKey, FixtureBinding>,
    creations: HashMap<FixtureKey, usize>,
    failing_finalizers: HashMap<String, String>,
    abort_after: Option<usize>,
    pub(crate) calls: Vec<HostCall>,
}

impl FakeHost {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_test(
        &mut self,
        id: &str,
        fixtures: impl IntoIterator<Item = FixtureBinding>,
        script: impl IntoIterator<Item = AttemptReports>,
    ) -> TestItemId {
        let id = TestItemId::new(id);
        self.tests.insert(
            id.clone(),
            FakeTest {
                fixtures: fixtures.into_iter().collect(),
                script: script.into_iter().collect(),
            },
        );
        id
    }

    pub(crate) fn test_ids(&self) -> Vec<TestItemId> {
        self.tests.keys().cloned().collect()
    }

    /// Makes the finalizer of every fixture with the given name raise.
    pub(crate) fn fail_finalizer(&mut self, fixture: &str, trace: &str) {
        self.failing_finalizers
            .insert(fixture.to_owned(), trace.to_owned());
    }

    /// Asks the scheduler to stop once this many attempts have been executed.
    pub(crate) fn abort_after(&mut self, executions: usize) {
        self.abort_after = Some(executions);
    }

    pub(crate) fn executions(&self, id: &TestItemId) -> usize {
        self.calls
            .iter()
            .filter(|call| matches!(call, HostCall::Execute(executed, _) if executed == id))
            .count()
    }

    pub(crate) fn creations(&self, key: &FixtureKey) -> usize {
        self.creations.get(key).copied().unwrap_or_default()
    }

    pub(crate) fn finalized(&self) -> Vec<&FixtureKey> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                HostCall::Finalize(key, _) => Some(key),
                _ => None,
            })
            .collect()
    }

    /// Runs the primary pass over every test in registration order, then drains reruns and
    /// finishes the session.
    pub(crate) fn run(
        &mut self,
        mut scheduler: RerunScheduler<'_>,
    ) -> (SessionOutcome, Vec<EventSummary>) {
        let mut events = Vec::new();
        for id in self.test_ids() {
            if scheduler.item(&id).is_none() {
                scheduler
                    .add_item(id.clone(), None)
                    .expect("test registered");
            }
            scheduler
                .run_primary(self, &id, |event| events.push(EventSummary::new(&event)))
                .expect("primary attempt recorded");
        }
        scheduler.drain(self, |event| events.push(EventSummary::new(&event)));
        let outcome = scheduler.finish(|event| events.push(EventSummary::new(&event)));
        (outcome, events)
    }
}

impl TestHost for FakeHost {
    fn execute(&mut self, item: &TestItemId) -> AttemptReports {
        self.calls.push(HostCall::Execute(item.clone(), Instant::now()));
        let Some(test) = self.tests.get_mut(item) else {
            return AttemptReports::setup_failed(format!("unknown test {item}"));
        };

        // Set up fixtures that aren't active yet.
        for binding in &test.fixtures {
            if !self.active.contains_key(&binding.key) {
                *self.creations.entry(binding.key.clone()).or_default() += 1;
                self.active.insert(binding.key.clone(), binding.clone());
            }
        }

        test.script.pop_front().unwrap_or_else(AttemptReports::passed)
    }

    fn active_fixture_bindings(&self, item: &TestItemId) -> Option<Vec<FixtureBinding>> {
        let test = self.tests.get(item)?;
        Some(
            test.fixtures
                .iter()
                .filter(|binding| self.active.contains_key(&binding.key))
                .cloned()
                .collect(),
        )
    }

    fn finalize(&mut self, binding: &FixtureBinding) -> Result<(), FinalizerFailure> {
        self.calls
            .push(HostCall::Finalize(binding.key.clone(), Instant::now()));
        match self.failing_finalizers.get(binding.key.name()) {
            Some(trace) => Err(FinalizerFailure::new(trace.clone())),
            None => Ok(()),
        }
    }

    fn drop_binding(&mut self, key: &FixtureKey) {
        self.calls.push(HostCall::Drop(key.clone(), Instant::now()));
        self.active.remove(key);
    }

    fn should_abort(&self) -> bool {
        self.abort_after.is_some_and(|count| {
            let executed = self
                .calls
                .iter()
                .filter(|call| matches!(call, HostCall::Execute(..)))
                .count();
            executed >= count
        })
    }
}

/// An owned summary of a [`RerunEvent`], for assertions after the session is over.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct EventSummary {
    pub(crate) name: &'static str,
    pub(crate) test_id: Option<TestItemId>,
}

impl EventSummary {
    fn new(event: &RerunEvent<'_>) -> Self {
        use flakeguard_runner::reporter::RerunEventKind;

        let test_id = match &event.kind {
            RerunEventKind::AttemptFinished { test_id, .. }
            | RerunEventKind::RerunDecided { test_id, .. }
            | RerunEventKind::RerunStarted { test_id, .. }
            | RerunEventKind::FixturesInvalidated { test_id, .. } => Some((*test_id).clone()),
            RerunEventKind::TeardownFailed { error } => Some(error.test_id().clone()),
            RerunEventKind::DependencyCycle { error } => Some(error.test_id().clone()),
            RerunEventKind::TestFinished { item, .. } => Some(item.id().clone()),
            RerunEventKind::RerunPassStarted { .. }
            | RerunEventKind::RunAborted { .. }
            | RerunEventKind::RunFinished { .. } => None,
        };
        Self {
            name: event.kind.name(),
            test_id,
        }
    }
}
