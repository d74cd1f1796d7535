// Copyright (c) The flakeguard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{FixtureGraphTracker, FixtureKey, FixtureScope, FixtureSnapshot};
use crate::{
    errors::{DependencyCycleError, TeardownError},
    helpers::plural,
    host::{TestHost, TestItemId},
};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, warn};

/// Tears down the fixtures of a failed test before it is rerun.
///
/// The invalidator remembers which dependency cycles it has already reported, so that each
/// distinct cycle is only warned about once per session.
#[derive(Clone, Debug, Default)]
pub struct FixtureInvalidator {
    reported_cycles: BTreeSet<Vec<FixtureKey>>,
}

impl FixtureInvalidator {
    /// Creates a new invalidator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Computes which of the snapshot's fixtures may be torn down, and in which order.
    ///
    /// `tracker` is consulted for other pending tests that still hold a broader-scoped fixture.
    pub fn plan(
        &self,
        snapshot: &FixtureSnapshot,
        tracker: &FixtureGraphTracker,
    ) -> InvalidationSet {
        let test_id = snapshot.test_id();
        let graph = snapshot.dependency_graph();

        let cycles = graph.cycles();
        let tainted = graph.connected_to(cycles.iter().flatten());

        let mut retained: HashMap<&FixtureKey, RetainReason> = HashMap::new();
        let mut eligible: HashSet<&FixtureKey> = HashSet::new();
        for binding in snapshot.iter() {
            let key = &binding.key;
            if tainted.contains(key) {
                retained.insert(key, RetainReason::InCyclicSubgraph);
            } else if binding.scope() == FixtureScope::Function {
                eligible.insert(key);
            } else if !binding.invalidate_on_rerun {
                retained.insert(key, RetainReason::BroaderScope);
            } else if let Some(other) = tracker.other_consumer(key, test_id) {
                retained.insert(key, RetainReason::SharedWithPendingTest(other.clone()));
            } else {
                eligible.insert(key);
            }
        }

        // A fixture that stays alive must not observe a torn-down dependency, so withdraw
        // dependencies of retained fixtures until nothing changes.
        loop {
            let withdrawn: Vec<_> = eligible
                .iter()
                .filter_map(|&key| {
                    graph
                        .dependents(key)
                        .find(|dependent| retained.contains_key(dependent))
                        .map(|dependent| (key, dependent))
                })
                .collect();
            if withdrawn.is_empty() {
                break;
            }
            for (key, dependent) in withdrawn {
                eligible.remove(key);
                retained.insert(key, RetainReason::DependentRetained(dependent.clone()));
            }
        }

        let (order, cycles): (Vec<FixtureKey>, _) = match graph.finalization_order(&eligible) {
            Ok(order) => (order.into_iter().cloned().collect(), cycles),
            Err(members) => {
                // Cycles were excluded above, so this only happens if the host reported an
                // inconsistent graph. Don't tear anything down in that case.
                for key in eligible.drain() {
                    retained.insert(key, RetainReason::InCyclicSubgraph);
                }
                let mut cycles = cycles;
                cycles.push(members);
                (Vec::new(), cycles)
            }
        };

        // Report retained bindings in snapshot order.
        let retained = snapshot
            .iter()
            .filter_map(|binding| {
                retained.remove(&binding.key).map(|reason| RetainedBinding {
                    key: binding.key.clone(),
                    reason,
                })
            })
            .collect();

        InvalidationSet {
            test_id: test_id.clone(),
            order,
            retained,
            cycles,
        }
    }

    /// Tears down the fixtures currently bound to `item`, ahead of the given attempt.
    ///
    /// Finalizer failures are recorded as [`TeardownError`]s and don't stop the remaining
    /// fixtures from being invalidated. Every invalidated fixture is dropped from the host's
    /// registry, whether or not its finalizer succeeded, so the next attempt re-creates it.
    pub fn invalidate<H: TestHost + ?Sized>(
        &mut self,
        host: &mut H,
        tracker: &FixtureGraphTracker,
        item: &TestItemId,
        attempt: usize,
    ) -> InvalidationResult {
        let snapshot = tracker.snapshot(&*host, item);
        let set = self.plan(&snapshot, tracker);
        debug!(
            "invalidating {} {} for {item} before attempt {attempt} ({} retained)",
            set.order.len(),
            plural::fixtures_str(set.order.len()),
            set.retained.len(),
        );

        let cycles = set
            .cycles
            .iter()
            .map(|cycle| {
                let first_report = self.reported_cycles.insert(cycle.clone());
                let error = DependencyCycleError::new(item.clone(), cycle.clone());
                if first_report {
                    warn!("{error}: these fixtures will not be invalidated before reruns");
                }
                CycleDiagnostic {
                    error,
                    first_report,
                }
            })
            .collect();

        let mut invalidated = Vec::with_capacity(set.order.len());
        let mut teardown_errors = Vec::new();
        for key in set.order {
            let Some(binding) = snapshot.get(&key) else {
                continue;
            };
            match host.finalize(binding) {
                Ok(()) => {
                    debug!("finalized {key} for {item}");
                    invalidated.push(key.clone());
                }
                Err(failure) => {
                    let error =
                        TeardownError::new(item.clone(), attempt, key.clone(), failure.trace);
                    warn!("{error}");
                    teardown_errors.push(error);
                }
            }
            host.drop_binding(&key);
        }

        InvalidationResult {
            invalidated,
            teardown_errors,
            retained: set.retained,
            cycles,
        }
    }
}

/// The fixtures of one test to tear down, in order, along with the ones that must be kept.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InvalidationSet {
    test_id: TestItemId,
    order: Vec<FixtureKey>,
    retained: Vec<RetainedBinding>,
    cycles: Vec<Vec<FixtureKey>>,
}

impl InvalidationSet {
    /// Returns the test this set was computed for.
    pub fn test_id(&self) -> &TestItemId {
        &self.test_id
    }

    /// Returns the fixtures to tear down, dependents before their dependencies.
    pub fn order(&self) -> &[FixtureKey] {
        &self.order
    }

    /// Returns the fixtures that will be kept alive, along with why.
    pub fn retained(&self) -> &[RetainedBinding] {
        &self.retained
    }

    /// Returns the dependency cycles found among the test's fixtures.
    pub fn cycles(&self) -> &[Vec<FixtureKey>] {
        &self.cycles
    }
}

/// A fixture that was not torn down before a rerun.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RetainedBinding {
    /// The fixture.
    pub key: FixtureKey,

    /// Why the fixture was kept.
    pub reason: RetainReason,
}

/// The reason a fixture was not torn down before a rerun.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RetainReason {
    /// The fixture is broader than function scope and isn't marked for invalidation.
    BroaderScope,

    /// The fixture is marked for invalidation, but another pending test still holds it.
    SharedWithPendingTest(TestItemId),

    /// A fixture that requires this one is being kept.
    DependentRetained(FixtureKey),

    /// The fixture is connected to a dependency cycle.
    InCyclicSubgraph,
}

/// A dependency cycle found while invalidating fixtures.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CycleDiagnostic {
    /// The cycle.
    pub error: DependencyCycleError,

    /// True if this is the first time this cycle was seen in the session.
    pub first_report: bool,
}

/// The result of invalidating one test's fixtures.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InvalidationResult {
    /// Fixtures whose finalizers completed, in the order they ran.
    pub invalidated: Vec<FixtureKey>,

    /// Fixtures whose finalizers raised. These were still dropped from the host's registry.
    pub teardown_errors: Vec<TeardownError>,

    /// Fixtures that were kept alive.
    pub retained: Vec<RetainedBinding>,

    /// Dependency cycles that prevented part of the invalidation.
    pub cycles: Vec<CycleDiagnostic>,
}

impl InvalidationResult {
    /// Returns human-readable caveats about this invalidation, for inclusion in reports.
    ///
    /// Fixtures kept because of their scope are the normal case and aren't mentioned.
    pub fn caveats(&self) -> Vec<String> {
        let cycles = self.cycles.iter().map(|cycle| {
            format!(
                "fixtures were not invalidated before the rerun: {}",
                cycle.error
            )
        });
        let shared = self.retained.iter().filter_map(|retained| match &retained.reason {
            RetainReason::SharedWithPendingTest(other) => Some(format!(
                "fixture {} was not invalidated because pending test `{other}` still uses it",
                retained.key,
            )),
            _ => None,
        });
        cycles.chain(shared).collect()
    }
}
