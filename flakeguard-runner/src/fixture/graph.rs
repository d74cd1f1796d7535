// Copyright (c) The flakeguard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{FixtureBinding, FixtureKey};
use crate::{helpers::plural, host::TestHost, host::TestItemId};
use indexmap::IndexMap;
use petgraph::{
    Directed, Direction, Graph,
    algo::{scc::kosaraju_scc, toposort},
    graph::NodeIndex,
    unionfind::UnionFind,
};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

/// Tracks which fixtures are held by tests that are waiting to be rerun.
///
/// The tracker never manages fixture lifecycles. It reads bindings from the host and remembers
/// the keys held by pending tests, so that a shared fixture still needed by one of them is never
/// torn down on behalf of another.
#[derive(Clone, Debug, Default)]
pub struct FixtureGraphTracker {
    pending: HashMap<TestItemId, BTreeSet<FixtureKey>>,
}

impl FixtureGraphTracker {
    /// Creates a new, empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the fixtures currently bound to the given test.
    ///
    /// Starts from the bindings the test requested (as arguments, through autouse or through an
    /// explicit declaration) and adds every binding reachable from them through their
    /// dependencies. Other bindings reported by the host are ignored.
    ///
    /// If the host cannot report bindings for the test, returns an empty snapshot.
    pub fn snapshot<H: TestHost + ?Sized>(&self, host: &H, item: &TestItemId) -> FixtureSnapshot {
        let Some(active) = host.active_fixture_bindings(item) else {
            debug!("host reported no active fixture bindings for {item}");
            return FixtureSnapshot::empty(item.clone());
        };

        let by_key: IndexMap<FixtureKey, FixtureBinding> = active
            .into_iter()
            .map(|binding| (binding.key.clone(), binding))
            .collect();

        let mut reachable = HashSet::new();
        let mut stack: Vec<&FixtureKey> = by_key
            .values()
            .filter(|binding| binding.source.is_requested())
            .map(|binding| &binding.key)
            .collect();
        while let Some(key) = stack.pop() {
            if !reachable.insert(key.clone()) {
                continue;
            }
            if let Some(binding) = by_key.get(key) {
                stack.extend(binding.requires.iter());
            }
        }

        let bindings: IndexMap<_, _> = by_key
            .into_iter()
            .filter(|(key, _)| reachable.contains(key))
            .collect();

        // Edges to fixtures the host didn't report can't be acted upon.
        let bindings = bindings
            .into_iter()
            .map(|(key, mut binding)| {
                binding.requires.retain(|dep| {
                    let known = reachable.contains(dep);
                    if !known {
                        debug!("{key} requires {dep}, which is not bound to {item}: ignoring edge");
                    }
                    known
                });
                (key, binding)
            })
            .collect::<IndexMap<_, _>>();

        debug!(
            "snapshot for {item}: {} {}",
            bindings.len(),
            plural::fixtures_str(bindings.len()),
        );

        FixtureSnapshot {
            test_id: item.clone(),
            bindings,
        }
    }

    /// Records the keys held by a test that is now waiting to be rerun.
    pub fn track(&mut self, snapshot: &FixtureSnapshot) {
        self.pending.insert(
            snapshot.test_id.clone(),
            snapshot.bindings.keys().cloned().collect(),
        );
    }

    /// Forgets about a test that has reached a final status.
    pub fn release(&mut self, item: &TestItemId) {
        self.pending.remove(item);
    }

    /// Returns true if the given test is being tracked.
    pub fn is_tracked(&self, item: &TestItemId) -> bool {
        self.pending.contains_key(item)
    }

    /// Returns a pending test other than `except` that holds the given key, if any.
    ///
    /// If several tests hold the key, the smallest identifier is returned.
    pub fn other_consumer(&self, key: &FixtureKey, except: &TestItemId) -> Option<&TestItemId> {
        self.pending
            .iter()
            .filter(|(id, keys)| *id != except && keys.contains(key))
            .map(|(id, _)| id)
            .min()
    }
}

/// The fixtures bound to one test at one point in time.
#[derive(Clone, Debug)]
pub struct FixtureSnapshot {
    test_id: TestItemId,
    bindings: IndexMap<FixtureKey, FixtureBinding>,
}

impl FixtureSnapshot {
    /// Creates an empty snapshot.
    pub fn empty(test_id: TestItemId) -> Self {
        Self {
            test_id,
            bindings: IndexMap::new(),
        }
    }

    /// Returns the test this snapshot is for.
    pub fn test_id(&self) -> &TestItemId {
        &self.test_id
    }

    /// Returns the number of bindings.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Returns true if there are no bindings.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Looks up a binding by key.
    pub fn get(&self, key: &FixtureKey) -> Option<&FixtureBinding> {
        self.bindings.get(key)
    }

    /// Iterates over bindings in the order the host reported them.
    pub fn iter(&self) -> impl Iterator<Item = &FixtureBinding> {
        self.bindings.values()
    }

    /// Returns the declared prerequisites of the given binding that are part of this snapshot.
    pub fn dependencies_of<'a>(
        &'a self,
        binding: &'a FixtureBinding,
    ) -> impl Iterator<Item = &'a FixtureBinding> + 'a {
        binding
            .requires
            .iter()
            .filter_map(|key| self.bindings.get(key))
    }

    /// Returns the bindings in this snapshot that directly require the given key.
    pub fn dependents_of<'a>(
        &'a self,
        key: &'a FixtureKey,
    ) -> impl Iterator<Item = &'a FixtureBinding> + 'a {
        self.bindings
            .values()
            .filter(move |binding| binding.requires.contains(key))
    }

    /// Builds the dependency graph for this snapshot.
    pub fn dependency_graph(&self) -> DependencyGraph<'_> {
        DependencyGraph::new(self)
    }
}

/// The dependency graph of a [`FixtureSnapshot`].
///
/// Edges point from a fixture to the fixtures it requires, so a topological order of the graph
/// lists dependents before their dependencies. That's the order finalizers must run in.
#[derive(Debug)]
pub struct DependencyGraph<'a> {
    graph: Graph<&'a FixtureKey, (), Directed>,
    nodes: HashMap<&'a FixtureKey, NodeIndex>,
}

impl<'a> DependencyGraph<'a> {
    fn new(snapshot: &'a FixtureSnapshot) -> Self {
        let mut graph = Graph::with_capacity(snapshot.len(), snapshot.len());
        let mut nodes = HashMap::with_capacity(snapshot.len());
        for key in snapshot.bindings.keys() {
            nodes.insert(key, graph.add_node(key));
        }
        for binding in snapshot.bindings.values() {
            let from = nodes[&binding.key];
            for dep in &binding.requires {
                if let Some(&to) = nodes.get(dep) {
                    graph.add_edge(from, to, ());
                }
            }
        }
        Self { graph, nodes }
    }

    /// Returns every dependency cycle in the graph, using Kosaraju's algorithm.
    ///
    /// Each cycle is returned as a sorted list of keys. A fixture that requires itself is a cycle
    /// of length 1.
    pub fn cycles(&self) -> Vec<Vec<FixtureKey>> {
        let mut cycles: Vec<Vec<FixtureKey>> = kosaraju_scc(&self.graph)
            .into_iter()
            .filter(|scc| match scc.as_slice() {
                [single] => self.graph.contains_edge(*single, *single),
                _ => true,
            })
            .map(|scc| {
                let mut keys: Vec<_> = scc.iter().map(|ix| self.graph[*ix].clone()).collect();
                keys.sort();
                keys
            })
            .collect();
        cycles.sort();
        cycles
    }

    /// Returns every key in the same weakly connected component as any of the given keys.
    pub fn connected_to<'k>(
        &self,
        keys: impl IntoIterator<Item = &'k FixtureKey>,
    ) -> HashSet<&'a FixtureKey> {
        let mut components = UnionFind::new(self.graph.node_count());
        for edge in self.graph.raw_edges() {
            components.union(edge.source().index(), edge.target().index());
        }

        let roots: HashSet<usize> = keys
            .into_iter()
            .filter_map(|key| self.nodes.get(key))
            .map(|ix| components.find(ix.index()))
            .collect();

        self.graph
            .node_indices()
            .filter(|ix| roots.contains(&components.find(ix.index())))
            .map(|ix| self.graph[ix])
            .collect()
    }

    /// Returns the keys of the fixtures that directly require the given key.
    pub fn dependents(&self, key: &FixtureKey) -> impl Iterator<Item = &'a FixtureKey> + '_ {
        self.nodes.get(key).into_iter().flat_map(move |&ix| {
            self.graph
                .neighbors_directed(ix, Direction::Incoming)
                .map(move |dependent| self.graph[dependent])
        })
    }

    /// Returns the given keys in finalization order: every fixture comes before the fixtures it
    /// requires.
    ///
    /// Only edges between the given keys are considered. Returns the members of a cycle if the
    /// subgraph isn't acyclic.
    pub fn finalization_order(
        &self,
        keys: &HashSet<&FixtureKey>,
    ) -> Result<Vec<&'a FixtureKey>, Vec<FixtureKey>> {
        // Build the induced subgraph, preserving node order for a stable result.
        let mut subgraph = Graph::<&'a FixtureKey, (), Directed>::new();
        let mut sub_nodes = HashMap::new();
        for ix in self.graph.node_indices() {
            let key = self.graph[ix];
            if keys.contains(key) {
                sub_nodes.insert(ix, subgraph.add_node(key));
            }
        }
        for edge in self.graph.raw_edges() {
            if let (Some(&from), Some(&to)) =
                (sub_nodes.get(&edge.source()), sub_nodes.get(&edge.target()))
            {
                subgraph.add_edge(from, to, ());
            }
        }

        toposort(&subgraph, None)
            .map(|order| order.into_iter().map(|ix| subgraph[ix]).collect())
            .map_err(|cycle| {
                let start = cycle.node_id();
                let members = kosaraju_scc(&subgraph)
                    .into_iter()
                    .find(|scc| scc.contains(&start))
                    .unwrap_or_else(|| vec![start]);
                let mut members: Vec<_> = members.iter().map(|ix| subgraph[*ix].clone()).collect();
                members.sort();
                members
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        fixture::{BindingSource, FinalizerHandle, FixtureScope},
        host::{AttemptReports, FinalizerFailure},
    };
    use pretty_assertions::assert_eq;

    struct StaticHost {
        bindings: Option<Vec<FixtureBinding>>,
    }

    impl TestHost for StaticHost {
        fn execute(&mut self, _item: &TestItemId) -> AttemptReports {
            AttemptReports::passed()
        }

        fn active_fixture_bindings(&self, _item: &TestItemId) -> Option<Vec<FixtureBinding>> {
            self.bindings.clone()
        }

        fn finalize(&mut self, _binding: &FixtureBinding) -> Result<(), FinalizerFailure> {
            Ok(())
        }

        fn drop_binding(&mut self, _key: &FixtureKey) {}
    }

    fn binding(name: &str, source: BindingSource, requires: &[&str]) -> FixtureBinding {
        FixtureBinding::new(
            FixtureKey::function(name, "t::a"),
            source,
            FinalizerHandle(0),
        )
        .with_requires(requires.iter().map(|dep| FixtureKey::function(*dep, "t::a")))
    }

    fn key(name: &str) -> FixtureKey {
        FixtureKey::function(name, "t::a")
    }

    fn names<'a>(keys: impl IntoIterator<Item = &'a FixtureKey>) -> Vec<&'a str> {
        keys.into_iter().map(|key| key.name()).collect()
    }

    #[test]
    fn snapshot_follows_requested_roots() {
        let host = StaticHost {
            bindings: Some(vec![
                binding("db", BindingSource::Argument, &["conn"]),
                binding("conn", BindingSource::Dependency, &["config"]),
                binding("config", BindingSource::Dependency, &[]),
                binding("tmpdir", BindingSource::Autouse, &[]),
                binding("unrelated", BindingSource::Dependency, &[]),
                binding("marker", BindingSource::UseFixtures, &["missing"]),
            ]),
        };
        let snapshot = FixtureGraphTracker::new().snapshot(&host, &TestItemId::new("t::a"));

        assert_eq!(
            names(snapshot.iter().map(|binding| &binding.key)),
            vec!["db", "conn", "config", "tmpdir", "marker"],
            "unreachable dependency bindings are dropped, host order is kept",
        );

        let marker = snapshot.get(&key("marker")).expect("marker is bound");
        assert!(marker.requires.is_empty(), "edges to unknown bindings are dropped");

        let db = snapshot.get(&key("db")).expect("db is bound");
        assert_eq!(
            names(snapshot.dependencies_of(db).map(|binding| &binding.key)),
            vec!["conn"]
        );
        assert_eq!(
            names(snapshot.dependents_of(&key("config")).map(|binding| &binding.key)),
            vec!["conn"]
        );
    }

    #[test]
    fn snapshot_without_host_bindings_is_empty() {
        let host = StaticHost { bindings: None };
        let snapshot = FixtureGraphTracker::new().snapshot(&host, &TestItemId::new("t::a"));
        assert!(snapshot.is_empty());
    }

    #[test]
    fn finalization_order_puts_dependents_first() {
        let host = StaticHost {
            bindings: Some(vec![
                binding("config", BindingSource::Autouse, &[]),
                binding("conn", BindingSource::Dependency, &["config"]),
                binding("db", BindingSource::Argument, &["conn", "config"]),
            ]),
        };
        let snapshot = FixtureGraphTracker::new().snapshot(&host, &TestItemId::new("t::a"));
        let graph = snapshot.dependency_graph();
        assert!(graph.cycles().is_empty());

        let all: HashSet<_> = snapshot.iter().map(|binding| &binding.key).collect();
        let order = graph.finalization_order(&all).expect("graph is acyclic");
        assert_eq!(names(order), vec!["db", "conn", "config"]);
    }

    #[test]
    fn cycles_and_their_components() {
        let host = StaticHost {
            bindings: Some(vec![
                binding("a", BindingSource::Argument, &["b"]),
                binding("b", BindingSource::Dependency, &["c"]),
                binding("c", BindingSource::Dependency, &["a"]),
                binding("leaf", BindingSource::Dependency, &[]),
                binding("user", BindingSource::Argument, &["a", "leaf"]),
                binding("self_ref", BindingSource::Argument, &["self_ref"]),
                binding("alone", BindingSource::Argument, &[]),
            ]),
        };
        let snapshot = FixtureGraphTracker::new().snapshot(&host, &TestItemId::new("t::a"));
        let graph = snapshot.dependency_graph();

        let cycles = graph.cycles();
        assert_eq!(
            cycles
                .iter()
                .map(|cycle| names(cycle))
                .collect::<Vec<_>>(),
            vec![vec!["a", "b", "c"], vec!["self_ref"]],
        );

        let mut tainted = names(graph.connected_to(&cycles[0]));
        tainted.sort_unstable();
        assert_eq!(tainted, vec!["a", "b", "c", "leaf", "user"]);

        let all: HashSet<_> = snapshot.iter().map(|binding| &binding.key).collect();
        let members = graph
            .finalization_order(&all)
            .expect_err("graph has a cycle");
        assert!(!members.is_empty());
    }

    #[test]
    fn tracker_other_consumer() {
        let shared = FixtureKey::new("server", FixtureScope::Session, "");
        let mut tracker = FixtureGraphTracker::new();
        for id in ["t::a", "t::b"] {
            let host = StaticHost {
                bindings: Some(vec![FixtureBinding::new(
                    shared.clone(),
                    BindingSource::Argument,
                    FinalizerHandle(1),
                )]),
            };
            let snapshot = tracker.snapshot(&host, &TestItemId::new(id));
            tracker.track(&snapshot);
        }

        let a = TestItemId::new("t::a");
        let b = TestItemId::new("t::b");
        assert_eq!(tracker.other_consumer(&shared, &a), Some(&b));
        tracker.release(&b);
        assert_eq!(tracker.other_consumer(&shared, &a), None);
        assert!(tracker.is_tracked(&a));
    }
}
