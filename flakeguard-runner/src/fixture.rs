// Copyright (c) The flakeguard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fixture bindings, the dependency graph between them, and invalidation.
//!
//! Fixtures are owned by the host. flakeguard only ever holds [`FixtureKey`]s, which are enough to
//! ask the host to run a finalizer or to drop a binding from its registry.

mod graph;
mod invalidate;

pub use graph::*;
pub use invalidate::*;

use smol_str::SmolStr;
use std::fmt;

/// The scope of a fixture.
///
/// Scopes are ordered from narrowest to broadest.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[cfg_attr(test, derive(test_strategy::Arbitrary))]
pub enum FixtureScope {
    /// Created for, and torn down after, each test.
    Function,

    /// Shared by the tests of a class.
    Class,

    /// Shared by the tests of a module.
    Module,

    /// Shared by every test in the session.
    Session,
}

impl FixtureScope {
    /// Returns the name of the scope.
    pub fn as_str(self) -> &'static str {
        match self {
            FixtureScope::Function => "function",
            FixtureScope::Class => "class",
            FixtureScope::Module => "module",
            FixtureScope::Session => "session",
        }
    }

    /// Returns true if this scope is broader than a single test.
    pub fn is_shared(self) -> bool {
        self > FixtureScope::Function
    }
}

impl fmt::Display for FixtureScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A weak reference to one fixture instance.
///
/// The `scope_id` identifies which instance of the fixture is meant: empty for session fixtures,
/// the module or class path for module and class fixtures, and the test's node identifier for
/// function fixtures.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct FixtureKey {
    name: SmolStr,
    scope: FixtureScope,
    scope_id: SmolStr,
}

impl FixtureKey {
    /// Creates a new key.
    pub fn new(
        name: impl Into<SmolStr>,
        scope: FixtureScope,
        scope_id: impl Into<SmolStr>,
    ) -> Self {
        Self {
            name: name.into(),
            scope,
            scope_id: scope_id.into(),
        }
    }

    /// Creates a key for a function-scoped fixture bound to the given test.
    pub fn function(name: impl Into<SmolStr>, test_id: impl Into<SmolStr>) -> Self {
        Self::new(name, FixtureScope::Function, test_id)
    }

    /// Creates a key for a session-scoped fixture.
    pub fn session(name: impl Into<SmolStr>) -> Self {
        Self::new(name, FixtureScope::Session, "")
    }

    /// Returns the fixture name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the fixture scope.
    pub fn scope(&self) -> FixtureScope {
        self.scope
    }

    /// Returns the identifier of the scope instance.
    pub fn scope_id(&self) -> &str {
        &self.scope_id
    }
}

impl fmt::Display for FixtureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scope_id.is_empty() {
            write!(f, "{} ({})", self.name, self.scope)
        } else {
            write!(f, "{} ({} {})", self.name, self.scope, self.scope_id)
        }
    }
}

/// How a fixture came to be bound to a test.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BindingSource {
    /// Requested as a parameter of the test function.
    Argument,

    /// An autouse fixture visible to the test.
    Autouse,

    /// Requested through an explicit usefixtures declaration.
    UseFixtures,

    /// Bound only because another fixture requires it.
    Dependency,
}

impl BindingSource {
    /// Returns true if the test requested the fixture itself, rather than through another fixture.
    pub fn is_requested(self) -> bool {
        !matches!(self, BindingSource::Dependency)
    }
}

/// An opaque handle the host uses to find a fixture's finalizer chain.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct FinalizerHandle(pub u64);

/// One fixture instance used by one test.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FixtureBinding {
    /// The key identifying the fixture instance.
    pub key: FixtureKey,

    /// How the fixture came to be bound to the test.
    pub source: BindingSource,

    /// Fixtures this fixture requires.
    pub requires: Vec<FixtureKey>,

    /// The finalizer handle.
    pub finalizer: FinalizerHandle,

    /// Whether this fixture may be torn down before a rerun even though it is broader than
    /// function scope.
    ///
    /// Ignored for function-scoped fixtures, which are always eligible.
    pub invalidate_on_rerun: bool,
}

impl FixtureBinding {
    /// Creates a new binding with no dependencies.
    pub fn new(key: FixtureKey, source: BindingSource, finalizer: FinalizerHandle) -> Self {
        Self {
            key,
            source,
            requires: Vec::new(),
            finalizer,
            invalidate_on_rerun: false,
        }
    }

    /// Sets the fixtures this fixture requires.
    pub fn with_requires(mut self, requires: impl IntoIterator<Item = FixtureKey>) -> Self {
        self.requires = requires.into_iter().collect();
        self
    }

    /// Marks a broader-scoped fixture as eligible for invalidation before reruns.
    pub fn with_invalidate_on_rerun(mut self, invalidate_on_rerun: bool) -> Self {
        self.invalidate_on_rerun = invalidate_on_rerun;
        self
    }

    /// Returns the scope of the fixture.
    pub fn scope(&self) -> FixtureScope {
        self.key.scope()
    }
}
