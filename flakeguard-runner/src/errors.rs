// Copyright (c) The flakeguard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by flakeguard.

use crate::{fixture::FixtureKey, host::TestItemId};
use camino::Utf8PathBuf;
use config::ConfigError;
use itertools::Itertools;
use std::{error, fmt};
use thiserror::Error;

/// An error that occurred while parsing the config.
#[derive(Debug, Error)]
#[error("failed to parse flakeguard config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self {
            config_file: config_file.into(),
            kind,
        }
    }

    /// Returns the config file for this error.
    pub fn config_file(&self) -> &Utf8PathBuf {
        &self.config_file
    }

    /// Returns the kind of error this is.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of error that occurred while parsing a config.
///
/// Returned by [`ConfigParseError::kind`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseErrorKind {
    /// An error occurred while building the config.
    #[error(transparent)]
    BuildError(Box<ConfigError>),

    /// An error occurred while deserializing the config.
    #[error(transparent)]
    DeserializeError(Box<serde_path_to_error::Error<ConfigError>>),

    /// Errors occurred while compiling overrides.
    #[error("error compiling overrides")]
    CompileErrors(Vec<ConfigCompileError>),
}

/// An error that occurred while compiling an override in a profile.
#[derive(Debug, Error)]
#[error("for profile `{profile_name}`, override at index {index} is invalid")]
#[non_exhaustive]
pub struct ConfigCompileError {
    /// The name of the profile under which the override was found.
    pub profile_name: String,

    /// The index of the override within the profile.
    pub index: usize,

    /// The kind of error that occurred.
    #[source]
    pub kind: ConfigCompileErrorKind,
}

/// The kind of error that occurred while compiling an override.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigCompileErrorKind {
    /// The filter could not be parsed as a glob.
    #[error("invalid filter `{filter}`")]
    InvalidFilter {
        /// The filter as written.
        filter: String,

        /// The underlying error.
        #[source]
        error: globset::Error,
    },

    /// Neither `reruns` nor `reruns-delay` were specified.
    #[error("at least one of `reruns` and `reruns-delay` must be specified")]
    NoSettings,
}

/// An error which indicates that a profile was requested but not known to flakeguard.
#[derive(Clone, Debug, Error)]
#[error("profile `{profile}` not found (known profiles: {})", .all_profiles.join(", "))]
pub struct ProfileNotFound {
    profile: String,
    all_profiles: Vec<String>,
}

impl ProfileNotFound {
    pub(crate) fn new(
        profile: impl Into<String>,
        all_profiles: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let mut all_profiles: Vec<_> = all_profiles.into_iter().map(|s| s.into()).collect();
        all_profiles.sort_unstable();
        Self {
            profile: profile.into(),
            all_profiles,
        }
    }
}

/// Error returned while parsing a [`FailureThreshold`](crate::config::FailureThreshold) value from
/// a string.
#[derive(Clone, Debug, Error)]
#[error(
    "unrecognized value for rerun-threshold: {input}\n\
     (expected a non-negative integer or \"unlimited\")"
)]
pub struct ThresholdParseError {
    input: String,
}

impl ThresholdParseError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

/// A delay between reruns was too large to be represented.
#[derive(Clone, Debug, Error)]
#[error("delay between reruns is out of range ({secs}s)")]
pub struct DelayRangeError {
    secs: f64,
}

impl DelayRangeError {
    pub(crate) fn new(secs: f64) -> Self {
        Self { secs }
    }

    /// Returns the delay that was requested, in seconds.
    pub fn secs(&self) -> f64 {
        self.secs
    }
}

/// A `flaky` marker on a test had invalid arguments.
#[derive(Clone, Debug, Error)]
#[error("flaky marker on `{test_id}` is invalid: {kind}")]
pub struct MarkerError {
    test_id: TestItemId,
    kind: MarkerErrorKind,
}

impl MarkerError {
    pub(crate) fn new(test_id: TestItemId, kind: MarkerErrorKind) -> Self {
        Self { test_id, kind }
    }

    /// Returns the test the marker was found on.
    pub fn test_id(&self) -> &TestItemId {
        &self.test_id
    }

    /// Returns what was wrong with the marker.
    pub fn kind(&self) -> &MarkerErrorKind {
        &self.kind
    }
}

/// The kind of problem found in a `flaky` marker.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum MarkerErrorKind {
    /// The rerun count was negative.
    #[error("negative rerun count ({0})")]
    NegativeReruns(i64),

    /// The delay could not be represented.
    #[error(transparent)]
    Delay(#[from] DelayRangeError),
}

/// An error that occurred while configuring a [`RerunScheduler`](crate::runner::RerunScheduler).
///
/// These errors are reported before any test executes.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum RerunBuildError {
    /// A negative rerun count was provided.
    #[error("number of reruns must be non-negative (got {0})")]
    NegativeReruns(i64),

    /// Reruns were requested together with an interactive debugger.
    #[error(
        "reruns ({reruns}) cannot be used together with an interactive debugger \
         (use collect-only mode, or disable reruns)"
    )]
    IncompatibleWithDebugger {
        /// The number of reruns requested.
        reruns: u32,
    },

    /// A marker on a test was invalid.
    #[error(transparent)]
    Marker(#[from] MarkerError),

    /// The same test was added to the scheduler twice.
    #[error("test `{0}` was added to the scheduler more than once")]
    DuplicateItem(TestItemId),
}

/// An error that occurred while recording the primary attempt of a test.
///
/// These errors indicate a bug in the host integration.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum RecordPrimaryError {
    /// The test was never added to the scheduler.
    #[error("test `{0}` is not known to the scheduler")]
    UnknownItem(TestItemId),

    /// The primary attempt of the test was already recorded.
    #[error("primary attempt of `{0}` was already recorded")]
    AlreadyRecorded(TestItemId),
}

/// A fixture finalizer raised while fixtures were being invalidated before a rerun.
///
/// Teardown errors are reported separately from the test's own failure, and never count towards
/// the rerun threshold.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("finalizer for fixture {fixture} raised before attempt {attempt} of `{test_id}`")]
pub struct TeardownError {
    test_id: TestItemId,
    attempt: usize,
    fixture: FixtureKey,
    trace: String,
}

impl TeardownError {
    pub(crate) fn new(
        test_id: TestItemId,
        attempt: usize,
        fixture: FixtureKey,
        trace: String,
    ) -> Self {
        Self {
            test_id,
            attempt,
            fixture,
            trace,
        }
    }

    /// Returns the test whose fixtures were being invalidated.
    pub fn test_id(&self) -> &TestItemId {
        &self.test_id
    }

    /// Returns the attempt that the invalidation preceded.
    pub fn attempt(&self) -> usize {
        self.attempt
    }

    /// Returns the fixture whose finalizer raised.
    pub fn fixture(&self) -> &FixtureKey {
        &self.fixture
    }

    /// Returns the trace text produced by the finalizer.
    pub fn trace(&self) -> &str {
        &self.trace
    }
}

/// Fixtures bound to a test depend on each other in a cycle.
///
/// Invalidation of the affected fixtures is skipped, but the rerun still proceeds.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error(
    "dependency cycle between fixtures of `{test_id}`: {}",
    .cycle.iter().join(", "),
)]
pub struct DependencyCycleError {
    test_id: TestItemId,
    cycle: Vec<FixtureKey>,
}

impl DependencyCycleError {
    pub(crate) fn new(test_id: TestItemId, cycle: Vec<FixtureKey>) -> Self {
        Self { test_id, cycle }
    }

    /// Returns the test for which the cycle was found.
    pub fn test_id(&self) -> &TestItemId {
        &self.test_id
    }

    /// Returns the fixtures that are part of the cycle, sorted.
    pub fn cycle(&self) -> &[FixtureKey] {
        &self.cycle
    }
}

/// An error that occurred while writing the rerun statistics artifact.
///
/// Artifact errors never fail the session.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ArtifactWriteError {
    /// The artifact could not be serialized.
    #[error("error serializing rerun statistics")]
    Serialize(#[source] serde_json::Error),

    /// The parent directory could not be created.
    #[error("error creating directory `{path}`")]
    CreateDir {
        /// The directory being created.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The artifact could not be written.
    #[error("error writing rerun statistics to `{path}`")]
    Write {
        /// The path being written to.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: atomicwrites::Error<std::io::Error>,
    },
}

/// An error that occurred while writing a JUnit report or a result log.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WriteReportError {
    /// An error occurred while operating on the file system.
    #[error("error operating on path `{file}`")]
    Fs {
        /// The file being operated on.
        file: Utf8PathBuf,

        /// The underlying IO error.
        #[source]
        error: std::io::Error,
    },

    /// An error occurred while producing JUnit XML.
    #[error("error writing JUnit output to `{file}`")]
    Junit {
        /// The output file.
        file: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: quick_junit::SerializeError,
    },
}

/// Displays an error along with its chain of sources.
pub struct DisplayErrorChain<E> {
    error: E,
}

impl<E: error::Error> DisplayErrorChain<E> {
    /// Creates a new `DisplayErrorChain`.
    pub fn new(error: E) -> Self {
        Self { error }
    }
}

impl<E: error::Error> fmt::Display for DisplayErrorChain<E> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.error)?;

        let mut source = self.error.source();
        while let Some(error) = source {
            write!(f, "\n  caused by:\n  - {error}")?;
            source = error.source();
        }

        Ok(())
    }
}
