// Copyright (c) The flakeguard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::ReadSummaryError;
use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Root element of the rerun statistics artifact.
///
/// The four top-level keys are stable. Keys added to [`RerunTestSummary`] after the first version
/// of the format are optional while reading, so older artifacts still parse.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct RerunReportSummary {
    /// The total number of rerun attempts executed in the session.
    ///
    /// The primary attempt of a test is not counted.
    pub total_reruns: usize,

    /// The number of tests that failed and were not resolved by a rerun.
    pub total_failed: usize,

    /// The number of tests that failed at least once and later passed.
    pub total_resolved_by_reruns: usize,

    /// One entry for each test that failed at least once, in first-failure order.
    pub rerun_tests: Vec<RerunTestSummary>,
}

impl RerunReportSummary {
    /// Parses a summary from a JSON string.
    pub fn parse_json(json: impl AsRef<str>) -> Result<Self, ReadSummaryError> {
        serde_json::from_str(json.as_ref()).map_err(ReadSummaryError::Json)
    }

    /// Reads a summary from the given path.
    pub fn read_from_path(path: &Utf8Path) -> Result<Self, ReadSummaryError> {
        let contents = std::fs::read_to_string(path).map_err(|error| ReadSummaryError::Read {
            path: path.to_owned(),
            error,
        })?;
        Self::parse_json(contents)
    }

    /// Serializes this summary to pretty-printed JSON.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Returns the entry for the given node identifier, if any.
    pub fn test(&self, nodeid: &str) -> Option<&RerunTestSummary> {
        self.rerun_tests.iter().find(|test| test.nodeid == nodeid)
    }
}

/// Information about a single test that failed at least once.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RerunTestSummary {
    /// The node identifier of the test.
    pub nodeid: String,

    /// The final status of the test.
    pub status: RerunTestStatus,

    /// Traces from the last rerun attempt. Empty if no rerun was executed.
    pub rerun_trace: PhaseTraces,

    /// Traces from the original, failing attempt.
    pub original_trace: PhaseTraces,

    /// Every rerun attempt, in execution order.
    #[serde(default)]
    pub attempts: Vec<RerunAttemptSummary>,

    /// Errors raised by fixture finalizers while invalidating fixtures before a rerun.
    ///
    /// These are reported separately from the test's own failure.
    #[serde(default)]
    pub teardown_errors: Vec<TeardownErrorSummary>,

    /// Caveats about the reruns, for example fixtures that could not be invalidated.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub caveats: Vec<String>,
}

/// The final status of a test that failed at least once.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RerunTestStatus {
    /// The test failed, then passed on a rerun.
    Flaky,

    /// The test never passed.
    Failed,
}

impl RerunTestStatus {
    /// Returns the string used for this status in the artifact.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flaky => "flaky",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RerunTestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Captured trace text for the three phases of a test attempt.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct PhaseTraces {
    /// Trace text for the setup phase.
    pub setup: String,

    /// Trace text for the call phase.
    pub call: String,

    /// Trace text for the teardown phase.
    pub teardown: String,
}

impl PhaseTraces {
    /// Returns true if no trace text was captured for any phase.
    pub fn is_empty(&self) -> bool {
        self.setup.is_empty() && self.call.is_empty() && self.teardown.is_empty()
    }
}

/// A single rerun attempt.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RerunAttemptSummary {
    /// The attempt number, 1-based. The original attempt is 1, so reruns start at 2.
    pub attempt: usize,

    /// The outcome of the attempt.
    pub outcome: AttemptOutcomeSummary,

    /// Traces captured during the attempt.
    pub trace: PhaseTraces,
}

/// The outcome of a single attempt.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttemptOutcomeSummary {
    /// All phases passed.
    Passed,

    /// The test body failed.
    Failed,

    /// Setup or teardown failed.
    Error,
}

/// A fixture finalizer that raised while invalidating fixtures before a rerun.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TeardownErrorSummary {
    /// The attempt that the invalidation preceded.
    pub attempt: usize,

    /// The name of the fixture.
    pub fixture: String,

    /// The scope of the fixture.
    pub scope: String,

    /// The trace text produced by the finalizer.
    pub trace: String,
}
