// Copyright (c) The flakeguard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    errors::{ArtifactWriteError, DisplayErrorChain},
    host::{AttemptOutcome, TestItemId},
    runner::{AttemptRecord, TestItem, TestStatus},
};
use atomicwrites::{AllowOverwrite, AtomicFile};
use camino::{Utf8Path, Utf8PathBuf};
use flakeguard_metadata::{
    AttemptOutcomeSummary, RerunAttemptSummary, RerunReportSummary, RerunTestSummary,
    TeardownErrorSummary,
};
use indexmap::IndexMap;
use std::io::Write;
use tracing::{debug, warn};

/// A transition recorded by the [`StatsCollector`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StatsEvent {
    /// A rerun attempt of the test finished executing.
    RerunFinished,

    /// The test reached its final status.
    TestFinished,
}

/// Aggregates rerun statistics for a session, and writes them to a JSON artifact.
///
/// Counters only ever increase. Tests that passed on their primary attempt are not recorded.
#[derive(Clone, Debug, Default)]
pub struct StatsCollector {
    total_reruns: usize,
    total_failed: usize,
    total_resolved_by_reruns: usize,
    tests: IndexMap<TestItemId, RerunTestSummary>,
    generation: u64,
    last_flush: Option<(Utf8PathBuf, u64)>,
}

impl StatsCollector {
    /// Creates a new, empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a transition of `item`.
    pub fn record(&mut self, item: &TestItem, event: StatsEvent) {
        match event {
            StatsEvent::RerunFinished => {
                self.total_reruns += 1;
            }
            StatsEvent::TestFinished => {
                let Some(status) = item.status() else {
                    debug!("ignoring finish of {} without a final status", item.id());
                    return;
                };
                let Some(summary_status) = status.to_summary() else {
                    // Tests that never failed aren't part of the artifact.
                    return;
                };
                if self.tests.contains_key(item.id()) {
                    debug!("{} already recorded as finished", item.id());
                    return;
                }

                match status {
                    TestStatus::Flaky => self.total_resolved_by_reruns += 1,
                    TestStatus::Failed | TestStatus::Error => self.total_failed += 1,
                    TestStatus::Passed => {}
                }

                let summary = RerunTestSummary {
                    nodeid: item.id().to_string(),
                    status: summary_status,
                    rerun_trace: item
                        .reruns()
                        .last()
                        .map(AttemptRecord::traces)
                        .unwrap_or_default(),
                    original_trace: item
                        .primary_attempt()
                        .map(AttemptRecord::traces)
                        .unwrap_or_default(),
                    attempts: item.reruns().iter().map(attempt_summary).collect(),
                    teardown_errors: item
                        .teardown_errors()
                        .iter()
                        .map(|error| TeardownErrorSummary {
                            attempt: error.attempt(),
                            fixture: error.fixture().name().to_owned(),
                            scope: error.fixture().scope().to_string(),
                            trace: error.trace().to_owned(),
                        })
                        .collect(),
                    caveats: item.caveats().to_vec(),
                };
                self.tests.insert(item.id().clone(), summary);
            }
        }
        self.generation += 1;
    }

    /// Returns a snapshot of the running totals.
    pub fn snapshot(&self) -> RerunStatsSnapshot {
        RerunStatsSnapshot {
            total_reruns: self.total_reruns,
            total_failed: self.total_failed,
            total_resolved_by_reruns: self.total_resolved_by_reruns,
            rerun_tests: self.tests.len(),
        }
    }

    /// Returns the recorded statistics in the form written to the artifact.
    pub fn summary(&self) -> RerunReportSummary {
        RerunReportSummary {
            total_reruns: self.total_reruns,
            total_failed: self.total_failed,
            total_resolved_by_reruns: self.total_resolved_by_reruns,
            rerun_tests: self.tests.values().cloned().collect(),
        }
    }

    /// Writes the statistics to `path` as JSON.
    ///
    /// Flushing again to the same path without recording anything in between doesn't touch the
    /// file. Errors are logged and returned in [`FlushStatus::Failed`], but are never fatal.
    pub fn flush(&mut self, path: &Utf8Path) -> FlushStatus {
        if let Some((last_path, generation)) = &self.last_flush
            && last_path == path
            && *generation == self.generation
        {
            debug!("rerun statistics at {path} are up to date");
            return FlushStatus::Unchanged;
        }

        match self.write_artifact(path) {
            Ok(()) => {
                debug!("wrote rerun statistics to {path}");
                self.last_flush = Some((path.to_owned(), self.generation));
                FlushStatus::Written
            }
            Err(error) => {
                warn!(
                    "failed to write rerun statistics: {}",
                    DisplayErrorChain::new(&error)
                );
                FlushStatus::Failed(error)
            }
        }
    }

    fn write_artifact(&self, path: &Utf8Path) -> Result<(), ArtifactWriteError> {
        let json = self
            .summary()
            .to_json_pretty()
            .map_err(ArtifactWriteError::Serialize)?;

        if let Some(parent) = path.parent()
            && !parent.as_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|error| ArtifactWriteError::CreateDir {
                path: parent.to_owned(),
                error,
            })?;
        }

        AtomicFile::new(path, AllowOverwrite)
            .write(|f| f.write_all(json.as_bytes()))
            .map_err(|error| ArtifactWriteError::Write {
                path: path.to_owned(),
                error,
            })
    }
}

fn attempt_summary(record: &AttemptRecord) -> RerunAttemptSummary {
    RerunAttemptSummary {
        attempt: record.attempt,
        outcome: match record.outcome {
            AttemptOutcome::Passed => AttemptOutcomeSummary::Passed,
            AttemptOutcome::Failed => AttemptOutcomeSummary::Failed,
            AttemptOutcome::Error => AttemptOutcomeSummary::Error,
        },
        trace: record.traces(),
    }
}

/// Running totals of a [`StatsCollector`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RerunStatsSnapshot {
    /// The number of rerun attempts that were executed.
    pub total_reruns: usize,

    /// The number of tests that ended up failed.
    pub total_failed: usize,

    /// The number of tests that passed after failing at least once.
    pub total_resolved_by_reruns: usize,

    /// The number of tests recorded in the artifact.
    pub rerun_tests: usize,
}

/// The result of [`StatsCollector::flush`].
#[derive(Debug)]
pub enum FlushStatus {
    /// The artifact was written.
    Written,

    /// Nothing was recorded since the last flush to the same path, so the artifact was left
    /// alone.
    Unchanged,

    /// No artifact path is configured.
    Skipped,

    /// The artifact could not be written.
    Failed(ArtifactWriteError),
}

impl FlushStatus {
    /// Returns true if the artifact on disk reflects everything recorded.
    pub fn is_success(&self) -> bool {
        matches!(self, FlushStatus::Written | FlushStatus::Unchanged)
    }
}
