// Copyright (c) The flakeguard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{RerunScheduler, imp::SchedulerOptions};
use crate::{
    config::{FailureThreshold, RerunDelay, RerunProfile},
    errors::RerunBuildError,
};
use camino::Utf8PathBuf;
use tracing::debug;

/// Rerun scheduler options.
///
/// Values set here come from the command line. They take precedence over the profile, but not over
/// a matching override.
#[derive(Debug, Default)]
pub struct RerunSchedulerBuilder {
    reruns: Option<i64>,
    reruns_delay: Option<RerunDelay>,
    threshold: Option<FailureThreshold>,
    artifact_path: Option<Utf8PathBuf>,
    interactive_debugger: bool,
    collect_only: bool,
}

impl RerunSchedulerBuilder {
    /// Sets the number of reruns after the primary attempt.
    ///
    /// Negative values are rejected by [`Self::build`].
    pub fn set_reruns(&mut self, reruns: i64) -> &mut Self {
        self.reruns = Some(reruns);
        self
    }

    /// Sets the delay between invalidating a test's fixtures and running it again.
    pub fn set_reruns_delay(&mut self, delay: RerunDelay) -> &mut Self {
        self.reruns_delay = Some(delay);
        self
    }

    /// Sets the distinct-failed-test threshold after which reruns are suppressed.
    pub fn set_threshold(&mut self, threshold: FailureThreshold) -> &mut Self {
        self.threshold = Some(threshold);
        self
    }

    /// Sets the path the statistics artifact is written to.
    pub fn set_artifact_path(&mut self, path: impl Into<Utf8PathBuf>) -> &mut Self {
        self.artifact_path = Some(path.into());
        self
    }

    /// Sets whether the host drops into an interactive debugger on failures.
    pub fn set_interactive_debugger(&mut self, interactive_debugger: bool) -> &mut Self {
        self.interactive_debugger = interactive_debugger;
        self
    }

    /// Sets whether the session only collects tests without running them.
    pub fn set_collect_only(&mut self, collect_only: bool) -> &mut Self {
        self.collect_only = collect_only;
        self
    }

    /// Creates a new scheduler for the given profile.
    pub fn build<'cfg>(
        self,
        profile: &RerunProfile<'cfg>,
    ) -> Result<RerunScheduler<'cfg>, RerunBuildError> {
        let cli_reruns = self
            .reruns
            .map(|reruns| u32::try_from(reruns).map_err(|_| RerunBuildError::NegativeReruns(reruns)))
            .transpose()?;

        let reruns = cli_reruns.unwrap_or_else(|| profile.reruns());
        if reruns > 0 && self.interactive_debugger && !self.collect_only {
            return Err(RerunBuildError::IncompatibleWithDebugger { reruns });
        }

        let threshold = self.threshold.unwrap_or_else(|| profile.threshold());
        let artifact_path = self.artifact_path.or_else(|| profile.artifact_path());
        debug!(
            "building rerun scheduler for profile `{}`: reruns = {reruns}, threshold = {threshold}",
            profile.name(),
        );

        Ok(RerunScheduler::new(
            profile.clone(),
            SchedulerOptions {
                cli_reruns,
                cli_delay: self.reruns_delay,
                threshold,
                artifact_path,
            },
        ))
    }
}
