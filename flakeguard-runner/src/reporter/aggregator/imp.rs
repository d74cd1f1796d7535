// Copyright (c) The flakeguard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{junit::MetadataJunit, result_log::ResultLog};
use crate::{config::RerunProfile, errors::WriteReportError, reporter::events::RerunEvent};

#[derive(Clone, Debug)]
pub(crate) struct EventAggregator<'cfg> {
    junit: Option<MetadataJunit<'cfg>>,
    result_log: Option<ResultLog>,
}

impl<'cfg> EventAggregator<'cfg> {
    pub(crate) fn new(profile: &RerunProfile<'cfg>) -> Self {
        Self {
            junit: profile.junit().map(MetadataJunit::new),
            result_log: profile.result_log_path().map(ResultLog::new),
        }
    }

    /// Feeds an event to every configured report.
    ///
    /// The result log is appended to as attempts finish, and the JUnit report is written on
    /// `RunFinished`. An error in one report doesn't stop the others from being written.
    pub(crate) fn write_event(&mut self, event: &RerunEvent<'_>) -> Vec<WriteReportError> {
        let mut errors = Vec::new();
        if let Some(junit) = &mut self.junit
            && let Err(error) = junit.write_event(event)
        {
            errors.push(error);
        }
        if let Some(result_log) = &mut self.result_log
            && let Err(error) = result_log.write_event(event)
        {
            errors.push(error);
        }
        errors
    }
}
