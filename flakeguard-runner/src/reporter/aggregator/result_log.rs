// Copyright (c) The flakeguard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A plain-text log with one entry per reported phase.
//!
//! Each entry is a line of the form `<code> <test id>`, followed by the phase's trace indented by
//! one space. Passing setup and teardown phases are left out.
//!
//! Entries are appended as soon as each attempt finishes, so the log is usable while the session
//! is still running. The file is truncated by the first write of the session.

use crate::{
    errors::WriteReportError,
    helpers::indent_lines,
    host::Phase,
    reporter::events::{ReportOutcome, RerunEvent, RerunEventKind},
};
use camino::Utf8PathBuf;
use std::{
    fs::{File, OpenOptions},
    io::Write,
};
use swrite::{SWrite, swrite};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum LogState {
    /// Nothing has been written this session.
    NotCreated,
    Created,
    /// Writing failed once. The error has been reported, and later entries are dropped.
    Failed,
}

#[derive(Clone, Debug)]
pub(super) struct ResultLog {
    path: Utf8PathBuf,
    state: LogState,
}

impl ResultLog {
    pub(super) fn new(path: Utf8PathBuf) -> Self {
        Self {
            path,
            state: LogState::NotCreated,
        }
    }

    pub(super) fn write_event(&mut self, event: &RerunEvent<'_>) -> Result<(), WriteReportError> {
        match &event.kind {
            RerunEventKind::AttemptFinished {
                test_id,
                attempt,
                report_outcome,
                ..
            } => {
                let rerun = *report_outcome == ReportOutcome::Rerun;
                let mut entries = String::new();
                for phase in attempt.phases() {
                    let outcome = ReportOutcome::for_phase(phase, rerun);
                    if phase.phase != Phase::Call && outcome == ReportOutcome::Passed {
                        continue;
                    }
                    swrite!(entries, "{} {test_id}\n", outcome.code());
                    if !phase.trace.is_empty() {
                        entries.push_str(&indent_lines(&phase.trace, " "));
                    }
                }
                if !entries.is_empty() {
                    self.append(&entries)?;
                }
            }
            RerunEventKind::RunFinished { .. } => {
                // An empty session still leaves an empty log behind.
                if self.state == LogState::NotCreated {
                    self.append("")?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn append(&mut self, entries: &str) -> Result<(), WriteReportError> {
        if self.state == LogState::Failed {
            return Ok(());
        }
        let res = self.open().and_then(|mut file| {
            file.write_all(entries.as_bytes())
                .map_err(|error| WriteReportError::Fs {
                    file: self.path.clone(),
                    error,
                })
        });
        self.state = match res {
            Ok(()) => LogState::Created,
            Err(_) => LogState::Failed,
        };
        res
    }

    fn open(&self) -> Result<File, WriteReportError> {
        let res = match self.state {
            LogState::Created => OpenOptions::new().append(true).open(&self.path),
            LogState::NotCreated | LogState::Failed => {
                if let Some(parent) = self.path.parent()
                    && !parent.as_str().is_empty()
                {
                    std::fs::create_dir_all(parent).map_err(|error| WriteReportError::Fs {
                        file: parent.to_owned(),
                        error,
                    })?;
                }
                File::create(&self.path)
            }
        };
        res.map_err(|error| WriteReportError::Fs {
            file: self.path.clone(),
            error,
        })
    }
}
