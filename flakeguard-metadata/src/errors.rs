// Copyright (c) The flakeguard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::Utf8PathBuf;
use std::{error, fmt};

/// An error that occurs while reading a [`RerunReportSummary`](crate::RerunReportSummary).
#[derive(Debug)]
pub enum ReadSummaryError {
    /// Reading the artifact from disk failed.
    Read {
        /// The path that was being read.
        path: Utf8PathBuf,

        /// The underlying error.
        error: std::io::Error,
    },

    /// The artifact was not valid JSON, or did not match the expected schema.
    Json(serde_json::Error),
}

impl fmt::Display for ReadSummaryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Read { path, .. } => {
                write!(f, "failed to read rerun summary at `{path}`")
            }
            Self::Json(_) => {
                write!(f, "parsing rerun summary JSON failed")
            }
        }
    }
}

impl error::Error for ReadSummaryError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Read { error, .. } => Some(error),
            Self::Json(err) => Some(err),
        }
    }
}
