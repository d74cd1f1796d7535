// Copyright (c) The flakeguard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! General support code for flakeguard-runner.

/// Utilities for pluralizing various words based on count or plurality.
pub(crate) mod plural {
    /// Returns "test" if `count` is 1, otherwise "tests".
    pub(crate) fn tests_str(count: usize) -> &'static str {
        if count == 1 { "test" } else { "tests" }
    }

    /// Returns "rerun" if `count` is 1, otherwise "reruns".
    pub(crate) fn reruns_str(count: usize) -> &'static str {
        if count == 1 { "rerun" } else { "reruns" }
    }

    /// Returns "fixture" if `count` is 1, otherwise "fixtures".
    pub(crate) fn fixtures_str(count: usize) -> &'static str {
        if count == 1 { "fixture" } else { "fixtures" }
    }

    /// Returns "key" if `count` is 1, otherwise "keys".
    pub(crate) fn keys_str(count: usize) -> &'static str {
        if count == 1 { "key" } else { "keys" }
    }
}

/// Indents every line of `text` by `indent`, the way multi-line traces are written to the result
/// log.
pub(crate) fn indent_lines(text: &str, indent: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        out.push_str(indent);
        out.push_str(line);
        out.push('\n');
    }
    out
}
