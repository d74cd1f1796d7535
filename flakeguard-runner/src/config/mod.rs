// Copyright (c) The flakeguard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration support for flakeguard.
//!
//! Configuration is layered: the built-in default config is always read first, and the
//! repository's `.config/flakeguard.toml` (or a file passed in explicitly) is merged on top of it.
//! Settings are grouped into [profiles](RerunProfile). Custom profiles fall back to the `default`
//! profile one key at a time.
//!
//! Per-test settings are resolved in two passes. [`RerunProfile::settings_for`] applies the
//! profile and its overrides. The scheduler then fills in command-line values wherever no override
//! matched, and applies `flaky` markers on top, producing the final [`TestSettings`].

mod core;
mod elements;
mod overrides;

pub use core::*;
pub use elements::*;
pub use overrides::*;

#[cfg(test)]
pub(crate) mod test_helpers;
