// Copyright (c) The flakeguard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-test overrides: `[[profile.<name>.overrides]]` entries and `flaky` markers.

mod imp;

pub use imp::*;
