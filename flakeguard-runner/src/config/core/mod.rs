// Copyright (c) The flakeguard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core configuration types.

mod imp;

pub use imp::*;
