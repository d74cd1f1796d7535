// Copyright (c) The flakeguard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Metadata reports built from rerun events: JUnit XML and the plain-text result log.

mod imp;
mod junit;
mod result_log;

pub(crate) use imp::*;
