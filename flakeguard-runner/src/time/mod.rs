// Copyright (c) The flakeguard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

mod delay;
mod stopwatch;

pub(crate) use delay::*;
pub(crate) use stopwatch::*;
