// Copyright (c) The flakeguard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration elements for flakeguard.

mod delay;
mod junit;
mod reruns;
mod threshold;

pub use delay::*;
pub use junit::*;
pub use reruns::*;
pub use threshold::*;
