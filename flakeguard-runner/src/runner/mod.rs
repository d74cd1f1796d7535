// Copyright (c) The flakeguard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The rerun scheduler.
//!
//! The main structure in this module is [`RerunScheduler`], constructed via a
//! [`RerunSchedulerBuilder`].

mod builder;
mod imp;
mod item;

pub use builder::*;
pub use imp::*;
pub use item::*;
