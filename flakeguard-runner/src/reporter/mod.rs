// Copyright (c) The flakeguard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Report the results of a rerun session.
//!
//! The scheduler produces [`RerunEvent`]s for the host to render, and feeds them to the JUnit and
//! result log writers configured in the profile. Rerun statistics are aggregated by
//! [`StatsCollector`] and written out as a JSON artifact.

mod aggregator;
mod events;
mod stats;

pub(crate) use aggregator::*;
pub use events::*;
pub use stats::*;
