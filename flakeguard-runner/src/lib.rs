// Copyright (c) The flakeguard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for flakeguard: deferred, bounded reruns of failing tests, where every
//! rerun observes freshly re-created fixtures.
//!
//! The basic flow of a session is:
//!
//! 1. The host test runner executes the primary pass. Every failing test is snapshotted (which
//!    fixtures does it hold?) and appended to a deferred queue instead of being retried
//!    immediately.
//! 2. Once the primary pass is complete, the [`RerunScheduler`](runner::RerunScheduler) drains
//!    the queue. For every attempt it consults the [`RerunPolicy`](policy::RerunPolicy), tears
//!    down the test's fixtures in dependency order, waits for the configured delay and asks the
//!    host to execute the test again.
//! 3. Outcomes are aggregated by the [`StatsCollector`](reporter::StatsCollector), which writes a
//!    JSON artifact at the end of the session.
//!
//! The host runner is abstracted behind the [`TestHost`](host::TestHost) trait.

pub mod config;
pub mod errors;
pub mod fixture;
mod helpers;
pub mod host;
pub mod policy;
pub mod reporter;
pub mod runner;
mod time;
