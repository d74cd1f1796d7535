// Copyright (c) The flakeguard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Structured access to the rerun statistics artifact written by flakeguard.
//!
//! At the end of a session, `flakeguard-runner` writes a JSON document summarizing every test
//! that failed at least once: whether it was eventually resolved by a rerun ("flaky") or not
//! ("failed"), along with the traces captured for the original failure and the reruns. The types
//! in this crate describe that document and can be used to read it back.

mod errors;
mod summary;

pub use errors::*;
pub use summary::*;
