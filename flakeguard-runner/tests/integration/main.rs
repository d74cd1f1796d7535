// Copyright (c) The flakeguard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests that drive a scheduler against a scripted host.

mod basic;
mod fixtures;
mod invalidation;
mod reports;
