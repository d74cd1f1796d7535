// Copyright (c) The flakeguard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::stopwatch;
use std::time::Duration;

/// Blocks the current thread for `delay` and returns how long the thread actually slept.
///
/// The scheduler is single-threaded, so this blocks everything else as well. A zero delay returns
/// immediately.
pub(crate) fn blocking_delay(delay: Duration) -> Duration {
    if delay.is_zero() {
        return Duration::ZERO;
    }

    let start = stopwatch();
    std::thread::sleep(delay);
    start.snapshot().duration
}
