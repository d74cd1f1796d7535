// Copyright (c) The flakeguard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Decides whether a failing test is rerun.
//!
//! [`RerunPolicy::decide`] is the only place that mutates a test's attempt count and the
//! session-wide failure counters, which live in an explicit [`SessionState`] rather than in
//! globals.

use crate::{config::FailureThreshold, host::TestItemId, runner::TestItem};
use std::{collections::HashSet, fmt};
use tracing::debug;

/// The outcome of [`RerunPolicy::decide`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RerunDecision {
    /// The test will be rerun. Its attempt count has been incremented.
    Accept,

    /// The test has used up all of its attempts.
    Exhausted,

    /// Too many distinct tests have failed in this session, and no further reruns are scheduled.
    Suppressed,
}

impl RerunDecision {
    /// Returns the name of the decision.
    pub fn as_str(self) -> &'static str {
        match self {
            RerunDecision::Accept => "accept",
            RerunDecision::Exhausted => "exhausted",
            RerunDecision::Suppressed => "suppressed",
        }
    }
}

impl fmt::Display for RerunDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session-wide state consulted and updated by the policy.
#[derive(Clone, Debug, Default)]
pub struct SessionState {
    distinct_failed: usize,
    seen: HashSet<TestItemId>,
    permanently_suppressed: bool,
}

impl SessionState {
    /// Creates a new, empty session state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of distinct tests that have failed at least once.
    pub fn distinct_failed(&self) -> usize {
        self.distinct_failed
    }

    /// Returns true if reruns have been suppressed for the rest of the session.
    pub fn is_suppressed(&self) -> bool {
        self.permanently_suppressed
    }
}

/// Decides whether failing tests are rerun.
#[derive(Copy, Clone, Debug, Default)]
pub struct RerunPolicy {
    threshold: FailureThreshold,
}

impl RerunPolicy {
    /// Creates a new policy with the given threshold.
    pub fn new(threshold: FailureThreshold) -> Self {
        Self { threshold }
    }

    /// Returns the threshold this policy enforces.
    pub fn threshold(&self) -> FailureThreshold {
        self.threshold
    }

    /// Decides whether `item`, which has just failed, is rerun.
    ///
    /// The first time an item is seen, it is added to the session's distinct failure count before
    /// any rule is applied. Rules, in order:
    ///
    /// 1. If the distinct failure count exceeds the threshold, suppress reruns for the rest of
    ///    the session.
    /// 2. If reruns are already suppressed, suppress.
    /// 3. If the item has used up its attempts, it is exhausted.
    /// 4. Otherwise, accept and count the upcoming attempt.
    pub fn decide(&self, item: &mut TestItem, session: &mut SessionState) -> RerunDecision {
        if session.seen.insert(item.id().clone()) {
            session.distinct_failed += 1;
        }

        let decision = if self.threshold.is_exceeded(session.distinct_failed) {
            if !session.permanently_suppressed {
                debug!(
                    "{} distinct tests failed (threshold: {}), suppressing further reruns",
                    session.distinct_failed, self.threshold,
                );
            }
            session.permanently_suppressed = true;
            RerunDecision::Suppressed
        } else if session.permanently_suppressed {
            RerunDecision::Suppressed
        } else if item.attempt_count() >= item.max_attempts() {
            RerunDecision::Exhausted
        } else {
            item.accept_attempt();
            RerunDecision::Accept
        };

        debug!(
            "rerun decision for {}: {decision} (attempt {}/{})",
            item.id(),
            item.attempt_count(),
            item.max_attempts(),
        );
        decision
    }
}
