// Copyright (c) The flakeguard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::ThresholdParseError;
use std::{fmt, num::NonZeroUsize, str::FromStr};

/// Type for the `rerun-threshold` config key.
///
/// Once more than this many distinct tests have failed in a session, no further reruns are
/// scheduled.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum FailureThreshold {
    /// Suppress reruns once more than this many distinct tests have failed.
    Count(NonZeroUsize),

    /// Never suppress reruns.
    #[default]
    Unlimited,
}

impl FailureThreshold {
    /// Creates a threshold from a count, where 0 means unlimited.
    pub fn from_count(count: usize) -> Self {
        match NonZeroUsize::new(count) {
            Some(count) => Self::Count(count),
            None => Self::Unlimited,
        }
    }

    /// Returns true if `distinct_failed` is above the threshold.
    pub fn is_exceeded(self, distinct_failed: usize) -> bool {
        match self {
            Self::Count(threshold) => distinct_failed > threshold.get(),
            Self::Unlimited => false,
        }
    }
}

impl FromStr for FailureThreshold {
    type Err = ThresholdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("unlimited") {
            return Ok(Self::Unlimited);
        }

        let count = s
            .trim()
            .parse::<usize>()
            .map_err(|_| ThresholdParseError::new(s))?;
        Ok(Self::from_count(count))
    }
}

impl fmt::Display for FailureThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count(count) => write!(f, "{count}"),
            Self::Unlimited => write!(f, "unlimited"),
        }
    }
}

/// Deserializes the `rerun-threshold` key: a non-negative integer, or `"unlimited"`.
pub(in crate::config) fn deserialize_threshold<'de, D>(
    deserializer: D,
) -> Result<Option<FailureThreshold>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct V;

    impl<'de2> serde::de::Visitor<'de2> for V {
        type Value = Option<FailureThreshold>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            write!(formatter, "a non-negative integer, or \"unlimited\"")
        }

        // Note that TOML uses i64, not u64.
        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            let count = usize::try_from(v).map_err(|_| {
                serde::de::Error::invalid_value(serde::de::Unexpected::Signed(v), &self)
            })?;
            Ok(Some(FailureThreshold::from_count(count)))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            let count = usize::try_from(v).map_err(|_| {
                serde::de::Error::invalid_value(serde::de::Unexpected::Unsigned(v), &self)
            })?;
            Ok(Some(FailureThreshold::from_count(count)))
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            v.parse().map(Some).map_err(E::custom)
        }
    }

    deserializer.deserialize_any(V)
}
