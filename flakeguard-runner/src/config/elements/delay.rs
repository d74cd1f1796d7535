// Copyright (c) The flakeguard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::DelayRangeError;
use std::{fmt, time::Duration};
use tracing::warn;

/// The delay between invalidating a test's fixtures and running it again.
///
/// Negative delays are accepted everywhere a delay can be specified, and are treated as zero.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct RerunDelay(Duration);

impl RerunDelay {
    /// No delay.
    pub const ZERO: Self = Self(Duration::ZERO);

    /// Creates a new delay from a duration.
    pub fn new(duration: Duration) -> Self {
        Self(duration)
    }

    /// Creates a new delay from a number of seconds, clamping negative values to zero.
    ///
    /// NaN is treated as zero as well. Returns an error if the delay is too large to be
    /// represented, including positive infinity.
    pub fn try_from_secs_f64(secs: f64) -> Result<Self, DelayRangeError> {
        if secs.is_nan() || secs < 0.0 {
            warn!("delay between reruns is negative ({secs}s): using 0s instead");
            return Ok(Self::ZERO);
        }
        Duration::try_from_secs_f64(secs)
            .map(Self)
            .map_err(|_| DelayRangeError::new(secs))
    }

    /// Returns the delay as a duration.
    pub fn duration(self) -> Duration {
        self.0
    }

    /// Returns true if there is no delay.
    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }
}

impl From<Duration> for RerunDelay {
    fn from(duration: Duration) -> Self {
        Self(duration)
    }
}

impl fmt::Display for RerunDelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", humantime::format_duration(self.0))
    }
}

/// Deserializes a delay, given either as a number of seconds or a duration string like `"1.5s"`.
pub(in crate::config) fn deserialize_delay<'de, D>(
    deserializer: D,
) -> Result<Option<RerunDelay>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct V;

    impl<'de2> serde::de::Visitor<'de2> for V {
        type Value = Option<RerunDelay>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            write!(
                formatter,
                "a duration (\"500ms\", \"2s\") or a number of seconds (2, 0.5)"
            )
        }

        // Note that TOML uses i64, not u64.
        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            RerunDelay::try_from_secs_f64(v as f64)
                .map(Some)
                .map_err(E::custom)
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(Some(RerunDelay::new(Duration::from_secs(v))))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            if !v.is_finite() {
                return Err(E::invalid_value(serde::de::Unexpected::Float(v), &self));
            }
            RerunDelay::try_from_secs_f64(v)
                .map(Some)
                .map_err(E::custom)
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            let (negative, input) = match v.trim().strip_prefix('-') {
                Some(rest) => (true, rest.trim_start()),
                None => (false, v.trim()),
            };
            let duration = humantime::parse_duration(input).map_err(|error| {
                E::custom(format!("invalid duration `{v}` for reruns-delay: {error}"))
            })?;
            if negative && !duration.is_zero() {
                warn!("delay between reruns is negative ({v}): using 0s instead");
                Ok(Some(RerunDelay::ZERO))
            } else {
                Ok(Some(RerunDelay::new(duration)))
            }
        }
    }

    deserializer.deserialize_any(V)
}
