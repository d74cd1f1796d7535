// Copyright (c) The flakeguard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{RerunDelay, deserialize_delay};
use serde::Deserialize;
use std::{cmp::Ordering, fmt};

/// Type for the `reruns` config key.
///
/// A test may run at most `count + 1` times: the primary attempt and `count` reruns.
#[derive(Copy, Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RerunCount {
    /// The number of reruns after the primary attempt.
    pub count: u32,

    /// The delay between reruns, if specified alongside the count.
    #[serde(default, deserialize_with = "deserialize_delay")]
    pub delay: Option<RerunDelay>,
}

impl RerunCount {
    /// Creates a new rerun count without a delay.
    pub fn new(count: u32) -> Self {
        Self { count, delay: None }
    }

    /// Returns the maximum number of attempts, including the primary attempt.
    pub fn max_attempts(&self) -> usize {
        self.count as usize + 1
    }
}

/// Deserializes the `reruns` key, which is either a non-negative integer or a table.
pub(in crate::config) fn deserialize_reruns<'de, D>(
    deserializer: D,
) -> Result<Option<RerunCount>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct V;

    impl<'de2> serde::de::Visitor<'de2> for V {
        type Value = Option<RerunCount>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            write!(
                formatter,
                "a table ({{ count = 2, delay = \"1s\" }}) or a non-negative integer (2)"
            )
        }

        // Note that TOML uses i64, not u64.
        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            match v.cmp(&0) {
                Ordering::Greater | Ordering::Equal => {
                    let v = u32::try_from(v).map_err(|_| {
                        serde::de::Error::invalid_value(
                            serde::de::Unexpected::Signed(v),
                            &"a non-negative u32",
                        )
                    })?;
                    Ok(Some(RerunCount::new(v)))
                }
                Ordering::Less => Err(serde::de::Error::invalid_value(
                    serde::de::Unexpected::Signed(v),
                    &self,
                )),
            }
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            let v = u32::try_from(v).map_err(|_| {
                serde::de::Error::invalid_value(
                    serde::de::Unexpected::Unsigned(v),
                    &"a non-negative u32",
                )
            })?;
            Ok(Some(RerunCount::new(v)))
        }

        fn visit_map<A>(self, map: A) -> Result<Self::Value, A::Error>
        where
            A: serde::de::MapAccess<'de2>,
        {
            RerunCount::deserialize(serde::de::value::MapAccessDeserializer::new(map)).map(Some)
        }
    }

    deserializer.deserialize_any(V)
}
