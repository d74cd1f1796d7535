// Copyright (c) The flakeguard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    config::{
        core::RerunProfile,
        elements::{RerunCount, RerunDelay, deserialize_delay, deserialize_reruns},
    },
    errors::{ConfigCompileError, ConfigCompileErrorKind, MarkerError, MarkerErrorKind},
    host::TestItemId,
};
use globset::{Glob, GlobMatcher};
use serde::Deserialize;
use smol_str::SmolStr;

/// Settings for individual tests.
///
/// Returned by [`RerunProfile::settings_for`], and refined by the scheduler with command-line
/// values and `flaky` markers.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestSettings {
    reruns: (u32, SettingSource),
    delay: (RerunDelay, SettingSource),
}

impl TestSettings {
    /// Creates settings with the given values, attributed to the profile.
    pub fn new(reruns: u32, delay: RerunDelay) -> Self {
        Self {
            reruns: (reruns, SettingSource::Profile),
            delay: (delay, SettingSource::Profile),
        }
    }

    pub(in crate::config) fn for_profile(profile: &RerunProfile<'_>, test_id: &TestItemId) -> Self {
        let mut reruns = None;
        let mut delay = None;

        for override_ in profile.overrides() {
            if !override_.matches(test_id) {
                continue;
            }

            if reruns.is_none()
                && let Some(count) = override_.data.reruns
            {
                reruns = Some((count.count, override_.source()));
            }
            if delay.is_none()
                && let Some(d) = override_.data.delay()
            {
                delay = Some((d, override_.source()));
            }
        }

        Self {
            reruns: reruns.unwrap_or((profile.reruns(), SettingSource::Profile)),
            delay: delay.unwrap_or((profile.reruns_delay(), SettingSource::Profile)),
        }
    }

    /// Applies values provided on the command line.
    ///
    /// Command-line values replace the profile's values, but a matching override still wins for
    /// the field it sets.
    pub fn with_cli(mut self, reruns: Option<u32>, delay: Option<RerunDelay>) -> Self {
        if let Some(reruns) = reruns
            && self.reruns.1 == SettingSource::Profile
        {
            self.reruns = (reruns, SettingSource::Cli);
        }
        if let Some(delay) = delay
            && self.delay.1 == SettingSource::Profile
        {
            self.delay = (delay, SettingSource::Cli);
        }
        self
    }

    /// Applies a `flaky` marker, which takes precedence over everything else.
    ///
    /// A marker always sets both values: a marker without a delay means no delay.
    pub fn with_marker(
        mut self,
        test_id: &TestItemId,
        marker: Option<&FlakyMarker>,
    ) -> Result<Self, MarkerError> {
        if let Some(marker) = marker {
            let reruns = match marker.reruns {
                None => 1,
                Some(reruns) => u32::try_from(reruns).map_err(|_| {
                    MarkerError::new(test_id.clone(), MarkerErrorKind::NegativeReruns(reruns))
                })?,
            };
            let delay = match marker.reruns_delay {
                None => RerunDelay::ZERO,
                Some(secs) => RerunDelay::try_from_secs_f64(secs)
                    .map_err(|error| MarkerError::new(test_id.clone(), error.into()))?,
            };
            self.reruns = (reruns, SettingSource::Marker);
            self.delay = (delay, SettingSource::Marker);
        }
        Ok(self)
    }

    /// Returns the number of reruns for this test.
    pub fn reruns(&self) -> u32 {
        self.reruns.0
    }

    /// Returns the maximum number of attempts for this test, including the primary attempt.
    pub fn max_attempts(&self) -> usize {
        self.reruns.0 as usize + 1
    }

    /// Returns the delay between reruns of this test.
    pub fn delay(&self) -> RerunDelay {
        self.delay.0
    }

    /// Returns where the rerun count came from.
    pub fn reruns_source(&self) -> &SettingSource {
        &self.reruns.1
    }

    /// Returns where the delay came from.
    pub fn delay_source(&self) -> &SettingSource {
        &self.delay.1
    }
}

/// Where a per-test setting came from, from lowest to highest precedence.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SettingSource {
    /// The profile, or the default profile it falls back to.
    Profile,

    /// A value provided on the command line.
    Cli,

    /// An override specified in a profile.
    Override {
        /// The profile the override was defined in.
        profile_name: SmolStr,

        /// The index of the override within the profile.
        index: usize,
    },

    /// A `flaky` marker on the test.
    Marker,
}

/// A `flaky` marker attached to a test by the host, with its raw arguments.
///
/// Markers are validated when the test is added to the scheduler.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct FlakyMarker {
    /// The number of reruns. `None` means one rerun.
    pub reruns: Option<i64>,

    /// The delay between reruns in seconds. `None` means no delay.
    pub reruns_delay: Option<f64>,
}

impl FlakyMarker {
    /// Creates a marker with the given number of reruns and no delay.
    pub fn new(reruns: i64) -> Self {
        Self {
            reruns: Some(reruns),
            reruns_delay: None,
        }
    }

    /// Sets the delay between reruns, in seconds.
    pub fn with_delay(mut self, secs: f64) -> Self {
        self.reruns_delay = Some(secs);
        self
    }
}

#[derive(Clone, Debug)]
pub(crate) struct CompiledOverride {
    profile_name: SmolStr,
    index: usize,
    matcher: GlobMatcher,
    pub(in crate::config) data: DeserializedOverride,
}

impl CompiledOverride {
    pub(in crate::config) fn new(
        profile_name: &str,
        index: usize,
        source: &DeserializedOverride,
        errors: &mut Vec<ConfigCompileError>,
    ) -> Option<Self> {
        if source.reruns.is_none() && source.reruns_delay.is_none() {
            errors.push(ConfigCompileError {
                profile_name: profile_name.to_owned(),
                index,
                kind: ConfigCompileErrorKind::NoSettings,
            });
            return None;
        }

        match Glob::new(&source.filter) {
            Ok(glob) => Some(Self {
                profile_name: profile_name.into(),
                index,
                matcher: glob.compile_matcher(),
                data: source.clone(),
            }),
            Err(error) => {
                errors.push(ConfigCompileError {
                    profile_name: profile_name.to_owned(),
                    index,
                    kind: ConfigCompileErrorKind::InvalidFilter {
                        filter: source.filter.clone(),
                        error,
                    },
                });
                None
            }
        }
    }

    pub(in crate::config) fn matches(&self, test_id: &TestItemId) -> bool {
        self.matcher.is_match(test_id.as_str())
    }

    fn source(&self) -> SettingSource {
        SettingSource::Override {
            profile_name: self.profile_name.clone(),
            index: self.index,
        }
    }
}

/// Deserialized form of profile overrides before compilation.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(in crate::config) struct DeserializedOverride {
    /// A glob matched against test identifiers.
    filter: String,
    #[serde(default, deserialize_with = "deserialize_reruns")]
    reruns: Option<RerunCount>,
    #[serde(default, deserialize_with = "deserialize_delay")]
    reruns_delay: Option<RerunDelay>,
}

impl DeserializedOverride {
    fn delay(&self) -> Option<RerunDelay> {
        self.reruns_delay
            .or_else(|| self.reruns.and_then(|count| count.delay))
    }
}
