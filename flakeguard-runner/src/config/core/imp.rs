// Copyright (c) The flakeguard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    config::{
        elements::{
            DefaultJunitImpl, FailureThreshold, JunitConfig, JunitImpl, RerunCount, RerunDelay,
            ResultLogImpl, deserialize_delay, deserialize_reruns, deserialize_threshold,
        },
        overrides::{CompiledOverride, DeserializedOverride, TestSettings},
    },
    errors::{ConfigCompileError, ConfigParseError, ConfigParseErrorKind, ProfileNotFound},
    helpers::plural,
    host::TestItemId,
};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigBuilder, ConfigError, File, FileFormat, builder::DefaultState};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use tracing::warn;

/// Trait for handling configuration warnings.
///
/// This trait allows for different warning handling strategies, such as logging warnings
/// (the default behavior) or collecting them for testing purposes.
pub trait ConfigWarnings {
    /// Handle unknown configuration keys found in a config file.
    fn unknown_config_keys(
        &mut self,
        config_file: &Utf8Path,
        root: &Utf8Path,
        unknown: &BTreeSet<String>,
    );
}

/// Default implementation of ConfigWarnings that logs warnings using the tracing crate.
pub struct DefaultConfigWarnings;

impl ConfigWarnings for DefaultConfigWarnings {
    fn unknown_config_keys(
        &mut self,
        config_file: &Utf8Path,
        root: &Utf8Path,
        unknown: &BTreeSet<String>,
    ) {
        let mut unknown_str = String::new();
        if let [key] = unknown.iter().collect::<Vec<_>>().as_slice() {
            // Print this on the same line.
            unknown_str.push_str("key: ");
            unknown_str.push_str(key);
        } else {
            unknown_str.push_str(plural::keys_str(unknown.len()));
            unknown_str.push(':');
            for ignored_key in unknown {
                unknown_str.push('\n');
                unknown_str.push_str("  - ");
                unknown_str.push_str(ignored_key);
            }
        }

        warn!(
            "in config file {}, ignoring unknown configuration {unknown_str}",
            config_file.strip_prefix(root).unwrap_or(config_file),
        )
    }
}

/// Overall configuration for flakeguard.
///
/// Most settings are managed through [profiles](RerunProfile), obtained through the
/// [`profile`](Self::profile) method.
#[derive(Clone, Debug)]
pub struct FlakeguardConfig {
    root: Utf8PathBuf,
    inner: FlakeguardConfigImpl,
    compiled: CompiledByProfile,
}

impl FlakeguardConfig {
    /// The default location of the config within the root: `.config/flakeguard.toml`.
    pub const CONFIG_PATH: &'static str = ".config/flakeguard.toml";

    /// Contains the default config as a TOML file.
    ///
    /// Repository-specific configuration is layered on top of the default config.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../../../default-config.toml");

    /// The name of the default profile.
    pub const DEFAULT_PROFILE: &'static str = "default";

    /// Reads the config from the given file, or if not specified from `.config/flakeguard.toml`
    /// within `root`.
    ///
    /// If no config file is specified and `root` doesn't have `.config/flakeguard.toml`, uses the
    /// default config options.
    pub fn from_sources(
        root: impl Into<Utf8PathBuf>,
        config_file: Option<&Utf8Path>,
    ) -> Result<Self, ConfigParseError> {
        Self::from_sources_with_warnings(root, config_file, &mut DefaultConfigWarnings)
    }

    /// Load configuration from the given sources with custom warning handling.
    pub fn from_sources_with_warnings(
        root: impl Into<Utf8PathBuf>,
        config_file: Option<&Utf8Path>,
        warnings: &mut impl ConfigWarnings,
    ) -> Result<Self, ConfigParseError> {
        let root = root.into();
        let (inner, compiled) = Self::read_from_sources(&root, config_file, warnings)?;
        Ok(Self {
            root,
            inner,
            compiled,
        })
    }

    /// Returns the default config, rooted at `root`.
    #[cfg(test)]
    pub(crate) fn default_config(root: impl Into<Utf8PathBuf>) -> Self {
        use itertools::Itertools;

        let (deserialized, unknown) =
            Self::build_and_deserialize_config(&Self::make_default_config())
                .expect("default config is always valid");

        // The default config is embedded in the library, so it must not have unknown keys.
        if !unknown.is_empty() {
            panic!(
                "found unknown keys in default config: {}",
                unknown.iter().join(", ")
            );
        }

        Self {
            root: root.into(),
            inner: deserialized.into_config_impl(),
            compiled: CompiledByProfile::default(),
        }
    }

    /// Returns the root that relative paths in the config are resolved against.
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Returns the names of all known profiles, including the default profile.
    pub fn profile_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(Self::DEFAULT_PROFILE)
            .chain(self.inner.other_profiles.keys().map(|name| name.as_str()))
    }

    /// Returns the profile with the given name, or an error if a profile was specified but not
    /// found.
    pub fn profile(&self, name: impl AsRef<str>) -> Result<RerunProfile<'_>, ProfileNotFound> {
        self.make_profile(name.as_ref())
    }

    // ---
    // Helper methods
    // ---

    fn read_from_sources(
        root: &Utf8Path,
        file: Option<&Utf8Path>,
        warnings: &mut impl ConfigWarnings,
    ) -> Result<(FlakeguardConfigImpl, CompiledByProfile), ConfigParseError> {
        let (config_file, source) = match file {
            Some(file) => (file.to_owned(), File::new(file.as_str(), FileFormat::Toml)),
            None => {
                let config_file = root.join(Self::CONFIG_PATH);
                let source = File::new(config_file.as_str(), FileFormat::Toml).required(false);
                (config_file, source)
            }
        };

        let builder = Self::make_default_config().add_source(source);
        let (config, unknown) = Self::build_and_deserialize_config(&builder)
            .map_err(|kind| ConfigParseError::new(&config_file, kind))?;

        if !unknown.is_empty() {
            warnings.unknown_config_keys(&config_file, root, &unknown);
        }

        let compiled = CompiledByProfile::new(&config.profiles)
            .map_err(|kind| ConfigParseError::new(&config_file, kind))?;

        Ok((config.into_config_impl(), compiled))
    }

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    fn make_profile(&self, name: &str) -> Result<RerunProfile<'_>, ProfileNotFound> {
        let custom_profile = self.inner.get_profile(name)?;
        let custom_overrides = match custom_profile {
            Some(_) => self
                .compiled
                .other
                .get(name)
                .map_or(&[][..], |overrides| overrides.as_slice()),
            None => &[],
        };

        Ok(RerunProfile {
            name: name.to_owned(),
            root: &self.root,
            default_profile: &self.inner.default_profile,
            custom_profile,
            custom_overrides,
            default_overrides: &self.compiled.default,
        })
    }

    /// This returns a tuple of (config, ignored paths).
    fn build_and_deserialize_config(
        builder: &ConfigBuilder<DefaultState>,
    ) -> Result<(FlakeguardConfigDeserialize, BTreeSet<String>), ConfigParseErrorKind> {
        let config = builder
            .build_cloned()
            .map_err(|error| ConfigParseErrorKind::BuildError(Box::new(error)))?;

        let mut ignored = BTreeSet::new();
        let mut cb = |path: serde_ignored::Path| {
            ignored.insert(path.to_string());
        };
        let ignored_de = serde_ignored::Deserializer::new(config, &mut cb);
        let config: FlakeguardConfigDeserialize = serde_path_to_error::deserialize(ignored_de)
            .map_err(|error| {
                // serde_path_to_error and the config crate both report the key. Drop the key from
                // the config error so it is only printed once.
                let path = error.path().clone();
                let config_error = error.into_inner();
                let error = match config_error {
                    ConfigError::At { error, .. } => *error,
                    other => other,
                };
                ConfigParseErrorKind::DeserializeError(Box::new(serde_path_to_error::Error::new(
                    path, error,
                )))
            })?;

        Ok((config, ignored))
    }
}

/// A flakeguard profile.
///
/// Returned by [`FlakeguardConfig::profile`].
#[derive(Clone, Debug)]
pub struct RerunProfile<'cfg> {
    name: String,
    root: &'cfg Utf8Path,
    default_profile: &'cfg DefaultProfileImpl,
    custom_profile: Option<&'cfg CustomProfileImpl>,
    custom_overrides: &'cfg [CompiledOverride],
    default_overrides: &'cfg [CompiledOverride],
}

impl<'cfg> RerunProfile<'cfg> {
    /// Returns the name of the profile.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of reruns after the primary attempt.
    pub fn reruns(&self) -> u32 {
        self.custom_profile
            .and_then(|profile| profile.reruns)
            .map_or(self.default_profile.reruns.count, |reruns| reruns.count)
    }

    /// Returns the delay between invalidating a test's fixtures and running it again.
    pub fn reruns_delay(&self) -> RerunDelay {
        self.custom_profile
            .and_then(|profile| profile.delay())
            .unwrap_or(self.default_profile.reruns_delay)
    }

    /// Returns the distinct-failed-test threshold after which reruns are suppressed.
    pub fn threshold(&self) -> FailureThreshold {
        self.custom_profile
            .and_then(|profile| profile.rerun_threshold)
            .unwrap_or(self.default_profile.rerun_threshold)
    }

    /// Returns the absolute path to the JSON statistics artifact, if one is configured.
    pub fn artifact_path(&self) -> Option<Utf8PathBuf> {
        self.custom_profile
            .and_then(|profile| profile.artifact_path.as_deref())
            .or(self.default_profile.artifact_path.as_deref())
            .map(|path| self.root.join(path))
    }

    /// Returns the JUnit configuration for this profile, if a JUnit path is configured.
    pub fn junit(&self) -> Option<JunitConfig<'cfg>> {
        JunitConfig::new(
            self.root,
            self.custom_profile.map(|profile| &profile.junit),
            &self.default_profile.junit,
        )
    }

    /// Returns the absolute path to the result log, if one is configured.
    pub fn result_log_path(&self) -> Option<Utf8PathBuf> {
        self.custom_profile
            .and_then(|profile| profile.result_log.path())
            .or(self.default_profile.result_log.path())
            .map(|path| self.root.join(path))
    }

    /// Returns settings for the given test, taking overrides into account.
    ///
    /// Command-line values and `flaky` markers are applied afterwards, through
    /// [`TestSettings::with_cli`] and [`TestSettings::with_marker`].
    pub fn settings_for(&self, test_id: &TestItemId) -> TestSettings {
        TestSettings::for_profile(self, test_id)
    }

    /// Overrides in precedence order: the custom profile's first, then the default profile's.
    pub(in crate::config) fn overrides(&self) -> impl Iterator<Item = &'cfg CompiledOverride> {
        self.custom_overrides.iter().chain(self.default_overrides)
    }
}

#[derive(Clone, Debug, Default)]
struct CompiledByProfile {
    default: Vec<CompiledOverride>,
    other: HashMap<String, Vec<CompiledOverride>>,
}

impl CompiledByProfile {
    fn new(
        profiles: &HashMap<String, CustomProfileImpl>,
    ) -> Result<Self, ConfigParseErrorKind> {
        let mut errors = Vec::new();
        let mut compiled = Self::default();

        for (profile_name, profile) in profiles {
            let overrides: Vec<_> = profile
                .overrides
                .iter()
                .enumerate()
                .filter_map(|(index, source)| {
                    CompiledOverride::new(profile_name, index, source, &mut errors)
                })
                .collect();
            if profile_name == FlakeguardConfig::DEFAULT_PROFILE {
                compiled.default = overrides;
            } else {
                compiled.other.insert(profile_name.clone(), overrides);
            }
        }

        if errors.is_empty() {
            Ok(compiled)
        } else {
            // Profiles are iterated in hash order, so sort errors for stable output.
            errors.sort_by(|a: &ConfigCompileError, b| {
                (&a.profile_name, a.index).cmp(&(&b.profile_name, b.index))
            });
            Err(ConfigParseErrorKind::CompileErrors(errors))
        }
    }
}

#[derive(Clone, Debug)]
struct FlakeguardConfigImpl {
    default_profile: DefaultProfileImpl,
    other_profiles: HashMap<String, CustomProfileImpl>,
}

impl FlakeguardConfigImpl {
    fn get_profile(&self, profile: &str) -> Result<Option<&CustomProfileImpl>, ProfileNotFound> {
        let custom_profile = match profile {
            FlakeguardConfig::DEFAULT_PROFILE => None,
            other => Some(self.other_profiles.get(other).ok_or_else(|| {
                ProfileNotFound::new(
                    profile,
                    std::iter::once(FlakeguardConfig::DEFAULT_PROFILE)
                        .chain(self.other_profiles.keys().map(|name| name.as_str())),
                )
            })?),
        };
        Ok(custom_profile)
    }
}

// This is the form of `FlakeguardConfig` that gets deserialized.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct FlakeguardConfigDeserialize {
    #[serde(rename = "profile")]
    profiles: HashMap<String, CustomProfileImpl>,
}

impl FlakeguardConfigDeserialize {
    fn into_config_impl(mut self) -> FlakeguardConfigImpl {
        let p = self
            .profiles
            .remove(FlakeguardConfig::DEFAULT_PROFILE)
            .expect("default profile should exist");
        let default_profile = DefaultProfileImpl::new(p);

        FlakeguardConfigImpl {
            default_profile,
            other_profiles: self.profiles,
        }
    }
}

#[derive(Clone, Debug)]
struct DefaultProfileImpl {
    reruns: RerunCount,
    reruns_delay: RerunDelay,
    rerun_threshold: FailureThreshold,
    artifact_path: Option<Utf8PathBuf>,
    junit: DefaultJunitImpl,
    result_log: ResultLogImpl,
}

impl DefaultProfileImpl {
    fn new(p: CustomProfileImpl) -> Self {
        let reruns_delay = p.delay().unwrap_or(RerunDelay::ZERO);
        Self {
            reruns: p.reruns.expect("reruns present in default profile"),
            reruns_delay,
            rerun_threshold: p
                .rerun_threshold
                .expect("rerun-threshold present in default profile"),
            artifact_path: p.artifact_path,
            junit: DefaultJunitImpl::for_default_profile(p.junit),
            result_log: p.result_log,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct CustomProfileImpl {
    #[serde(default, deserialize_with = "deserialize_reruns")]
    reruns: Option<RerunCount>,
    #[serde(default, deserialize_with = "deserialize_delay")]
    reruns_delay: Option<RerunDelay>,
    #[serde(default, deserialize_with = "deserialize_threshold")]
    rerun_threshold: Option<FailureThreshold>,
    #[serde(default)]
    artifact_path: Option<Utf8PathBuf>,
    #[serde(default)]
    junit: JunitImpl,
    #[serde(default)]
    result_log: ResultLogImpl,
    #[serde(default)]
    overrides: Vec<DeserializedOverride>,
}

impl CustomProfileImpl {
    /// `reruns-delay` takes precedence over a delay within the `reruns` table.
    fn delay(&self) -> Option<RerunDelay> {
        self.reruns_delay
            .or_else(|| self.reruns.and_then(|reruns| reruns.delay))
    }
}
