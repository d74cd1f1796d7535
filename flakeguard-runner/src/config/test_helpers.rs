// Copyright (c) The flakeguard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test helpers for configuration.

use crate::{
    config::FlakeguardConfig,
    errors::{ConfigParseError, ConfigParseErrorKind},
};
use camino::Utf8PathBuf;
use camino_tempfile::Utf8TempDir;
use config::ConfigError;

/// Writes `config_contents` to `.config/flakeguard.toml` within `temp_dir`, and returns the root.
pub(crate) fn temp_config_root(
    temp_dir: &Utf8TempDir,
    config_contents: &str,
) -> Utf8PathBuf {
    let root = temp_dir.path().to_owned();
    let config_file = root.join(FlakeguardConfig::CONFIG_PATH);
    let parent = config_file.parent().expect("config path has a parent");
    std::fs::create_dir_all(parent).expect("error creating config directory");
    std::fs::write(&config_file, config_contents).expect("error writing config file");
    root
}

/// Returns the message of a deserialization error, panicking if the error is of another kind.
pub(crate) fn deserialize_error_message(error: &ConfigParseError) -> String {
    match error.kind() {
        ConfigParseErrorKind::DeserializeError(error) => match error.inner() {
            ConfigError::Message(message) => message.clone(),
            ConfigError::NotFound(key) => format!("missing key: {key}"),
            other => other.to_string(),
        },
        other => panic!("expected ConfigParseErrorKind::DeserializeError, got {other:?}"),
    }
}
