//! Application configuration management.
//!
//! Configuration is layered with the `config` crate:
//! 1. built-in defaults,
//! 2. an optional TOML file (`/etc/hublink/config.toml` on Linux),
//! 3. `HUBLINK__<SECTION>__<KEY>` environment variables.
//!
//! ```toml
//! [bluetooth]
//! adapter_name = "hci0"
//! name_pattern = "^Nuimo"
//!
//! [discovery]
//! timeout_secs = 60   # 0 waits forever
//! connect_timeout_secs = 20
//! reuse_connected = false
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ::config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::discovery::DiscoverySettings;
use crate::types::PeripheralFilter;

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "HUBLINK";

/// Errors raised while loading, validating or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly requested configuration file does not exist.
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    /// The platform configuration directory could not be determined.
    #[error("Cannot determine the platform configuration directory")]
    NoConfigDir,

    /// The layered sources could not be merged or deserialized.
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] ::config::ConfigError),

    /// The configuration could not be rendered as TOML.
    #[error("Failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// Writing the configuration file failed.
    #[error("Failed to write {path}: {source}")]
    WriteError {
        /// Target path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A single field holds an invalid value.
    #[error("Invalid value for '{field}': {message}")]
    ValidationError {
        /// Dotted field name, e.g. `discovery.connect_timeout_secs`.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields are invalid.
    #[error("Configuration has {} invalid fields", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Radio adapter settings.
    pub bluetooth: BluetoothConfig,
    /// Discovery run settings.
    pub discovery: DiscoveryConfig,
}

/// Bluetooth adapter and device selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// BlueZ adapter name.
    pub adapter_name: String,
    /// Regex the advertised name must match; `None` accepts every device.
    pub name_pattern: Option<String>,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            adapter_name: "hci0".to_string(),
            name_pattern: Some("^Nuimo".to_string()),
        }
    }
}

/// Timeouts and policy of a discovery run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Overall discovery deadline; `0` waits forever.
    pub timeout_secs: u64,
    /// Budget for a single connection attempt.
    pub connect_timeout_secs: u64,
    /// Return an already connected controller instead of scanning.
    pub reuse_connected: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            connect_timeout_secs: 20,
            reuse_connected: false,
        }
    }
}

impl Config {
    /// Loads configuration from `path`, or from the default location when
    /// `path` is `None`, and validates it.
    ///
    /// A missing default file is not an error; a missing explicit file is.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing (explicit path only), cannot
    /// be parsed, or fails validation.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        match path {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound(path.display().to_string()));
                }
                Self::load_layered(Some(path), None)
            }
            None => {
                let path = default_config_path()?;
                Self::load_layered(Some(&path), None)
            }
        }
    }

    /// Builds the layered configuration.
    ///
    /// `env` replaces the process environment as variable source when given.
    fn load_layered(
        path: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> ConfigResult<Self> {
        let mut builder =
            ::config::Config::builder().add_source(::config::Config::try_from(&Self::default())?);
        if let Some(path) = path {
            builder = builder.add_source(
                File::from(path.to_path_buf())
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every field and reports all problems at once.
    ///
    /// # Errors
    ///
    /// Returns a single [`ConfigError::ValidationError`] or
    /// [`ConfigError::MultipleValidationErrors`].
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();
        let mut invalid = |field: &str, message: String| {
            errors.push(ConfigError::ValidationError {
                field: field.to_string(),
                message,
            });
        };

        if self.bluetooth.adapter_name.trim().is_empty() {
            invalid("bluetooth.adapter_name", "must not be empty".into());
        }
        if let Some(pattern) = &self.bluetooth.name_pattern {
            if let Err(e) = PeripheralFilter::with_pattern(pattern) {
                invalid("bluetooth.name_pattern", e.to_string());
            }
        }
        if self.discovery.connect_timeout_secs == 0 {
            invalid(
                "discovery.connect_timeout_secs",
                "must be at least 1 second".into(),
            );
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }

    /// Overall discovery deadline, `None` when `timeout_secs` is zero.
    #[must_use]
    pub fn discovery_timeout(&self) -> Option<Duration> {
        match self.discovery.timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Settings for [`crate::Discovery`].
    #[must_use]
    pub const fn to_settings(&self) -> DiscoverySettings {
        DiscoverySettings {
            connect_timeout: Duration::from_secs(self.discovery.connect_timeout_secs),
            reuse_connected: self.discovery.reuse_connected,
        }
    }

    /// Name filter built from `bluetooth.name_pattern`.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the pattern does not compile.
    pub fn peripheral_filter(&self) -> ConfigResult<PeripheralFilter> {
        match &self.bluetooth.name_pattern {
            None => Ok(PeripheralFilter::any()),
            Some(pattern) => {
                PeripheralFilter::with_pattern(pattern).map_err(|e| ConfigError::ValidationError {
                    field: "bluetooth.name_pattern".into(),
                    message: e.to_string(),
                })
            }
        }
    }

    /// Renders the configuration as pretty TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Writes the configuration to `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save_to(&self, path: &Path) -> ConfigResult<()> {
        let write_error = |source| ConfigError::WriteError {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_error)?;
        }
        std::fs::write(path, self.to_toml()?).map_err(write_error)
    }
}

/// Default configuration file location.
///
/// On Linux (the hub): `/etc/hublink/config.toml`.
/// Elsewhere: the platform config directory, e.g. `~/.config/hublink/config.toml`.
///
/// # Errors
///
/// Returns [`ConfigError::NoConfigDir`] if no home directory can be found.
pub fn default_config_path() -> ConfigResult<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        Ok(PathBuf::from("/etc/hublink/config.toml"))
    }
    #[cfg(not(target_os = "linux"))]
    {
        let dirs =
            directories::ProjectDirs::from("", "", "hublink").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }
}
