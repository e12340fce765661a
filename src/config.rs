//! Optional TOML configuration for defaults.
//!
//! Values resolve as command-line flag, then config file, then built-in
//! default. A missing file is not an error; an unreadable, malformed or
//! out-of-range file is.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::db::DatabaseOptions;
use crate::fetch::{DEFAULT_CONCURRENCY, MAX_CONCURRENCY, MIN_CONCURRENCY};
use crate::source::{DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_READ_TIMEOUT_SECS, HttpSettings};

/// Default dataset base directory, relative to the working directory.
pub const DEFAULT_BASE_DIR: &str = "papers";

/// Default politeness interval between requests of a fetch batch.
pub const DEFAULT_REQUEST_DELAY_MS: u64 = 100;

/// Largest accepted politeness interval.
const MAX_REQUEST_DELAY_MS: u64 = 60_000;

/// Errors from loading or validating the config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read config file '{path}': {source}")]
    Read {
        /// Config file path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML or has unknown keys.
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        /// Config file path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: toml::de::Error,
    },

    /// A value is outside its accepted range.
    #[error("invalid config value for `{field}`: {value}. Expected range: {expected}")]
    OutOfRange {
        /// Offending key.
        field: &'static str,
        /// Offending value.
        value: u64,
        /// Accepted range, for display.
        expected: &'static str,
    },
}

/// TOML-backed file configuration.
///
/// ```toml
/// base_dir = "/data/papers"
/// request_delay_ms = 250
/// concurrency = 2
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Root under which datasets live.
    pub base_dir: Option<PathBuf>,
    /// Politeness interval for fetch batches, in milliseconds.
    pub request_delay_ms: Option<u64>,
    /// Fetch workers per batch.
    pub concurrency: Option<usize>,
    /// HTTP connect timeout in seconds.
    pub connect_timeout_secs: Option<u64>,
    /// HTTP whole-request timeout in seconds.
    pub read_timeout_secs: Option<u64>,
    /// Database pool max connections (1..=20).
    pub db_max_connections: Option<u32>,
    /// Database busy timeout in milliseconds.
    pub db_busy_timeout_ms: Option<u32>,
}

impl FileConfig {
    /// Parses TOML text and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed input and
    /// [`ConfigError::OutOfRange`] for invalid values.
    pub fn from_toml_str(raw: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates values against runtime constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::OutOfRange`] naming the first invalid key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(delay) = self.request_delay_ms
            && delay > MAX_REQUEST_DELAY_MS
        {
            return Err(ConfigError::OutOfRange {
                field: "request_delay_ms",
                value: delay,
                expected: "0..=60000",
            });
        }
        if let Some(concurrency) = self.concurrency
            && !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency)
        {
            return Err(ConfigError::OutOfRange {
                field: "concurrency",
                value: concurrency as u64,
                expected: "1..=32",
            });
        }
        validate_timeout_secs("connect_timeout_secs", self.connect_timeout_secs)?;
        validate_timeout_secs("read_timeout_secs", self.read_timeout_secs)?;
        if let Some(max) = self.db_max_connections
            && !(1..=20).contains(&max)
        {
            return Err(ConfigError::OutOfRange {
                field: "db_max_connections",
                value: u64::from(max),
                expected: "1..=20",
            });
        }
        if let Some(busy) = self.db_busy_timeout_ms
            && busy > 120_000
        {
            return Err(ConfigError::OutOfRange {
                field: "db_busy_timeout_ms",
                value: u64::from(busy),
                expected: "0..=120000",
            });
        }
        Ok(())
    }

    /// Base directory, falling back to [`DEFAULT_BASE_DIR`].
    #[must_use]
    pub fn base_dir(&self) -> PathBuf {
        self.base_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_BASE_DIR))
    }

    /// Politeness interval, falling back to [`DEFAULT_REQUEST_DELAY_MS`].
    #[must_use]
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms.unwrap_or(DEFAULT_REQUEST_DELAY_MS))
    }

    /// Fetch concurrency, falling back to [`DEFAULT_CONCURRENCY`].
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency.unwrap_or(DEFAULT_CONCURRENCY)
    }

    /// HTTP settings with configured timeouts.
    #[must_use]
    pub fn http_settings(&self) -> HttpSettings {
        HttpSettings::with_timeouts(
            self.connect_timeout_secs
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
            self.read_timeout_secs.unwrap_or(DEFAULT_READ_TIMEOUT_SECS),
        )
    }

    /// Pool options with configured overrides.
    #[must_use]
    pub fn database_options(&self) -> DatabaseOptions {
        let defaults = DatabaseOptions::default();
        DatabaseOptions {
            max_connections: self.db_max_connections.unwrap_or(defaults.max_connections),
            busy_timeout_ms: self.db_busy_timeout_ms.unwrap_or(defaults.busy_timeout_ms),
        }
    }
}

fn validate_timeout_secs(field: &'static str, value: Option<u64>) -> Result<(), ConfigError> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(1..=3600).contains(&value) {
        return Err(ConfigError::OutOfRange {
            field,
            value,
            expected: "1..=3600",
        });
    }
    Ok(())
}

/// Loaded config metadata.
#[derive(Debug, Clone, Default)]
pub struct LoadedConfig {
    /// Resolved config path if a base directory is known.
    pub path: Option<PathBuf>,
    /// Parsed file config when a config file exists.
    pub config: Option<FileConfig>,
}

impl LoadedConfig {
    /// Returns true when a file was found and parsed.
    #[must_use]
    pub fn loaded_from_file(&self) -> bool {
        self.config.is_some()
    }

    /// Parsed config, or all defaults when no file was found.
    #[must_use]
    pub fn effective(&self) -> FileConfig {
        self.config.clone().unwrap_or_default()
    }
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/paperspider/config.toml`
/// 2. `$HOME/.config/paperspider/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("paperspider")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("paperspider")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads config from the default path if present.
///
/// # Errors
///
/// Returns [`ConfigError`] if the file exists but cannot be read, parsed or
/// validated.
pub fn load_default_file_config() -> Result<LoadedConfig, ConfigError> {
    let path = resolve_default_config_path();
    let Some(path_ref) = path.as_deref() else {
        return Ok(LoadedConfig { path, config: None });
    };
    if !path_ref.exists() {
        debug!(path = %path_ref.display(), "no config file");
        return Ok(LoadedConfig { path, config: None });
    }

    let config = load_file_config(path_ref)?;
    debug!(path = %path_ref.display(), "config file loaded");
    Ok(LoadedConfig {
        path,
        config: Some(config),
    })
}

/// Loads and validates one config file.
///
/// # Errors
///
/// Returns [`ConfigError`] if the file cannot be read, parsed or validated.
pub fn load_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    FileConfig::from_toml_str(&raw, path)
}
