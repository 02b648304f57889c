// crates/stmt-cache-core/src/config.rs
// ============================================================================
// Module: Statement Cache Configuration
// Description: TOML-backed settings for connection statement caches.
// Purpose: Load and validate cache bounds and logging switches.
// Dependencies: serde, thiserror, toml
// ============================================================================

//! ## Overview
//! [`StatementCacheConfig`] is read from TOML with unknown fields rejected.
//! Loading from disk enforces path length limits, a file size ceiling and
//! UTF-8 content before parsing, then validates the parsed values.
//!
//! ```toml
//! max_sql_cache_size = 100
//! log_statement_lifecycle = true
//! ```

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Hard upper bound for the per-connection statement cache.
pub const MAX_SQL_CACHE_SIZE: usize = 250;
/// Default statement cache capacity.
pub const DEFAULT_MAX_SQL_CACHE_SIZE: usize = MAX_SQL_CACHE_SIZE;
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
pub(crate) const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading and validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Config
// ============================================================================

/// Statement cache settings for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatementCacheConfig {
    /// Maximum number of cached statement handles; zero disables caching.
    #[serde(default = "default_max_sql_cache_size")]
    pub max_sql_cache_size: usize,
    /// Emits debug-level handle lifecycle events when set.
    #[serde(default)]
    pub log_statement_lifecycle: bool,
}

impl Default for StatementCacheConfig {
    fn default() -> Self {
        Self {
            max_sql_cache_size: DEFAULT_MAX_SQL_CACHE_SIZE,
            log_statement_lifecycle: false,
        }
    }
}

impl StatementCacheConfig {
    /// Loads and validates configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the path is too long, the file cannot be
    /// read, exceeds the size limit, is not UTF-8, fails to parse or holds
    /// invalid values.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        validate_path(path)?;
        let bytes = fs::read(path).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        Self::from_toml_str(content)
    }

    /// Parses and validates configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or unknown fields and
    /// [`ConfigError::Invalid`] for out-of-range values.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when `max_sql_cache_size` exceeds
    /// [`MAX_SQL_CACHE_SIZE`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_sql_cache_size > MAX_SQL_CACHE_SIZE {
            return Err(ConfigError::Invalid(format!(
                "max_sql_cache_size must be at most {MAX_SQL_CACHE_SIZE}"
            )));
        }
        Ok(())
    }
}

/// Serde default for [`StatementCacheConfig::max_sql_cache_size`].
const fn default_max_sql_cache_size() -> usize {
    DEFAULT_MAX_SQL_CACHE_SIZE
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Validates a config path against length limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}
