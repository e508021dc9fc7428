//! Session configuration
//!
//! Loaded from TOML; every field has a default so partial files work:
//!
//! ```toml
//! channel_name = "plansync"
//! copy_suffix = " (copy)"
//!
//! [retry]
//! max_attempts = 3
//! initial_delay_ms = 1000
//! ```

use crate::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// TOML did not parse
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Values out of range
    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Per-session sync configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Name scoping the cross-session channel
    pub channel_name: String,
    /// Forwarded to the preview generator
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    /// Name used by `create_new` when none is given
    pub default_document_name: String,
    /// Appended to the name of the copy made by `keep_both`
    pub copy_suffix: String,
    /// Attach previews to saves
    pub previews_enabled: bool,
    /// Transport retry budget
    pub retry: RetryConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            channel_name: "plansync".to_string(),
            owner_id: None,
            default_document_name: "Untitled project".to_string(),
            copy_suffix: " (copy)".to_string(),
            previews_enabled: true,
            retry: RetryConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Create default config
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With retry settings
    #[inline]
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// With channel name
    #[inline]
    #[must_use]
    pub fn with_channel_name(mut self, name: impl Into<String>) -> Self {
        self.channel_name = name.into();
        self
    }

    /// With preview owner
    #[inline]
    #[must_use]
    pub fn with_owner_id(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    /// With default document name
    #[inline]
    #[must_use]
    pub fn with_default_document_name(mut self, name: impl Into<String>) -> Self {
        self.default_document_name = name.into();
        self
    }

    /// With copy suffix
    #[inline]
    #[must_use]
    pub fn with_copy_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.copy_suffix = suffix.into();
        self
    }

    /// Enable or disable previews
    #[inline]
    #[must_use]
    pub fn with_previews(mut self, enabled: bool) -> Self {
        self.previews_enabled = enabled;
        self
    }

    /// Check value ranges
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] for an unusable retry budget, a blank
    /// default name or a blank channel name
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry.validate()?;
        if self.default_document_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "default_document_name must not be empty".into(),
            ));
        }
        if self.channel_name.is_empty() {
            return Err(ConfigError::Invalid("channel_name must not be empty".into()));
        }
        Ok(())
    }

    /// Parse and validate TOML
    ///
    /// # Errors
    /// Returns [`ConfigError::Parse`] or [`ConfigError::Invalid`]
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    ///
    /// # Errors
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`SyncConfig::from_toml_str`]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!("Loading sync config from {}", path.display());
        Self::from_toml_str(&source)
    }

    /// Render as TOML
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] if serialization fails
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}
