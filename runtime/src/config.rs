//! Worker configuration.
//!
//! Every field has a default, so an empty JSON object is a valid config as
//! far as parsing goes; `validate` rejects a missing origin.

use serde::{Deserialize, Serialize};
use url::{Origin, Url};

use crate::service_worker::NavigationRoute;

/// Default name of the cache holding the application shell.
pub const DEFAULT_SHELL_CACHE: &str = "app-shell";
/// Default key of the single shell entry.
pub const DEFAULT_SHELL_KEY: &str = "shell-index";
/// Name prefix of caches created by the previous precaching worker.
pub const DEFAULT_LEGACY_PREFIX: &str = "workbox";
/// Path prefix under which application roots live.
pub const DEFAULT_APPS_PREFIX: &str = "/apps/";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid origin '{0}'")]
    InvalidOrigin(String),
    #[error("apps path prefix must start and end with '/': '{0}'")]
    InvalidPrefix(String),
    #[error("{0} must not be empty")]
    Empty(&'static str),
    #[error("shell cache '{cache}' would be deleted as a legacy '{prefix}' cache")]
    ShellCacheIsLegacy { cache: String, prefix: String },
    #[error("navigation pattern error: {0}")]
    Pattern(#[from] regex::Error),
}

/// Worker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WorkerConfig {
    /// Origin the worker is registered for, e.g. `https://play.example.org`.
    pub origin: String,
    /// Name of the shell cache.
    pub shell_cache_name: String,
    /// Key of the shell entry inside the shell cache.
    pub shell_key: String,
    /// Caches whose names start with this are deleted on activation.
    pub legacy_cache_prefix: String,
    /// Application roots are `{prefix}{name}` and `{prefix}{name}/`.
    pub apps_path_prefix: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            origin: String::new(),
            shell_cache_name: DEFAULT_SHELL_CACHE.to_string(),
            shell_key: DEFAULT_SHELL_KEY.to_string(),
            legacy_cache_prefix: DEFAULT_LEGACY_PREFIX.to_string(),
            apps_path_prefix: DEFAULT_APPS_PREFIX.to_string(),
        }
    }
}

impl WorkerConfig {
    /// Default config for an origin.
    pub fn for_origin(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            ..Self::default()
        }
    }

    /// Parse and validate a JSON config.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: WorkerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.parsed_origin()?;
        self.route()?;

        if self.shell_cache_name.is_empty() {
            return Err(ConfigError::Empty("shellCacheName"));
        }
        if self.shell_key.is_empty() {
            return Err(ConfigError::Empty("shellKey"));
        }
        if self.legacy_cache_prefix.is_empty() {
            return Err(ConfigError::Empty("legacyCachePrefix"));
        }
        if self.shell_cache_name.starts_with(&self.legacy_cache_prefix) {
            return Err(ConfigError::ShellCacheIsLegacy {
                cache: self.shell_cache_name.clone(),
                prefix: self.legacy_cache_prefix.clone(),
            });
        }
        Ok(())
    }

    /// The configured origin as a tuple origin.
    pub fn parsed_origin(&self) -> Result<Origin, ConfigError> {
        let url =
            Url::parse(&self.origin).map_err(|_| ConfigError::InvalidOrigin(self.origin.clone()))?;
        let origin = url.origin();
        if !origin.is_tuple() {
            return Err(ConfigError::InvalidOrigin(self.origin.clone()));
        }
        Ok(origin)
    }

    /// Build the application root matcher.
    pub fn route(&self) -> Result<NavigationRoute, ConfigError> {
        let prefix = &self.apps_path_prefix;
        if prefix.len() < 2 || !prefix.starts_with('/') || !prefix.ends_with('/') {
            return Err(ConfigError::InvalidPrefix(prefix.clone()));
        }
        Ok(NavigationRoute::new(prefix)?)
    }
}
