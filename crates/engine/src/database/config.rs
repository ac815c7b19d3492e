//! Database configuration via `linkdb.toml`
//!
//! On first open a commented default `linkdb.toml` is written to the data
//! directory. Settings are read once at open; edit the file and reopen to
//! change them.

use std::path::Path;

use serde::{Deserialize, Serialize};

use linkdb_core::{Error, Result};

use super::transactions::RetryConfig;

/// Config file name placed in the database data directory.
pub const CONFIG_FILE_NAME: &str = "linkdb.toml";

/// Database configuration loaded from `linkdb.toml`.
///
/// # Example
///
/// ```toml
/// checkpoint_on_close = true
/// notify_coalesce_limit = 64
///
/// [retry]
/// max_retries = 3
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Write a checkpoint when the database shuts down.
    #[serde(default = "default_checkpoint_on_close")]
    pub checkpoint_on_close: bool,
    /// Most commits the notifier folds into one live-query re-run.
    #[serde(default = "default_notify_coalesce_limit")]
    pub notify_coalesce_limit: usize,
    /// Retry policy used by autocommit writes.
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_checkpoint_on_close() -> bool {
    true
}

fn default_notify_coalesce_limit() -> usize {
    64
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            checkpoint_on_close: default_checkpoint_on_close(),
            notify_coalesce_limit: default_notify_coalesce_limit(),
            retry: RetryConfig::default(),
        }
    }
}

impl DatabaseConfig {
    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# LinkDB database configuration

# Write linkdb.ckpt when the database is closed (default: true).
# With false, only explicit Database::checkpoint() calls persist data.
checkpoint_on_close = true

# Upper bound on commits folded into a single live-query re-run (default: 64).
notify_coalesce_limit = 64

# Retry policy for autocommit writes that lose commit validation.
[retry]
max_retries = 3
base_delay_ms = 10
max_delay_ms = 100
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// `Error::Config` if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: DatabaseConfig = toml::from_str(&content).map_err(|e| {
            Error::Config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        if config.notify_coalesce_limit == 0 {
            return Err(Error::Config(format!(
                "notify_coalesce_limit in '{}' must be at least 1",
                path.display()
            )));
        }
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                Error::Config(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::Config(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}
