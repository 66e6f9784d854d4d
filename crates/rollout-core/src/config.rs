//! Configuration loading and management
//!
//! # Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//! 1. Built-in defaults
//! 2. Global config: ~/.config/rollout/config.toml
//! 3. Project config: .rollout/config.toml
//! 4. Environment variables: `ROLLOUT_*`
//! 5. An explicit file passed on the command line
//!
//! Only keys present in a file override lower layers. Unknown keys are rejected.
//!
//! # Example Config
//!
//! ```toml
//! [store]
//! data_dir = "/var/lib/rollout"
//!
//! [log]
//! level = "debug"
//!
//! [output]
//! pretty = true
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest config file that will be read.
const MAX_CONFIG_FILE_SIZE: u64 = 1_048_576;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

// ═══════════════════════════════════════════════════════════════════════════
// CONFIGURATION STRUCTURES
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub store: StoreConfig,
    pub log: LogConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreConfig {
    /// Directory holding one JSON snapshot per deployment
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogConfig {
    /// Default `tracing` level when `RUST_LOG` is not set
    pub level: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputConfig {
    /// Pretty-print JSON output
    pub pretty: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let data_dir = directories::ProjectDirs::from("", "", "rollout").map_or_else(
            || PathBuf::from(".rollout").join("deployments"),
            |dirs| dirs.data_dir().join("deployments"),
        );
        Self { data_dir }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// PARTIAL CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════

/// Partial configuration with `Option<T>` fields for explicit-key merge semantics.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PartialConfig {
    pub store: Option<PartialStoreConfig>,
    pub log: Option<PartialLogConfig>,
    pub output: Option<PartialOutputConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PartialStoreConfig {
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PartialLogConfig {
    pub level: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PartialOutputConfig {
    pub pretty: Option<bool>,
}

impl Config {
    /// Override only the fields set in `partial`.
    pub fn merge_partial(&mut self, partial: PartialConfig) {
        if let Some(store) = partial.store {
            if let Some(data_dir) = store.data_dir {
                self.store.data_dir = data_dir;
            }
        }
        if let Some(log) = partial.log {
            if let Some(level) = log.level {
                self.log.level = level;
            }
        }
        if let Some(output) = partial.output {
            if let Some(pretty) = output.pretty {
                self.output.pretty = pretty;
            }
        }
    }

    /// Apply environment variable overrides
    ///
    /// # Errors
    ///
    /// Returns error if environment variable values are invalid
    fn apply_env_vars(&mut self) -> Result<(), ConfigError> {
        // ROLLOUT_DATA_DIR
        if let Ok(value) = std::env::var("ROLLOUT_DATA_DIR") {
            self.store.data_dir = PathBuf::from(value);
        }

        // ROLLOUT_LOG_LEVEL
        if let Ok(value) = std::env::var("ROLLOUT_LOG_LEVEL") {
            self.log.level = value;
        }

        // ROLLOUT_OUTPUT_PRETTY
        if let Ok(value) = std::env::var("ROLLOUT_OUTPUT_PRETTY") {
            self.output.pretty = match value.to_lowercase().as_str() {
                "true" | "1" => true,
                "false" | "0" => false,
                _ => {
                    return Err(ConfigError::Invalid(format!(
                        "Invalid ROLLOUT_OUTPUT_PRETTY value: '{value}'. Must be 'true' or 'false'"
                    )))
                }
            };
        }

        Ok(())
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any values are out of range or invalid
    pub fn validate(&self) -> Result<(), ConfigError> {
        let level = self.log.level.to_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "log.level must be one of {}, got '{}'",
                LOG_LEVELS.join(", "),
                self.log.level
            )));
        }
        if self.store.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "store.data_dir must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// LOADING
// ═══════════════════════════════════════════════════════════════════════════

/// Where configuration files are looked up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigSources {
    pub global: Option<PathBuf>,
    pub project: Option<PathBuf>,
    /// File named on the command line; must exist
    pub explicit: Option<PathBuf>,
}

impl ConfigSources {
    /// The standard global and project locations, plus an optional explicit file.
    #[must_use]
    pub fn discover(explicit: Option<PathBuf>) -> Self {
        Self {
            global: global_config_path(),
            project: std::env::current_dir()
                .ok()
                .map(|dir| dir.join(".rollout").join("config.toml")),
            explicit,
        }
    }
}

/// Load configuration from the standard locations.
///
/// # Errors
///
/// Returns error if a config file is malformed, contains unknown keys, or the
/// resulting values fail validation.
pub async fn load_config(explicit: Option<PathBuf>) -> Result<Config, ConfigError> {
    load_config_from(&ConfigSources::discover(explicit)).await
}

/// Load configuration from the given sources.
///
/// Missing global and project files are skipped. A missing explicit file is an error.
///
/// # Errors
///
/// See [`load_config`].
pub async fn load_config_from(sources: &ConfigSources) -> Result<Config, ConfigError> {
    let mut config = Config::default();

    for path in [&sources.global, &sources.project].into_iter().flatten() {
        match load_partial_toml_file(path).await {
            Ok(partial) => config.merge_partial(partial),
            Err(ConfigError::Io { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }

    config.apply_env_vars()?;

    if let Some(path) = &sources.explicit {
        config.merge_partial(load_partial_toml_file(path).await?);
    }

    config.validate()?;
    tracing::debug!(data_dir = %config.store.data_dir.display(), "Loaded configuration");
    Ok(config)
}

/// Load a TOML file into a `PartialConfig` for explicit-key merge semantics.
///
/// # Errors
///
/// Returns error if:
/// - File cannot be read or exceeds the size limit
/// - TOML is malformed
/// - Unknown configuration keys are present
pub async fn load_partial_toml_file(path: &Path) -> Result<PartialConfig, ConfigError> {
    let io_error = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };

    let metadata = tokio::fs::metadata(path).await.map_err(io_error)?;
    if metadata.len() > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::Invalid(format!(
            "config file {} exceeds maximum size of {MAX_CONFIG_FILE_SIZE} bytes",
            path.display()
        )));
    }

    let content = tokio::fs::read_to_string(path).await.map_err(io_error)?;
    toml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn global_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "rollout")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    async fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        tokio::fs::write(&path, content)
            .await
            .expect("write config file");
        path
    }

    #[test]
    fn test_default_config_values() {
        let config = Config::default();
        assert_eq!(config.log.level, "info");
        assert!(!config.output.pretty);
        assert!(config.store.data_dir.ends_with("deployments"));
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    #[serial]
    async fn test_missing_files_yield_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let sources = ConfigSources {
            global: Some(dir.path().join("missing-global.toml")),
            project: Some(dir.path().join("missing-project.toml")),
            explicit: None,
        };

        let config = load_config_from(&sources).await.expect("loads");
        assert_eq!(config.log, LogConfig::default());
    }

    #[tokio::test]
    #[serial]
    async fn test_project_overrides_global() {
        let dir = tempfile::tempdir().expect("temp dir");
        let global = write(
            dir.path(),
            "global.toml",
            "[log]\nlevel = \"warn\"\n[output]\npretty = true\n",
        )
        .await;
        let project = write(dir.path(), "project.toml", "[log]\nlevel = \"debug\"\n").await;

        let config = load_config_from(&ConfigSources {
            global: Some(global),
            project: Some(project),
            explicit: None,
        })
        .await
        .expect("loads");

        assert_eq!(config.log.level, "debug");
        assert!(config.output.pretty, "unset keys keep the global value");
    }

    #[tokio::test]
    #[serial]
    async fn test_env_overrides_files_and_explicit_overrides_env() {
        let dir = tempfile::tempdir().expect("temp dir");
        let project = write(dir.path(), "project.toml", "[store]\ndata_dir = \"/from/file\"\n").await;
        let explicit = write(dir.path(), "explicit.toml", "[log]\nlevel = \"trace\"\n").await;

        std::env::set_var("ROLLOUT_DATA_DIR", "/from/env");
        std::env::set_var("ROLLOUT_LOG_LEVEL", "error");
        let result = load_config_from(&ConfigSources {
            global: None,
            project: Some(project),
            explicit: Some(explicit),
        })
        .await;
        std::env::remove_var("ROLLOUT_DATA_DIR");
        std::env::remove_var("ROLLOUT_LOG_LEVEL");

        let config = result.expect("loads");
        assert_eq!(config.store.data_dir, PathBuf::from("/from/env"));
        assert_eq!(config.log.level, "trace");
    }

    #[tokio::test]
    #[serial]
    async fn test_invalid_env_bool_rejected() {
        std::env::set_var("ROLLOUT_OUTPUT_PRETTY", "yes please");
        let result = load_config_from(&ConfigSources::default()).await;
        std::env::remove_var("ROLLOUT_OUTPUT_PRETTY");

        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_unknown_keys_rejected() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = write(dir.path(), "typo.toml", "[log]\nlevle = \"debug\"\n").await;

        let result = load_partial_toml_file(&path).await;
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[tokio::test]
    async fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let result = load_config_from(&ConfigSources {
            explicit: Some(dir.path().join("nope.toml")),
            ..ConfigSources::default()
        })
        .await;

        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let config = Config {
            log: LogConfig {
                level: "loud".to_string(),
            },
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_merge_partial_only_overrides_set_fields() {
        let mut config = Config::default();
        let before = config.store.clone();

        config.merge_partial(PartialConfig {
            output: Some(PartialOutputConfig { pretty: Some(true) }),
            ..PartialConfig::default()
        });

        assert!(config.output.pretty);
        assert_eq!(config.store, before);
    }
}
