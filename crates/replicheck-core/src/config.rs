//! # Configuration
//!
//! Configuration is an explicit [`Config`] value handed to the command runner
//! and the verification engine. It can be loaded from a YAML file, from
//! `REPLICHECK_*` environment variables, or both (environment overrides file).
//!
//! ## Environment Variables
//!
//! - `REPLICHECK_EXECUTABLE` - Path to the litestream binary
//! - `REPLICHECK_LITESTREAM_CONFIG` - Path passed to litestream as `--config` (default: `config/litestream.yml`)
//! - `REPLICHECK_DATABASE_PATH` - Default SQLite database path
//! - `REPLICHECK_REPLICA_URL` - Short-hand replica location, e.g. `s3://bucket/db`
//! - `REPLICHECK_REPLICA_BUCKET` / `REPLICHECK_REPLICA_REGION` / `REPLICHECK_REPLICA_ENDPOINT`
//! - `REPLICHECK_REPLICA_KEY_ID` / `REPLICHECK_REPLICA_ACCESS_KEY` - Replica credentials
//! - `REPLICHECK_REPLICATION_WAIT` - Wait before restoring, humantime format (default: `10s`)
//! - `REPLICHECK_VERIFY_STRATEGY` - `sentinel` or `diff` (default: `sentinel`)
//! - `REPLICHECK_COMMAND_TIMEOUT` - Kill litestream commands after this long (default: none)
//!
//! ## Replica credentials
//!
//! Litestream reads its replica credentials from `LITESTREAM_*` variables.
//! [`ReplicaEnv::merge`] decides which values the child process receives: a
//! variable already present in the environment wins over the configured
//! value, and the parent process environment is never modified.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::VerifyError;

/// Default path of the litestream configuration file.
pub const DEFAULT_LITESTREAM_CONFIG: &str = "config/litestream.yml";

/// Default time given to the replication process to ship the sentinel.
pub const DEFAULT_REPLICATION_WAIT: Duration = Duration::from_secs(10);

/// Upper bound for the replication wait.
const MAX_REPLICATION_WAIT: Duration = Duration::from_secs(60 * 60);

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid environment variable '{key}': {message}")]
    InvalidEnvVar { key: String, message: String },

    #[error("Failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for VerifyError {
    fn from(error: ConfigError) -> Self {
        VerifyError::Config {
            message: error.to_string(),
        }
    }
}

/// How the engine judges a restored backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStrategy {
    /// Fail unless the sentinel row is present in the restored copy.
    #[default]
    Sentinel,
    /// Return a structural diff of source and restored copy.
    Diff,
}

impl std::str::FromStr for VerificationStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sentinel" => Ok(VerificationStrategy::Sentinel),
            "diff" => Ok(VerificationStrategy::Diff),
            other => Err(ConfigError::ValidationError(format!(
                "Invalid verification strategy '{}'. Must be 'sentinel' or 'diff'",
                other
            ))),
        }
    }
}

/// Settings for the verification engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    #[serde(with = "humantime_duration")]
    pub replication_wait: Duration,
    pub strategy: VerificationStrategy,
    #[serde(with = "humantime_option")]
    pub command_timeout: Option<Duration>,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            replication_wait: DEFAULT_REPLICATION_WAIT,
            strategy: VerificationStrategy::Sentinel,
            command_timeout: None,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub executable: Option<PathBuf>,
    pub config_path: PathBuf,
    pub database_path: Option<PathBuf>,
    pub replica_url: Option<String>,
    pub replica_bucket: Option<String>,
    pub replica_region: Option<String>,
    pub replica_endpoint: Option<String>,
    pub replica_key_id: Option<String>,
    pub replica_access_key: Option<String>,
    pub verification: VerificationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            executable: None,
            config_path: PathBuf::from(DEFAULT_LITESTREAM_CONFIG),
            database_path: None,
            replica_url: None,
            replica_bucket: None,
            replica_region: None,
            replica_endpoint: None,
            replica_key_id: None,
            replica_access_key: None,
            verification: VerificationConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::load_from_yaml(&content)
    }

    /// Load configuration from a YAML string
    pub fn load_from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.verification.replication_wait > MAX_REPLICATION_WAIT {
            return Err(ConfigError::ValidationError(format!(
                "replication_wait must not exceed {}",
                humantime::format_duration(MAX_REPLICATION_WAIT)
            )));
        }
        if self.verification.command_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::ValidationError(
                "command_timeout must be greater than zero".to_string(),
            ));
        }
        if self.config_path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "config_path must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// `LITESTREAM_*` lines for exporting the configuration to a shell.
    ///
    /// Returns `None` when no value that litestream reads has been configured.
    pub fn env_exports(&self) -> Option<Vec<(&'static str, String)>> {
        let database_path = self
            .database_path
            .as_ref()
            .map(|p| p.display().to_string());

        if database_path.is_none()
            && self.replica_url.is_none()
            && self.replica_key_id.is_none()
            && self.replica_access_key.is_none()
        {
            return None;
        }

        Some(vec![
            ("LITESTREAM_DATABASE_PATH", database_path.unwrap_or_default()),
            (
                "LITESTREAM_REPLICA_URL",
                self.replica_url.clone().unwrap_or_default(),
            ),
            (
                "LITESTREAM_ACCESS_KEY_ID",
                self.replica_key_id.clone().unwrap_or_default(),
            ),
            (
                "LITESTREAM_SECRET_ACCESS_KEY",
                self.replica_access_key.clone().unwrap_or_default(),
            ),
        ])
    }
}

/// Builder for [`Config`] with environment variable support
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Ok(Self {
            config: Config::load_from_file(path)?,
        })
    }

    /// Load configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if any environment variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env()
    }

    /// Override the current values with any `REPLICHECK_*` variables that are set.
    pub fn with_env(mut self) -> Result<Self, ConfigError> {
        if let Some(path) = get_env_string("REPLICHECK_EXECUTABLE") {
            self.config.executable = Some(PathBuf::from(path));
        }
        if let Some(path) = get_env_string("REPLICHECK_LITESTREAM_CONFIG") {
            self.config.config_path = PathBuf::from(path);
        }
        if let Some(path) = get_env_string("REPLICHECK_DATABASE_PATH") {
            self.config.database_path = Some(PathBuf::from(path));
        }
        if let Some(url) = get_env_string("REPLICHECK_REPLICA_URL") {
            self.config.replica_url = Some(url);
        }
        if let Some(bucket) = get_env_string("REPLICHECK_REPLICA_BUCKET") {
            self.config.replica_bucket = Some(bucket);
        }
        if let Some(region) = get_env_string("REPLICHECK_REPLICA_REGION") {
            self.config.replica_region = Some(region);
        }
        if let Some(endpoint) = get_env_string("REPLICHECK_REPLICA_ENDPOINT") {
            self.config.replica_endpoint = Some(endpoint);
        }
        if let Some(key_id) = get_env_string("REPLICHECK_REPLICA_KEY_ID") {
            self.config.replica_key_id = Some(key_id);
        }
        if let Some(access_key) = get_env_string("REPLICHECK_REPLICA_ACCESS_KEY") {
            self.config.replica_access_key = Some(access_key);
        }

        // Verification
        if let Some(wait) = get_env_duration("REPLICHECK_REPLICATION_WAIT")? {
            self.config.verification.replication_wait = wait;
        }
        if let Some(strategy) = get_env_string("REPLICHECK_VERIFY_STRATEGY") {
            self.config.verification.strategy =
                strategy
                    .parse()
                    .map_err(|e: ConfigError| ConfigError::InvalidEnvVar {
                        key: "REPLICHECK_VERIFY_STRATEGY".to_string(),
                        message: e.to_string(),
                    })?;
        }
        if let Some(timeout) = get_env_duration("REPLICHECK_COMMAND_TIMEOUT")? {
            self.config.verification.command_timeout = Some(timeout);
        }

        Ok(self)
    }

    pub fn executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.executable = Some(path.into());
        self
    }

    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.config_path = path.into();
        self
    }

    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.database_path = Some(path.into());
        self
    }

    pub fn replica_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.config.replica_bucket = Some(bucket.into());
        self
    }

    pub fn replica_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.config.replica_key_id = Some(key_id.into());
        self
    }

    pub fn replica_access_key(mut self, access_key: impl Into<String>) -> Self {
        self.config.replica_access_key = Some(access_key.into());
        self
    }

    pub fn replication_wait(mut self, wait: Duration) -> Self {
        self.config.verification.replication_wait = wait;
        self
    }

    pub fn strategy(mut self, strategy: VerificationStrategy) -> Self {
        self.config.verification.strategy = strategy;
        self
    }

    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.config.verification.command_timeout = Some(timeout);
        self
    }

    /// Validate and return the configuration.
    pub fn build(self) -> Result<Config, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Replica variables handed to the litestream child process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicaEnv {
    vars: Vec<(&'static str, String)>,
}

impl ReplicaEnv {
    /// Merge configured replica settings with the existing environment.
    ///
    /// `lookup` returns the current value of an environment variable. A value
    /// that is already present takes precedence over the configured one.
    pub fn merge<F>(config: &Config, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let candidates = [
            ("LITESTREAM_REPLICA_BUCKET", &config.replica_bucket),
            ("LITESTREAM_REPLICA_REGION", &config.replica_region),
            ("LITESTREAM_REPLICA_ENDPOINT", &config.replica_endpoint),
            ("LITESTREAM_ACCESS_KEY_ID", &config.replica_key_id),
            ("LITESTREAM_SECRET_ACCESS_KEY", &config.replica_access_key),
        ];

        let vars = candidates
            .into_iter()
            .filter_map(|(key, configured)| {
                lookup(key)
                    .or_else(|| configured.clone())
                    .map(|value| (key, value))
            })
            .collect();

        Self { vars }
    }

    /// Merge against the real process environment.
    pub fn from_process(config: &Config) -> Self {
        Self::merge(config, |key| std::env::var(key).ok())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.vars.iter().map(|(k, v)| (*k, v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

fn get_env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn get_env_duration(key: &str) -> Result<Option<Duration>, ConfigError> {
    match get_env_string(key) {
        Some(value) => humantime::parse_duration(&value)
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnvVar {
                key: key.to_string(),
                message: format!("Invalid duration '{}': {}", value, e),
            }),
        None => Ok(None),
    }
}

mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

mod humantime_option {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => {
                serializer.serialize_str(&humantime::format_duration(*duration).to_string())
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|raw| humantime::parse_duration(&raw).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.config_path, PathBuf::from("config/litestream.yml"));
        assert_eq!(config.verification.replication_wait, Duration::from_secs(10));
        assert_eq!(config.verification.strategy, VerificationStrategy::Sentinel);
        assert!(config.verification.command_timeout.is_none());
    }

    #[test]
    fn test_load_from_yaml() {
        let yaml = r#"
config_path: /etc/litestream.yml
database_path: storage/production.sqlite3
replica_bucket: mybkt
verification:
  replication_wait: 2s
  strategy: diff
  command_timeout: 1m
"#;
        let config = Config::load_from_yaml(yaml).unwrap();

        assert_eq!(config.config_path, PathBuf::from("/etc/litestream.yml"));
        assert_eq!(
            config.database_path,
            Some(PathBuf::from("storage/production.sqlite3"))
        );
        assert_eq!(config.replica_bucket.as_deref(), Some("mybkt"));
        assert_eq!(config.verification.replication_wait, Duration::from_secs(2));
        assert_eq!(config.verification.strategy, VerificationStrategy::Diff);
        assert_eq!(
            config.verification.command_timeout,
            Some(Duration::from_secs(60))
        );
    }

    #[test]
    fn test_load_from_yaml_rejects_bad_duration() {
        let yaml = "verification:\n  replication_wait: soon\n";
        assert!(matches!(
            Config::load_from_yaml(yaml),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_validation_rejects_zero_timeout() {
        let result = ConfigBuilder::new()
            .command_timeout(Duration::ZERO)
            .build();
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_replica_env_uses_config_when_env_not_set() {
        let config = ConfigBuilder::new()
            .replica_bucket("mybkt")
            .build()
            .unwrap();

        let env = ReplicaEnv::merge(&config, lookup_from(&[]));

        assert_eq!(env.get("LITESTREAM_REPLICA_BUCKET"), Some("mybkt"));
        assert_eq!(env.get("LITESTREAM_ACCESS_KEY_ID"), None);
        assert_eq!(env.get("LITESTREAM_SECRET_ACCESS_KEY"), None);
    }

    #[test]
    fn test_replica_env_sets_all_from_config() {
        let config = ConfigBuilder::new()
            .replica_bucket("mybkt")
            .replica_key_id("mykey")
            .replica_access_key("access")
            .build()
            .unwrap();

        let env = ReplicaEnv::merge(&config, lookup_from(&[]));

        assert_eq!(env.get("LITESTREAM_REPLICA_BUCKET"), Some("mybkt"));
        assert_eq!(env.get("LITESTREAM_ACCESS_KEY_ID"), Some("mykey"));
        assert_eq!(env.get("LITESTREAM_SECRET_ACCESS_KEY"), Some("access"));
    }

    #[test]
    fn test_replica_env_existing_values_win() {
        let config = ConfigBuilder::new()
            .replica_bucket("mybkt")
            .replica_key_id("mykey")
            .replica_access_key("access")
            .build()
            .unwrap();

        let env = ReplicaEnv::merge(
            &config,
            lookup_from(&[
                ("LITESTREAM_REPLICA_BUCKET", "original_bkt"),
                ("LITESTREAM_ACCESS_KEY_ID", "original_key"),
                ("LITESTREAM_SECRET_ACCESS_KEY", "original_access"),
            ]),
        );

        assert_eq!(env.get("LITESTREAM_REPLICA_BUCKET"), Some("original_bkt"));
        assert_eq!(env.get("LITESTREAM_ACCESS_KEY_ID"), Some("original_key"));
        assert_eq!(
            env.get("LITESTREAM_SECRET_ACCESS_KEY"),
            Some("original_access")
        );
    }

    #[test]
    fn test_replica_env_empty_when_nothing_configured() {
        let env = ReplicaEnv::merge(&Config::default(), lookup_from(&[]));
        assert!(env.is_empty());
    }

    #[test]
    fn test_env_exports_when_nothing_configured() {
        assert!(Config::default().env_exports().is_none());
    }

    #[test]
    fn test_env_exports_when_configured() {
        let config = ConfigBuilder::new()
            .database_path("path/to/database")
            .build()
            .unwrap();

        let exports = config.env_exports().unwrap();
        assert_eq!(
            exports,
            vec![
                ("LITESTREAM_DATABASE_PATH", "path/to/database".to_string()),
                ("LITESTREAM_REPLICA_URL", String::new()),
                ("LITESTREAM_ACCESS_KEY_ID", String::new()),
                ("LITESTREAM_SECRET_ACCESS_KEY", String::new()),
            ]
        );
    }

    fn clear_replicheck_env() {
        for key in [
            "REPLICHECK_EXECUTABLE",
            "REPLICHECK_LITESTREAM_CONFIG",
            "REPLICHECK_DATABASE_PATH",
            "REPLICHECK_REPLICA_BUCKET",
            "REPLICHECK_REPLICATION_WAIT",
            "REPLICHECK_VERIFY_STRATEGY",
            "REPLICHECK_COMMAND_TIMEOUT",
        ] {
            unsafe {
                std::env::remove_var(key);
            }
        }
    }

    #[test]
    #[serial]
    fn test_from_env() {
        clear_replicheck_env();
        unsafe {
            std::env::set_var("REPLICHECK_LITESTREAM_CONFIG", "CONFIG");
            std::env::set_var("REPLICHECK_REPLICATION_WAIT", "500ms");
            std::env::set_var("REPLICHECK_VERIFY_STRATEGY", "diff");
        }

        let config = ConfigBuilder::from_env().unwrap().build().unwrap();

        assert_eq!(config.config_path, PathBuf::from("CONFIG"));
        assert_eq!(
            config.verification.replication_wait,
            Duration::from_millis(500)
        );
        assert_eq!(config.verification.strategy, VerificationStrategy::Diff);

        clear_replicheck_env();
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_strategy() {
        clear_replicheck_env();
        unsafe {
            std::env::set_var("REPLICHECK_VERIFY_STRATEGY", "eventually");
        }

        let result = ConfigBuilder::from_env();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidEnvVar { ref key, .. }) if key == "REPLICHECK_VERIFY_STRATEGY"
        ));

        clear_replicheck_env();
    }
}
