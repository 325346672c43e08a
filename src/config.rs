//! Configuration management for flood control.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use config::{Config, File, FileFormat};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{FloodControlError, Result};
use crate::store::StoreBackend;

/// Prefix for environment variable overrides.
///
/// `__` separates path segments and `_` stands for `-` within a segment, so
/// `FLOODCONTROL_APP__FLOOD_CONTROL__CALL_COUNT_LIMIT=7` sets
/// `app.flood-control.call-count-limit`.
const ENV_PREFIX: &str = "FLOODCONTROL_";

/// Root of the configuration tree. Everything lives under `app:`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
}

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AppSection {
    /// Flood control rules
    #[serde(default)]
    pub flood_control: FloodControlConfig,

    /// Redis connection
    #[serde(default)]
    pub redis: RedisConfig,

    /// Store backend selection
    #[serde(default)]
    pub store: StoreConfig,

    /// Simulated traffic
    #[serde(default)]
    pub driver: DriverConfig,
}

/// Flood control rules.
///
/// Values are signed so that invalid negative settings reach validation
/// instead of failing deserialization with a less useful message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FloodControlConfig {
    /// Window length in seconds
    #[serde(default = "default_time_interval_seconds")]
    pub time_interval_seconds: i64,

    /// Calls accepted per identity per window; 0 rejects everything
    #[serde(default = "default_call_count_limit")]
    pub call_count_limit: i64,
}

impl Default for FloodControlConfig {
    fn default() -> Self {
        Self {
            time_interval_seconds: default_time_interval_seconds(),
            call_count_limit: default_call_count_limit(),
        }
    }
}

fn default_time_interval_seconds() -> i64 {
    10
}

fn default_call_count_limit() -> i64 {
    3
}

impl FloodControlConfig {
    /// Check the rules and return the window and limit in usable units.
    pub fn validate(&self) -> Result<(Duration, u64)> {
        let window = u64::try_from(self.time_interval_seconds).map_err(|_| {
            FloodControlError::Config(
                "'time-interval-seconds' must be greater than or equal to 0".to_string(),
            )
        })?;
        let limit = u64::try_from(self.call_count_limit).map_err(|_| {
            FloodControlError::Config(
                "'call-count-limit' must be greater than or equal to 0".to_string(),
            )
        })?;

        Ok((Duration::from_secs(window), limit))
    }
}

/// Redis connection parameters.
///
/// `user` and `password` are normally injected from the environment.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RedisConfig {
    #[serde(default = "default_redis_host")]
    pub host: String,

    #[serde(default = "default_redis_port")]
    pub port: u16,

    /// Logical database index
    #[serde(default)]
    pub database: u32,

    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub password: Option<String>,
}

impl std::fmt::Debug for RedisConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: default_redis_host(),
            port: default_redis_port(),
            database: 0,
            user: None,
            password: None,
        }
    }
}

fn default_redis_host() -> String {
    "127.0.0.1".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

impl RedisConfig {
    /// Connection URL in the form `redis://[user[:password]@]host:port/database`.
    pub fn url(&self) -> String {
        let credentials = match (&self.user, &self.password) {
            (Some(user), Some(password)) => format!("{}:{}@", user, password),
            (Some(user), None) => format!("{}@", user),
            (None, Some(password)) => format!(":{}@", password),
            (None, None) => String::new(),
        };

        format!(
            "redis://{}{}:{}/{}",
            credentials, self.host, self.port, self.database
        )
    }
}

/// State store selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Per-command timeout for the Redis backend in milliseconds
    #[serde(default)]
    pub command_timeout_ms: Option<u64>,
}

impl StoreConfig {
    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_ms.map(Duration::from_millis)
    }
}

/// Simulated traffic settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DriverConfig {
    /// Identity every simulated request is sent as
    #[serde(default = "default_identity")]
    pub identity: String,

    #[serde(default = "default_request_count")]
    pub request_count: u32,

    /// Lower bound of the pause between requests
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,

    /// Upper bound of the pause between requests
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            identity: default_identity(),
            request_count: default_request_count(),
            min_interval_ms: default_min_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
        }
    }
}

fn default_identity() -> String {
    "1".to_string()
}

fn default_request_count() -> u32 {
    20
}

fn default_min_interval_ms() -> u64 {
    1000
}

fn default_max_interval_ms() -> u64 {
    3000
}

impl DriverConfig {
    pub fn validate(&self) -> Result<()> {
        if self.request_count == 0 {
            return Err(FloodControlError::Config(
                "'request-count' must be greater than 0".to_string(),
            ));
        }
        if self.min_interval_ms > self.max_interval_ms {
            return Err(FloodControlError::Config(format!(
                "'min-interval-ms' ({}) must not exceed 'max-interval-ms' ({})",
                self.min_interval_ms, self.max_interval_ms
            )));
        }
        Ok(())
    }
}

impl AppConfig {
    /// Load configuration by merging `paths` in order, later files winning.
    ///
    /// `FLOODCONTROL_*` environment overrides are applied on top, then Redis
    /// credentials are taken from `REDIS_USER` / `REDIS_PASSWORD` when set.
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let vars: HashMap<String, String> = std::env::vars_os()
            .filter_map(|(name, value)| {
                Some((name.into_string().ok()?, value.into_string().ok()?))
            })
            .collect();
        Self::load_with_vars(paths, &vars)
    }

    fn load_with_vars<P: AsRef<Path>>(
        paths: &[P],
        vars: &HashMap<String, String>,
    ) -> Result<Self> {
        if paths.is_empty() {
            return Err(FloodControlError::Config(
                "at least one configuration file must be given".to_string(),
            ));
        }

        let mut builder = Config::builder();
        for path in paths {
            let path = path.as_ref();
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(File::from(path).required(true));
        }

        for (key, value) in env_overrides(vars) {
            info!(key = %key, "Applying environment override");
            builder = builder.set_override(key, value)?;
        }

        let mut config: AppConfig = builder.build()?.try_deserialize()?;
        config.apply_credentials(vars);
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: AppConfig = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check every section that has constraints.
    pub fn validate(&self) -> Result<()> {
        self.app.flood_control.validate()?;
        self.app.driver.validate()
    }

    fn apply_credentials(&mut self, vars: &HashMap<String, String>) {
        let non_empty = |key: &str| vars.get(key).filter(|v| !v.is_empty()).cloned();

        if let Some(user) = non_empty("REDIS_USER") {
            self.app.redis.user = Some(user);
        }
        if let Some(password) = non_empty("REDIS_PASSWORD") {
            self.app.redis.password = Some(password);
        }
    }
}

/// Translate `FLOODCONTROL_*` variables into configuration keys.
fn env_overrides(vars: &HashMap<String, String>) -> Vec<(String, String)> {
    let mut overrides: Vec<(String, String)> = vars
        .iter()
        .filter_map(|(name, value)| {
            let path = name.strip_prefix(ENV_PREFIX)?;
            let segments: Vec<String> = path
                .split("__")
                .map(|segment| segment.to_lowercase().replace('_', "-"))
                .collect();
            let malformed = |segment: &String| {
                segment.is_empty() || segment.starts_with('-') || segment.ends_with('-')
            };
            if segments.iter().any(malformed) {
                return None;
            }
            Some((segments.join("."), value.clone()))
        })
        .collect();
    overrides.sort();
    overrides
}
