//! Runtime configuration.
//!
//! Settings live in an INI file, by default `<config dir>/volflow/config.ini`:
//!
//! ```ini
//! [logging]
//! level = info
//! file = /var/log/volflow.log
//!
//! [cache]
//! backend_cache_bytes = 1073741824
//! handle_cache_bytes = 134217728
//!
//! [queue]
//! max_attempts = 10
//! retry_delay_ms = 0
//! backoff = fixed
//!
//! [flow]
//! pull_max_num = 500
//! pull_max_time_ms = 2500
//! poll_interval_ms = 100
//! ```
//!
//! Missing keys take their defaults; unparsable values are rejected.

use crate::backend::{BackendCache, DEFAULT_BACKEND_CACHE_BYTES, DEFAULT_HANDLE_CACHE_BYTES};
use crate::executor::{LocalQueueConfig, RetryPolicy, DEFAULT_MAX_ATTEMPTS};
use crate::flow::{
    ChunkedFlowConfig, DEFAULT_POLL_INTERVAL_MS, DEFAULT_PULL_MAX_NUM, DEFAULT_PULL_MAX_TIME_MS,
};
use crate::layer::LayerSpec;
use ini::Ini;
use serde_json::json;
use std::fmt;
use std::io;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Errors raised while loading or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for [{section}] {key}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
    },

    #[error("Failed to write config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Ini(#[from] ini::Error),
}

// =============================================================================
// Sections
// =============================================================================

/// `[logging]` section.
#[derive(Clone, Debug, PartialEq)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `volflow=debug`.
    pub level: String,
    /// Log file; stdout when unset.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            file: None,
        }
    }
}

impl LoggingConfig {
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }
}

/// `[cache]` section.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheConfig {
    /// Budget of the shared backend handle cache.
    pub backend_cache_bytes: u64,
    /// Chunk cache budget of each array store handle.
    pub handle_cache_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend_cache_bytes: DEFAULT_BACKEND_CACHE_BYTES,
            handle_cache_bytes: DEFAULT_HANDLE_CACHE_BYTES,
        }
    }
}

impl CacheConfig {
    pub fn with_backend_cache_bytes(mut self, bytes: u64) -> Self {
        self.backend_cache_bytes = bytes;
        self
    }

    pub fn with_handle_cache_bytes(mut self, bytes: u64) -> Self {
        self.handle_cache_bytes = bytes;
        self
    }

    /// Creates the shared backend cache.
    pub fn build_cache(&self) -> Arc<BackendCache> {
        Arc::new(BackendCache::new(self.backend_cache_bytes))
    }

    /// An array store description using the configured handle budget.
    pub fn array_store_spec(&self, path: impl Into<PathBuf>) -> LayerSpec {
        LayerSpec::array_store(path).with_param("handle_cache_bytes", json!(self.handle_cache_bytes))
    }
}

/// Retry backoff shape of the `[queue]` section.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Backoff {
    #[default]
    Fixed,
    Exponential,
}

impl fmt::Display for Backoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed => write!(f, "fixed"),
            Self::Exponential => write!(f, "exponential"),
        }
    }
}

impl FromStr for Backoff {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fixed" => Ok(Self::Fixed),
            "exponential" => Ok(Self::Exponential),
            other => Err(format!("unknown backoff '{}'", other)),
        }
    }
}

/// `[queue]` section.
#[derive(Clone, Debug, PartialEq)]
pub struct QueueConfig {
    pub max_attempts: u32,
    /// Fixed delay, or the initial delay of exponential backoff.
    pub retry_delay: Duration,
    pub backoff: Backoff,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: Duration::ZERO,
            backoff: Backoff::Fixed,
        }
    }
}

impl QueueConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        match self.backoff {
            Backoff::Fixed => RetryPolicy::fixed(self.max_attempts, self.retry_delay),
            Backoff::Exponential => match RetryPolicy::exponential(self.max_attempts) {
                RetryPolicy::ExponentialBackoff {
                    max_attempts,
                    max_delay,
                    multiplier,
                    ..
                } if !self.retry_delay.is_zero() => RetryPolicy::ExponentialBackoff {
                    max_attempts,
                    initial_delay: self.retry_delay,
                    max_delay,
                    multiplier,
                },
                policy => policy,
            },
        }
    }

    pub fn local_queue_config(&self) -> LocalQueueConfig {
        LocalQueueConfig::default().with_retry_policy(self.retry_policy())
    }
}

/// `[flow]` section.
#[derive(Clone, Debug, PartialEq)]
pub struct FlowSettings {
    pub pull_max_num: usize,
    pub pull_max_time: Duration,
    pub poll_interval: Duration,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            pull_max_num: DEFAULT_PULL_MAX_NUM,
            pull_max_time: Duration::from_millis(DEFAULT_PULL_MAX_TIME_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

impl FlowSettings {
    /// Applies the polling settings to `config`.
    pub fn apply(&self, config: ChunkedFlowConfig) -> ChunkedFlowConfig {
        config
            .with_pull_max_num(self.pull_max_num)
            .with_pull_max_time(self.pull_max_time)
            .with_poll_interval(self.poll_interval)
    }
}

// =============================================================================
// Runtime configuration
// =============================================================================

/// All runtime settings.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RuntimeConfig {
    pub logging: LoggingConfig,
    pub cache: CacheConfig,
    pub queue: QueueConfig,
    pub flow: FlowSettings,
}

fn parse<T: FromStr>(ini: &Ini, section: &str, key: &str) -> Result<Option<T>, ConfigError> {
    match ini.get_from(Some(section), key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                section: section.to_string(),
                key: key.to_string(),
                value: raw.to_string(),
            }),
    }
}

fn millis(ini: &Ini, section: &str, key: &str) -> Result<Option<Duration>, ConfigError> {
    Ok(parse::<u64>(ini, section, key)?.map(Duration::from_millis))
}

impl RuntimeConfig {
    /// `<config dir>/volflow/config.ini`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("volflow").join("config.ini"))
    }

    /// Loads `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_file(path)?;
        Self::from_ini(&ini)
    }

    /// Loads `path`, or returns defaults when it does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(level) = ini.get_from(Some("logging"), "level") {
            config.logging.level = level.trim().to_string();
        }
        if let Some(file) = ini.get_from(Some("logging"), "file") {
            let file = file.trim();
            config.logging.file = (!file.is_empty()).then(|| PathBuf::from(file));
        }

        if let Some(v) = parse(ini, "cache", "backend_cache_bytes")? {
            config.cache.backend_cache_bytes = v;
        }
        if let Some(v) = parse(ini, "cache", "handle_cache_bytes")? {
            config.cache.handle_cache_bytes = v;
        }

        if let Some(v) = parse(ini, "queue", "max_attempts")? {
            config.queue.max_attempts = v;
        }
        if let Some(v) = millis(ini, "queue", "retry_delay_ms")? {
            config.queue.retry_delay = v;
        }
        if let Some(v) = parse(ini, "queue", "backoff")? {
            config.queue.backoff = v;
        }

        if let Some(v) = parse::<NonZeroUsize>(ini, "flow", "pull_max_num")? {
            config.flow.pull_max_num = v.get();
        }
        if let Some(v) = millis(ini, "flow", "pull_max_time_ms")? {
            config.flow.pull_max_time = v;
        }
        if let Some(v) = millis(ini, "flow", "poll_interval_ms")? {
            config.flow.poll_interval = v;
        }

        Ok(config)
    }

    pub fn to_ini(&self) -> Ini {
        let mut ini = Ini::new();
        ini.with_section(Some("logging"))
            .set("level", self.logging.level.as_str());
        if let Some(file) = &self.logging.file {
            ini.with_section(Some("logging"))
                .set("file", file.display().to_string());
        }
        ini.with_section(Some("cache"))
            .set("backend_cache_bytes", self.cache.backend_cache_bytes.to_string())
            .set("handle_cache_bytes", self.cache.handle_cache_bytes.to_string());
        ini.with_section(Some("queue"))
            .set("max_attempts", self.queue.max_attempts.to_string())
            .set("retry_delay_ms", self.queue.retry_delay.as_millis().to_string())
            .set("backoff", self.queue.backoff.to_string());
        ini.with_section(Some("flow"))
            .set("pull_max_num", self.flow.pull_max_num.to_string())
            .set("pull_max_time_ms", self.flow.pull_max_time.as_millis().to_string())
            .set("poll_interval_ms", self.flow.poll_interval.as_millis().to_string());
        ini
    }

    /// Writes the configuration to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let temp_path = path.with_extension("tmp");
        self.to_ini().write_to_file(&temp_path).map_err(io_err)?;
        std::fs::rename(&temp_path, path).map_err(io_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::IntVec3D;
    use tempfile::TempDir;

    #[test]
    fn test_missing_keys_use_defaults() {
        let ini = Ini::load_from_str("[queue]\nmax_attempts = 3\n").unwrap();
        let config = RuntimeConfig::from_ini(&ini).unwrap();
        assert_eq!(config.queue.max_attempts, 3);
        assert_eq!(config.cache, CacheConfig::default());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_invalid_value_rejected() {
        let ini = Ini::load_from_str("[flow]\npull_max_num = lots\n").unwrap();
        let err = RuntimeConfig::from_ini(&ini).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref section, ref key, ref value }
                if section == "flow" && key == "pull_max_num" && value == "lots"
        ));
    }

    #[test]
    fn test_zero_pull_max_num_rejected() {
        let ini = Ini::load_from_str("[flow]\npull_max_num = 0\n").unwrap();
        assert!(matches!(
            RuntimeConfig::from_ini(&ini),
            Err(ConfigError::InvalidValue { ref key, ref value, .. })
                if key == "pull_max_num" && value == "0"
        ));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.ini");
        let mut config = RuntimeConfig::default();
        config.logging = LoggingConfig::default().with_level("debug").with_file("/tmp/v.log");
        config.queue.backoff = Backoff::Exponential;
        config.flow.pull_max_time = Duration::from_millis(750);
        config.save(&path).unwrap();

        assert_eq!(RuntimeConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = TempDir::new().unwrap();
        let config = RuntimeConfig::load_or_default(&dir.path().join("absent.ini")).unwrap();
        assert_eq!(config, RuntimeConfig::default());
    }

    #[test]
    fn test_queue_policy() {
        let queue = QueueConfig {
            max_attempts: 4,
            retry_delay: Duration::from_millis(20),
            backoff: Backoff::Exponential,
        };
        let policy = queue.retry_policy();
        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_millis(40)));
        assert_eq!(
            QueueConfig::default().local_queue_config().retry_policy,
            RetryPolicy::fixed(10, Duration::ZERO)
        );
    }

    #[test]
    fn test_flow_settings_apply() {
        let settings = FlowSettings {
            pull_max_num: 7,
            ..FlowSettings::default()
        };
        let flow = settings.apply(ChunkedFlowConfig::new(IntVec3D::splat(8)));
        assert_eq!(flow.pull_max_num, 7);
    }

    #[test]
    fn test_array_store_spec_carries_budget() {
        let spec = CacheConfig::default()
            .with_handle_cache_bytes(1024)
            .array_store_spec("/data/a");
        assert_eq!(spec.params["handle_cache_bytes"], 1024);
    }
}
