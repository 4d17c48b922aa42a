use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level application configuration: the HTTP/logging ambient stack plus
/// the job engine's tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            engine: EngineConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, crate::Error> {
        use crate::Error;

        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from environment variables, falling back to the
    /// first of a few default file locations, or a plain default otherwise.
    pub fn from_env() -> Result<Self, crate::Error> {
        if let Ok(config_path) = std::env::var("FILESTAGE_CONFIG") {
            return Self::load(&config_path);
        }

        let default_paths = [
            "./config/default.toml",
            "./config/production.toml",
            "/etc/filestage/config.toml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::load(path);
            }
        }

        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<(), crate::Error> {
        use crate::Error;

        if self.server.port == 0 {
            return Err(Error::Config("Invalid server port".to_string()));
        }

        self.engine.validate()?;

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_graceful_shutdown")]
    pub graceful_shutdown_timeout_secs: u64,

    #[serde(default)]
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            graceful_shutdown_timeout_secs: default_graceful_shutdown(),
            cors: CorsConfig::default(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_graceful_shutdown() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_origins: vec!["*".to_string()],
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Json
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Json,
    Text,
}

/// Job engine tuning knobs, per spec §6's configuration table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_per_attempt_timeout_secs")]
    pub per_attempt_timeout_secs: u64,

    #[serde(default = "default_delay_min_secs")]
    pub delay_min_secs: u64,

    #[serde(default = "default_delay_max_secs")]
    pub delay_max_secs: u64,

    #[serde(default = "default_progress_tick_interval_ms")]
    pub progress_tick_interval_ms: u64,

    #[serde(default = "default_job_ttl_secs")]
    pub job_ttl_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    #[serde(default = "default_artifact_url_ttl_secs")]
    pub artifact_url_ttl_secs: u64,

    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: f64,

    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: f64,

    #[serde(default = "default_next_poll_in_ms")]
    pub next_poll_in_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_concurrency: default_worker_concurrency(),
            queue_capacity: default_queue_capacity(),
            max_attempts: default_max_attempts(),
            per_attempt_timeout_secs: default_per_attempt_timeout_secs(),
            delay_min_secs: default_delay_min_secs(),
            delay_max_secs: default_delay_max_secs(),
            progress_tick_interval_ms: default_progress_tick_interval_ms(),
            job_ttl_secs: default_job_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            artifact_url_ttl_secs: default_artifact_url_ttl_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            backoff_base_secs: default_backoff_base_secs(),
            backoff_max_secs: default_backoff_max_secs(),
            next_poll_in_ms: default_next_poll_in_ms(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        use crate::Error;

        if self.worker_concurrency == 0 {
            return Err(Error::Config("workerConcurrency must be > 0".into()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Config("queueCapacity must be > 0".into()));
        }
        if self.max_attempts == 0 {
            return Err(Error::Config("maxAttempts must be > 0".into()));
        }
        if self.delay_min_secs > self.delay_max_secs {
            return Err(Error::Config("delayMin must be <= delayMax".into()));
        }
        Ok(())
    }

    pub fn per_attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.per_attempt_timeout_secs)
    }

    pub fn delay_range(&self) -> (Duration, Duration) {
        (
            Duration::from_secs(self.delay_min_secs),
            Duration::from_secs(self.delay_max_secs),
        )
    }

    pub fn progress_tick_interval(&self) -> Duration {
        Duration::from_millis(self.progress_tick_interval_ms)
    }

    pub fn job_ttl(&self) -> Duration {
        Duration::from_secs(self.job_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn artifact_url_ttl(&self) -> Duration {
        Duration::from_secs(self.artifact_url_ttl_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_secs_f64(self.backoff_base_secs)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs_f64(self.backoff_max_secs)
    }

    /// A configuration tuned for tests: short delays, fast sweeps, no
    /// network-scale timeouts. Mirrors the teacher's `JobConfig::development()`
    /// low-latency preset pattern.
    pub fn fast_for_tests() -> Self {
        Self {
            worker_concurrency: 2,
            queue_capacity: 16,
            max_attempts: 3,
            per_attempt_timeout_secs: 5,
            delay_min_secs: 0,
            delay_max_secs: 0,
            progress_tick_interval_ms: 10,
            job_ttl_secs: 2,
            sweep_interval_secs: 1,
            artifact_url_ttl_secs: 60,
            shutdown_grace_secs: 1,
            backoff_base_secs: 0.01,
            backoff_max_secs: 0.05,
            next_poll_in_ms: 10,
        }
    }
}

fn default_worker_concurrency() -> usize {
    4
}
fn default_queue_capacity() -> usize {
    256
}
fn default_max_attempts() -> u32 {
    3
}
fn default_per_attempt_timeout_secs() -> u64 {
    180
}
fn default_delay_min_secs() -> u64 {
    10
}
fn default_delay_max_secs() -> u64 {
    120
}
fn default_progress_tick_interval_ms() -> u64 {
    500
}
fn default_job_ttl_secs() -> u64 {
    3600
}
fn default_sweep_interval_secs() -> u64 {
    30
}
fn default_artifact_url_ttl_secs() -> u64 {
    900
}
fn default_shutdown_grace_secs() -> u64 {
    10
}
fn default_backoff_base_secs() -> f64 {
    1.0
}
fn default_backoff_max_secs() -> f64 {
    30.0
}
fn default_next_poll_in_ms() -> u64 {
    2000
}

/// Selects and configures the object storage backend used by the artifact
/// stager (C6). Defaults to the local, credential-free backend so the
/// service runs out of the box.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_backend")]
    pub backend: StorageBackend,

    #[serde(default)]
    pub s3: Option<S3StorageConfig>,

    #[serde(default = "default_local_dir")]
    pub local_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            s3: None,
            local_dir: default_local_dir(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Local,
    S3,
}

fn default_storage_backend() -> StorageBackend {
    StorageBackend::Local
}

fn default_local_dir() -> String {
    "./data/artifacts".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3StorageConfig {
    pub bucket: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.engine.worker_concurrency, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_zero_port() {
        let mut config = Config::default();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_inverted_delay_range() {
        let mut config = Config::default();
        config.engine.delay_min_secs = 200;
        config.engine.delay_max_secs = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn fast_for_tests_has_zero_delay() {
        let config = EngineConfig::fast_for_tests();
        assert_eq!(config.delay_range(), (Duration::ZERO, Duration::ZERO));
    }
}
