use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Viewer client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub stream: StreamConfig,
    pub playback: PlaybackConfig,
    pub transport: TransportConfig,
    pub ledger: LedgerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the broadcast server, e.g. `https://broadcast.example.com`
    pub base_url: String,
    /// Poll cadence for the current-session snapshot
    pub poll_interval_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            poll_interval_secs: 5,
            request_timeout_secs: 10,
        }
    }
}

impl ApiConfig {
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Base URL stream keys resolve under: `{base_url}/{stream_key}.m3u8`
    pub base_url: String,
    /// Upgrade `http://` stream locators to `https://`
    pub force_https: bool,
    pub probe_max_attempts: u32,
    pub probe_interval_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://live.example.com/live".to_string(),
            force_https: true,
            probe_max_attempts: 20,
            probe_interval_ms: 2000,
        }
    }
}

impl StreamConfig {
    #[must_use]
    pub const fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }
}

/// Tuning for the library-mediated playback engine.
///
/// The native strategy ignores these; the host element manages its own
/// buffers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_buffer_bytes: u64,
    pub max_buffer_secs: u64,
    /// Segments behind the live edge to start loading from
    pub live_sync_segment_count: usize,
    /// Fall more than this many segments behind and the engine jumps forward
    pub live_max_latency_segment_count: usize,
    pub low_latency: bool,
    pub start_prefetch: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_buffer_bytes: 10 * 1000 * 1000,
            max_buffer_secs: 10,
            live_sync_segment_count: 2,
            live_max_latency_segment_count: 4,
            low_latency: true,
            start_prefetch: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub engine: EngineConfig,
    /// `unbounded` (production) or `bounded`
    pub restart_policy: String,
    /// Only read when `restart_policy = "bounded"`
    pub max_restarts: u32,
    pub restart_delay_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            restart_policy: "unbounded".to_string(),
            max_restarts: 5,
            restart_delay_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Push channel address, e.g. `localhost:9000`
    pub addr: String,
    pub connect_timeout_secs: u64,
    pub reconnect_max_attempts: u32,
    pub reconnect_delay_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            addr: "localhost:9000".to_string(),
            connect_timeout_secs: 10,
            reconnect_max_attempts: 10,
            reconnect_delay_ms: 1000,
        }
    }
}

impl TransportConfig {
    #[must_use]
    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Path of the answered-quiz ledger file
    pub path: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: "answered_quizzes.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `pretty` (development) or `json` (production)
    pub format: String,
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // Override with environment variables (QUIZCAST_API_BASE_URL, etc.)
        builder = builder.add_source(
            Environment::with_prefix("QUIZCAST")
                .separator("_")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Validate configuration, collecting every problem found
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if url::Url::parse(&self.api.base_url).is_err() {
            errors.push(format!("api.base_url is not a valid URL: {}", self.api.base_url));
        }
        if url::Url::parse(&self.stream.base_url).is_err() {
            errors.push(format!(
                "stream.base_url is not a valid URL: {}",
                self.stream.base_url
            ));
        }
        if self.api.poll_interval_secs == 0 {
            errors.push("api.poll_interval_secs must be at least 1".to_string());
        }
        if self.stream.probe_max_attempts == 0 {
            errors.push("stream.probe_max_attempts must be at least 1".to_string());
        }
        match self.playback.restart_policy.as_str() {
            "unbounded" | "bounded" => {}
            other => errors.push(format!(
                "playback.restart_policy must be \"unbounded\" or \"bounded\", got {other:?}"
            )),
        }
        match self.logging.format.as_str() {
            "pretty" | "json" => {}
            other => errors.push(format!(
                "logging.format must be \"pretty\" or \"json\", got {other:?}"
            )),
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.api.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.stream.probe_max_attempts, 20);
        assert_eq!(config.stream.probe_interval(), Duration::from_millis(2000));
        assert_eq!(config.transport.reconnect_max_attempts, 10);
    }

    #[test]
    fn test_validate_rejects_bad_policy() {
        let mut config = Config::default();
        config.playback.restart_policy = "sometimes".to_string();
        let errors = config.validate().expect_err("must reject");
        assert!(errors.iter().any(|e| e.contains("restart_policy")));
    }

    #[test]
    fn test_validate_rejects_bad_urls() {
        let mut config = Config::default();
        config.api.base_url = "not a url".to_string();
        config.stream.base_url = String::new();
        let errors = config.validate().expect_err("must reject");
        assert_eq!(errors.len(), 2);
    }
}
