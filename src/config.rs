//! Client configuration.
//!
//! A [`ClientConfig`] is built once at startup from defaults plus
//! `MODGUARD_*` environment overrides, validated at construction, and never
//! mutated afterwards. Also deserializable from TOML/JSON config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;

/// Warning-level band edges over the toxicity score.
///
/// The 0.7/0.5/0.3 banding is the canonical default; deployments may
/// tighten or loosen the edges.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WarningBands {
    #[serde(default = "default_band_high")]
    pub high: f64,
    #[serde(default = "default_band_medium")]
    pub medium: f64,
    #[serde(default = "default_band_low")]
    pub low: f64,
}

fn default_band_high() -> f64 {
    0.7
}
fn default_band_medium() -> f64 {
    0.5
}
fn default_band_low() -> f64 {
    0.3
}

impl Default for WarningBands {
    fn default() -> Self {
        Self {
            high: default_band_high(),
            medium: default_band_medium(),
            low: default_band_low(),
        }
    }
}

/// Configuration for the analysis and stats clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the analysis API.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-attempt request deadline in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Total network attempts before falling back to the local analyzer.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Base delay for exponential backoff between attempts, in milliseconds.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Cap on the backoff delay, in milliseconds.
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Whether analysis responses are cached at all.
    #[serde(default = "default_true")]
    pub use_cache: bool,
    /// TTL for cached analysis results, in seconds.
    #[serde(default = "default_analysis_ttl_secs")]
    pub analysis_cache_ttl_secs: u64,
    /// TTL for cached stats payloads, in seconds.
    #[serde(default = "default_stats_ttl_secs")]
    pub stats_cache_ttl_secs: u64,
    /// TTL for cached support-resource payloads, in seconds.
    #[serde(default = "default_resources_ttl_secs")]
    pub resources_cache_ttl_secs: u64,
    /// TTL for the supported-languages payload, in seconds.
    #[serde(default = "default_languages_ttl_secs")]
    pub languages_cache_ttl_secs: u64,
    /// Maximum requests per rate-limit window.
    #[serde(default = "default_rate_limit_max")]
    pub rate_limit_max_requests: u32,
    /// Rate-limit window length in milliseconds.
    #[serde(default = "default_rate_limit_window_ms")]
    pub rate_limit_window_ms: u64,
    /// Toxicity score above which a text is flagged toxic.
    #[serde(default = "default_detection_threshold")]
    pub detection_threshold: f64,
    /// Warning-level band edges.
    #[serde(default)]
    pub warning_bands: WarningBands,
    /// Minimum text length (after trimming) accepted for analysis.
    #[serde(default = "default_min_text_length")]
    pub min_text_length: usize,
    /// Maximum text length accepted for analysis.
    #[serde(default = "default_max_text_length")]
    pub max_text_length: usize,
    /// Hard cap on the number of texts in one batch call.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Chunk size used when submitting batches to the backend.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Concurrency used for per-item degradation when a batch call fails.
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,
    /// Pause between batch chunks, in milliseconds.
    #[serde(default = "default_batch_pause_ms")]
    pub batch_pause_ms: u64,
    /// Value sent in the X-Client-Version header.
    #[serde(default = "default_client_version")]
    pub client_version: String,
    /// User agent for HTTP requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}
fn default_timeout_ms() -> u64 {
    10_000
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    500
}
fn default_retry_max_delay_ms() -> u64 {
    8_000
}
fn default_true() -> bool {
    true
}
fn default_analysis_ttl_secs() -> u64 {
    300
}
fn default_stats_ttl_secs() -> u64 {
    60
}
fn default_resources_ttl_secs() -> u64 {
    3_600
}
fn default_languages_ttl_secs() -> u64 {
    86_400
}
fn default_rate_limit_max() -> u32 {
    10
}
fn default_rate_limit_window_ms() -> u64 {
    60_000
}
fn default_detection_threshold() -> f64 {
    0.7
}
fn default_min_text_length() -> usize {
    2
}
fn default_max_text_length() -> usize {
    1_000
}
fn default_max_batch_size() -> usize {
    50
}
fn default_batch_size() -> usize {
    5
}
fn default_batch_concurrency() -> usize {
    2
}
fn default_batch_pause_ms() -> u64 {
    200
}
fn default_client_version() -> String {
    "2.0.0".to_string()
}
fn default_user_agent() -> String {
    format!("modguard/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_ms: default_timeout_ms(),
            retry_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            use_cache: default_true(),
            analysis_cache_ttl_secs: default_analysis_ttl_secs(),
            stats_cache_ttl_secs: default_stats_ttl_secs(),
            resources_cache_ttl_secs: default_resources_ttl_secs(),
            languages_cache_ttl_secs: default_languages_ttl_secs(),
            rate_limit_max_requests: default_rate_limit_max(),
            rate_limit_window_ms: default_rate_limit_window_ms(),
            detection_threshold: default_detection_threshold(),
            warning_bands: WarningBands::default(),
            min_text_length: default_min_text_length(),
            max_text_length: default_max_text_length(),
            max_batch_size: default_max_batch_size(),
            batch_size: default_batch_size(),
            batch_concurrency: default_batch_concurrency(),
            batch_pause_ms: default_batch_pause_ms(),
            client_version: default_client_version(),
            user_agent: default_user_agent(),
        }
    }
}

impl ClientConfig {
    /// Defaults with environment overrides applied.
    ///
    /// Recognized variables: `MODGUARD_API_URL`, `MODGUARD_TIMEOUT_MS`,
    /// `MODGUARD_RETRY_ATTEMPTS`, `MODGUARD_DETECTION_THRESHOLD`,
    /// `MODGUARD_RATE_LIMIT_MAX`, `MODGUARD_RATE_LIMIT_WINDOW_MS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(url) = env_var("MODGUARD_API_URL") {
            config.base_url = url;
        }
        if let Some(v) = env_var("MODGUARD_TIMEOUT_MS").and_then(|s| s.parse().ok()) {
            config.timeout_ms = v;
        }
        if let Some(v) = env_var("MODGUARD_RETRY_ATTEMPTS").and_then(|s| s.parse().ok()) {
            config.retry_attempts = v;
        }
        if let Some(v) = env_var("MODGUARD_DETECTION_THRESHOLD").and_then(|s| s.parse().ok()) {
            config.detection_threshold = v;
        }
        if let Some(v) = env_var("MODGUARD_RATE_LIMIT_MAX").and_then(|s| s.parse().ok()) {
            config.rate_limit_max_requests = v;
        }
        if let Some(v) = env_var("MODGUARD_RATE_LIMIT_WINDOW_MS").and_then(|s| s.parse().ok()) {
            config.rate_limit_window_ms = v;
        }

        config
    }

    /// Override the base URL.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Validate the configuration, failing fast at construction time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Url::parse(&self.base_url).map_err(|e| ConfigError::InvalidBaseUrl {
            url: self.base_url.clone(),
            reason: e.to_string(),
        })?;

        if self.retry_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retry_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.detection_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "detection_threshold",
                reason: format!("{} is outside [0, 1]", self.detection_threshold),
            });
        }
        let bands = &self.warning_bands;
        if !(bands.low <= bands.medium && bands.medium <= bands.high) {
            return Err(ConfigError::InvalidValue {
                field: "warning_bands",
                reason: "band edges must be ordered low <= medium <= high".to_string(),
            });
        }
        if self.min_text_length == 0 || self.min_text_length > self.max_text_length {
            return Err(ConfigError::InvalidValue {
                field: "min_text_length",
                reason: "must be nonzero and not exceed max_text_length".to_string(),
            });
        }
        if self.max_batch_size == 0 || self.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "batch_size",
                reason: "batch sizes must be nonzero".to_string(),
            });
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    pub fn analysis_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.analysis_cache_ttl_secs)
    }

    pub fn stats_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.stats_cache_ttl_secs)
    }

    pub fn resources_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.resources_cache_ttl_secs)
    }

    pub fn languages_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.languages_cache_ttl_secs)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.rate_limit_window_ms)
    }

    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }

    /// Backoff delay after a failed attempt (0-based):
    /// `min(base × 2^attempt, cap)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = 1u64
            .checked_shl(attempt)
            .and_then(|factor| self.retry_base_delay_ms.checked_mul(factor))
            .unwrap_or(u64::MAX);
        Duration::from_millis(exp.min(self.retry_max_delay_ms))
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}
