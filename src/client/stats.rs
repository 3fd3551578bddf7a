//! Stats, support-resource, and health endpoints.
//!
//! These are dashboard reads, so the failure policy differs from analysis:
//! no retries, no rate limiting, and no errors surfaced to the caller.
//! When the backend is unreachable the client serves stale cache entries
//! first and hardcoded offline payloads last.

use std::time::Instant;

use chrono::Utc;
use reqwest::Method;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::ResponseCache;
use crate::client::{build_http_client, execute};
use crate::config::ClientConfig;
use crate::error::{ApiError, ConfigError};
use crate::models::{
    DailyStats, HealthReport, HealthStatus, LanguageInfo, LanguagesPayload, ResourcesPayload,
    SessionContext, StatsPayload, SupportResource,
};

const STATS_PATH: &str = "/stats";
const HEALTH_PATH: &str = "/health";
const LANGUAGES_PATH: &str = "/languages/supported";

const STATS_KEY: &str = "stats";
const LANGUAGES_KEY: &str = "languages";

/// Client for `GET /stats`, `GET /health`, `GET /resources/{country}`,
/// and `GET /languages/supported`.
pub struct StatsClient {
    config: ClientConfig,
    http: reqwest::Client,
    session: SessionContext,
    stats_cache: ResponseCache<StatsPayload>,
    resources_cache: ResponseCache<Vec<SupportResource>>,
    languages_cache: ResponseCache<Vec<LanguageInfo>>,
}

impl StatsClient {
    pub fn new(config: ClientConfig) -> Result<Self, ConfigError> {
        Self::with_session(config, SessionContext::new())
    }

    pub fn with_session(
        config: ClientConfig,
        session: SessionContext,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let http = build_http_client(&config)?;
        Ok(Self {
            config,
            http,
            session,
            stats_cache: ResponseCache::new(),
            resources_cache: ResponseCache::new(),
            languages_cache: ResponseCache::new(),
        })
    }

    /// Fetch aggregate usage statistics.
    ///
    /// `force_refresh` bypasses the live cache but still falls back to a
    /// stale entry when the backend is unreachable. When no cached data
    /// exists at all, a hardcoded payload marked `fallback: true` is
    /// returned instead of an error.
    pub async fn get_stats(&self, force_refresh: bool) -> StatsPayload {
        if !force_refresh {
            if let Some(hit) = self.stats_cache.get(STATS_KEY) {
                debug!("stats cache hit");
                return hit;
            }
        }

        match self.get_json::<StatsPayload>(STATS_PATH).await {
            Ok(payload) => {
                self.stats_cache
                    .set(STATS_KEY, payload.clone(), self.config.stats_cache_ttl());
                payload
            }
            Err(err) => {
                warn!(%err, "stats request failed");
                if let Some(stale) = self.stats_cache.get_stale(STATS_KEY) {
                    debug!("serving stale stats");
                    return stale;
                }
                fallback_stats()
            }
        }
    }

    /// Fetch support resources for a country code (e.g. "ng", "ke").
    /// Unreachable backends degrade to a built-in resource list.
    pub async fn get_resources(&self, country: &str) -> Vec<SupportResource> {
        let country = country.trim().to_lowercase();
        let cache_key = format!("resources:{country}");
        if let Some(hit) = self.resources_cache.get(&cache_key) {
            return hit;
        }

        let path = format!("/resources/{country}");
        match self.get_json::<ResourcesPayload>(&path).await {
            Ok(payload) => {
                self.resources_cache.set(
                    &cache_key,
                    payload.resources.clone(),
                    self.config.resources_cache_ttl(),
                );
                payload.resources
            }
            Err(err) => {
                warn!(%err, country, "resources request failed");
                if let Some(stale) = self.resources_cache.get_stale(&cache_key) {
                    return stale;
                }
                default_resources(&country)
            }
        }
    }

    /// Fetch the list of supported analysis languages.
    pub async fn get_supported_languages(&self) -> Vec<LanguageInfo> {
        if let Some(hit) = self.languages_cache.get(LANGUAGES_KEY) {
            return hit;
        }

        match self.get_json::<LanguagesPayload>(LANGUAGES_PATH).await {
            Ok(payload) => {
                self.languages_cache.set(
                    LANGUAGES_KEY,
                    payload.languages.clone(),
                    self.config.languages_cache_ttl(),
                );
                payload.languages
            }
            Err(err) => {
                warn!(%err, "languages request failed");
                if let Some(stale) = self.languages_cache.get_stale(LANGUAGES_KEY) {
                    return stale;
                }
                default_languages()
            }
        }
    }

    /// Probe backend health. Never fails: transport errors are reported as
    /// [`HealthStatus::Offline`], non-2xx answers as
    /// [`HealthStatus::Unhealthy`].
    pub async fn health_check(&self) -> HealthReport {
        let started = Instant::now();
        let outcome = execute(&self.config, self.request(Method::GET, HEALTH_PATH)).await;
        let round_trip_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(response) => {
                let body = response
                    .json::<serde_json::Value>()
                    .await
                    .unwrap_or(serde_json::Value::Null);
                let version = body
                    .get("version")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string());
                HealthReport {
                    status: HealthStatus::Healthy,
                    round_trip_ms,
                    version,
                }
            }
            Err(ApiError::Http { status, .. }) => {
                warn!(status, "health check returned an error status");
                HealthReport {
                    status: HealthStatus::Unhealthy,
                    round_trip_ms,
                    version: None,
                }
            }
            Err(err) => {
                warn!(%err, "health check could not reach the backend");
                HealthReport {
                    status: HealthStatus::Offline,
                    round_trip_ms,
                    version: None,
                }
            }
        }
    }

    pub fn clear_caches(&self) {
        self.stats_cache.clear();
        self.resources_cache.clear();
        self.languages_cache.clear();
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = execute(&self.config, self.request(Method::GET, path)).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Network(format!("malformed response body: {e}")))
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);
        self.http
            .request(method, url)
            .header("X-Client-Version", &self.config.client_version)
            .header("X-Request-Id", Uuid::new_v4().to_string())
            .header("X-Session-Id", &self.session.session_id)
    }
}

/// Hardcoded stats payload served when the backend is down and no cached
/// data exists. Figures are representative, not live.
fn fallback_stats() -> StatsPayload {
    let today = Utc::now().format("%Y-%m-%d").to_string();
    let mut daily_stats = std::collections::HashMap::new();
    daily_stats.insert(
        today,
        DailyStats {
            total_analyses: 340,
            toxic_analyses: 27,
            platforms: [
                ("twitter".to_string(), 150u64),
                ("facebook".to_string(), 90),
                ("instagram".to_string(), 60),
                ("whatsapp".to_string(), 40),
            ]
            .into_iter()
            .collect(),
        },
    );
    StatsPayload {
        total_requests: 15_420,
        toxic_requests: 1_234,
        toxicity_rate: 0.08,
        platform_count: 4,
        uptime_seconds: 0,
        average_response_time: 45.0,
        daily_stats,
        timestamp: Utc::now().timestamp() as f64,
        fallback: true,
    }
}

/// Built-in support resources by country, served when the backend is down.
fn default_resources(country: &str) -> Vec<SupportResource> {
    let entries: &[(&str, &str, &[&str], &str)] = match country {
        "ng" | "nigeria" => &[
            (
                "Mentally Aware Nigeria Initiative",
                "+234 818 599 1111",
                &["counselling", "crisis support"],
                "24/7",
            ),
            (
                "Lagos Lifeline",
                "0800 012 3456",
                &["suicide prevention"],
                "24/7",
            ),
        ],
        "ke" | "kenya" => &[(
            "Befrienders Kenya",
            "+254 722 178 177",
            &["emotional support", "crisis support"],
            "Mon-Fri 9am-5pm",
        )],
        "za" | "south_africa" => &[(
            "SADAG Mental Health Line",
            "0800 567 567",
            &["counselling", "crisis support"],
            "24/7",
        )],
        "gh" | "ghana" => &[(
            "Mental Health Authority Helpline",
            "+233 244 846 701",
            &["counselling"],
            "Mon-Fri 8am-5pm",
        )],
        _ => &[(
            "Befrienders Worldwide",
            "see befrienders.org",
            &["emotional support"],
            "varies by centre",
        )],
    };
    entries
        .iter()
        .map(|(name, phone, services, availability)| SupportResource {
            name: name.to_string(),
            phone: phone.to_string(),
            services: services.iter().map(|s| s.to_string()).collect(),
            availability: availability.to_string(),
        })
        .collect()
}

/// Built-in supported-language list, served when the backend is down.
fn default_languages() -> Vec<LanguageInfo> {
    [
        ("en", "English", "English"),
        ("fr", "French", "Français"),
        ("sw", "Swahili", "Kiswahili"),
        ("ha", "Hausa", "Hausa"),
        ("yo", "Yoruba", "Yorùbá"),
        ("ig", "Igbo", "Igbo"),
        ("am", "Amharic", "አማርኛ"),
        ("zu", "Zulu", "isiZulu"),
        ("pcm", "Nigerian Pidgin", "Naija"),
    ]
    .into_iter()
    .map(|(code, name, native)| LanguageInfo {
        code: code.to_string(),
        name: name.to_string(),
        native_name: Some(native.to_string()),
    })
    .collect()
}
