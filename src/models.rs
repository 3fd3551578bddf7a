//! Request and response types for the analysis API.
//!
//! Response deserialization is deliberately lenient: backends in the wild
//! return out-of-range scores, string-typed numbers, and null arrays. The
//! contract favors always producing a usable result object, so malformed
//! fields are coerced to documented defaults instead of failing the call.

use std::collections::{BTreeMap, HashMap};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::config::WarningBands;

/// Default confidence when the backend omits or mangles the field.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Version tag attached to locally produced fallback results.
pub const HEURISTIC_VERSION: &str = "heuristic-1";

/// Body of `POST /analyze`.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRequest {
    pub text: String,
    pub platform: String,
    pub language: String,
    /// Free-form request metadata (e.g. region hints). Ordered so that the
    /// serialized body, and with it the request fingerprint, is
    /// deterministic for identical logical requests.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
}

/// Per-call options for analysis requests.
#[derive(Debug, Clone)]
pub struct AnalysisOptions {
    pub language: String,
    pub context: BTreeMap<String, String>,
    /// Bypass a live cache entry and hit the backend; the fresh result is
    /// cached as usual.
    pub force_refresh: bool,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            language: "auto".to_string(),
            context: BTreeMap::new(),
            force_refresh: false,
        }
    }
}

/// Body of `POST /analyze/batch`.
#[derive(Debug, Clone, Serialize)]
pub struct BatchRequest {
    pub texts: Vec<String>,
    pub platform: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
}

/// Payload of `POST /analyze/batch`: one result per submitted text, in
/// submission order.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchResponse {
    #[serde(default)]
    pub results: Vec<AnalysisResult>,
}

/// Coarse severity bucket derived from the toxicity score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningLevel {
    #[default]
    None,
    Low,
    Medium,
    High,
}

impl WarningLevel {
    /// Map a score to its band. Monotonic in the score.
    pub fn from_score(score: f64, bands: &WarningBands) -> Self {
        if score >= bands.high {
            WarningLevel::High
        } else if score >= bands.medium {
            WarningLevel::Medium
        } else if score >= bands.low {
            WarningLevel::Low
        } else {
            WarningLevel::None
        }
    }
}

/// Regional/cultural signals detected during analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CulturalContext {
    #[serde(default)]
    pub detected: bool,
    #[serde(default, deserialize_with = "lenient_string_vec")]
    pub regions: Vec<String>,
    #[serde(default)]
    pub language: Option<String>,
}

/// Outcome of a toxicity analysis, remote or local.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    #[serde(default, deserialize_with = "lenient_score")]
    pub toxicity_score: f64,
    #[serde(default)]
    pub is_toxic: bool,
    #[serde(default = "default_confidence", deserialize_with = "lenient_confidence")]
    pub confidence: f64,
    #[serde(default, deserialize_with = "lenient_field")]
    pub warning_level: WarningLevel,
    #[serde(default, deserialize_with = "lenient_string_vec")]
    pub categories: Vec<String>,
    #[serde(default, deserialize_with = "lenient_string_vec")]
    pub detected_issues: Vec<String>,
    /// Backend-reported (or locally measured) processing time in ms.
    #[serde(default)]
    pub processing_time: f64,
    #[serde(default, deserialize_with = "lenient_field")]
    pub cultural_context: CulturalContext,
    /// True when this result came from the local heuristic analyzer.
    #[serde(default)]
    pub fallback: bool,
    #[serde(default)]
    pub fallback_reason: Option<String>,
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_confidence() -> f64 {
    DEFAULT_CONFIDENCE
}

fn default_version() -> String {
    "unknown".to_string()
}

impl AnalysisResult {
    /// Enforce the result invariants after deserialization:
    /// scores clamped into [0, 1], `is_toxic` recomputed from the threshold,
    /// `warning_level` recomputed from the bands, and the "safe" tag kept
    /// out of `detected_issues`.
    pub fn normalize(&mut self, threshold: f64, bands: &WarningBands) {
        self.toxicity_score = self.toxicity_score.clamp(0.0, 1.0);
        self.confidence = self.confidence.clamp(0.0, 1.0);
        if !self.processing_time.is_finite() || self.processing_time < 0.0 {
            self.processing_time = 0.0;
        }

        self.is_toxic = self.toxicity_score > threshold;
        self.warning_level = WarningLevel::from_score(self.toxicity_score, bands);

        self.categories.retain(|c| !c.is_empty());
        self.detected_issues.retain(|c| !c.is_empty() && c != "safe");
        if self.detected_issues.is_empty() {
            self.detected_issues = self
                .categories
                .iter()
                .filter(|c| c.as_str() != "safe")
                .cloned()
                .collect();
        }
        if self.categories.is_empty() {
            if self.detected_issues.is_empty() {
                self.categories.push("safe".to_string());
            } else {
                self.categories = self.detected_issues.clone();
            }
        }
    }
}

/// Per-day analysis counters inside a stats payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DailyStats {
    #[serde(default)]
    pub total_analyses: u64,
    #[serde(default)]
    pub toxic_analyses: u64,
    #[serde(default)]
    pub platforms: HashMap<String, u64>,
}

/// Payload of `GET /stats`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsPayload {
    #[serde(default)]
    pub total_requests: u64,
    #[serde(default)]
    pub toxic_requests: u64,
    #[serde(default, deserialize_with = "lenient_score")]
    pub toxicity_rate: f64,
    #[serde(default)]
    pub platform_count: u32,
    #[serde(default)]
    pub uptime_seconds: u64,
    #[serde(default)]
    pub average_response_time: f64,
    #[serde(default)]
    pub daily_stats: HashMap<String, DailyStats>,
    #[serde(default)]
    pub timestamp: f64,
    /// True when this payload is the hardcoded offline fallback.
    #[serde(default)]
    pub fallback: bool,
}

/// One support resource from `GET /resources/{country}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportResource {
    pub name: String,
    pub phone: String,
    #[serde(default, deserialize_with = "lenient_string_vec")]
    pub services: Vec<String>,
    #[serde(default)]
    pub availability: String,
}

/// Payload of `GET /resources/{country}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourcesPayload {
    #[serde(default)]
    pub resources: Vec<SupportResource>,
}

/// One entry of `GET /languages/supported`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageInfo {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub native_name: Option<String>,
}

/// Payload of `GET /languages/supported`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LanguagesPayload {
    #[serde(default)]
    pub languages: Vec<LanguageInfo>,
}

/// Backend reachability as measured by a health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Offline,
}

/// Result of a health check. Never an error: an unreachable backend is
/// reported as `Offline`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    /// Measured round-trip time in milliseconds.
    pub round_trip_ms: u64,
    #[serde(default)]
    pub version: Option<String>,
}

/// Progress notification for batch analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress {
    pub processed: usize,
    pub total: usize,
    pub percentage: u32,
}

impl BatchProgress {
    pub fn new(processed: usize, total: usize) -> Self {
        let percentage = if total == 0 {
            100
        } else {
            ((processed as f64 / total as f64) * 100.0).round() as u32
        };
        Self {
            processed,
            total,
            percentage,
        }
    }
}

/// Explicit per-client session identity, attached to outgoing requests
/// instead of living in process-wide state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl SessionContext {
    /// Fresh anonymous session.
    pub fn new() -> Self {
        Self {
            session_id: format!("session-{}", Uuid::new_v4()),
            user_id: None,
        }
    }

    pub fn with_user_id(mut self, user_id: &str) -> Self {
        self.user_id = Some(user_id.to_string());
        self
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Deserialize a score-like field, clamping numerics into [0, 1] and
/// treating anything non-numeric as 0.
fn lenient_score<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value.as_f64().map(|f| f.clamp(0.0, 1.0)).unwrap_or(0.0))
}

/// Like [`lenient_score`] but defaulting to [`DEFAULT_CONFIDENCE`].
fn lenient_confidence<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value
        .as_f64()
        .map(|f| f.clamp(0.0, 1.0))
        .unwrap_or(DEFAULT_CONFIDENCE))
}

/// Deserialize a string array, mapping null/mis-typed values to empty.
fn lenient_string_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::Array(items) => Ok(items
            .into_iter()
            .filter_map(|v| v.as_str().map(|s| s.to_string()))
            .collect()),
        serde_json::Value::String(s) => Ok(vec![s]),
        _ => Ok(Vec::new()),
    }
}

/// Deserialize any `Default + Deserialize` field, falling back to the
/// default when the backend sends an unexpected shape.
fn lenient_field<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}
