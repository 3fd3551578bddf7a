//! Analysis API client.
//!
//! [`AnalysisClient`] fronts the remote toxicity API with the layers a
//! well-behaved caller needs: input validation, a TTL response cache,
//! in-flight request deduplication, a client-side rate limiter, retries
//! with exponential backoff, and a local heuristic fallback when the
//! backend stays unreachable. After validation and rate limiting succeed,
//! analysis never fails: the worst case is a degraded local result marked
//! `fallback: true`.

pub mod stats;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use futures::stream::{self, StreamExt};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{fingerprint, ResponseCache};
use crate::config::ClientConfig;
use crate::error::{ApiError, ConfigError};
use crate::heuristics::HeuristicAnalyzer;
use crate::models::{
    AnalysisOptions, AnalysisRequest, AnalysisResult, BatchProgress, BatchRequest, BatchResponse,
    SessionContext,
};
use crate::rate_limit::RateLimiter;

const ANALYZE_PATH: &str = "/analyze";
const BATCH_PATH: &str = "/analyze/batch";

/// All analysis traffic shares one quota bucket.
const RATE_KEY_ANALYZE: &str = "analyze";

/// Build the shared HTTP client from a validated configuration.
pub(crate) fn build_http_client(config: &ClientConfig) -> Result<reqwest::Client, ConfigError> {
    reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .timeout(config.timeout())
        .gzip(true)
        .brotli(true)
        .build()
        .map_err(|e| ConfigError::InvalidValue {
            field: "http_client",
            reason: e.to_string(),
        })
}

type PendingMap = HashMap<String, broadcast::Sender<AnalysisResult>>;

enum Flight {
    /// Another caller already has this exact request in flight.
    Joined(broadcast::Receiver<AnalysisResult>),
    /// This caller owns the network round trip.
    Leader(broadcast::Sender<AnalysisResult>),
}

/// Client for `POST /analyze` and `POST /analyze/batch`.
pub struct AnalysisClient {
    config: ClientConfig,
    http: reqwest::Client,
    session: SessionContext,
    analyzer: HeuristicAnalyzer,
    cache: ResponseCache<AnalysisResult>,
    limiter: RateLimiter,
    pending: Mutex<PendingMap>,
}

impl AnalysisClient {
    /// Build a client with a fresh anonymous session.
    pub fn new(config: ClientConfig) -> Result<Self, ConfigError> {
        Self::with_session(config, SessionContext::new())
    }

    /// Build a client bound to an explicit session identity.
    pub fn with_session(
        config: ClientConfig,
        session: SessionContext,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let http = build_http_client(&config)?;
        let analyzer =
            HeuristicAnalyzer::new(config.detection_threshold, config.warning_bands);
        let limiter = RateLimiter::new(
            config.rate_limit_max_requests,
            config.rate_limit_window(),
        );
        info!(base_url = %config.base_url, session = %session.session_id, "analysis client ready");
        Ok(Self {
            config,
            http,
            session,
            analyzer,
            cache: ResponseCache::new(),
            limiter,
            pending: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    /// Entries currently held in the analysis cache.
    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Requests left in the current rate-limit window.
    pub fn remaining_requests(&self) -> u32 {
        self.limiter.remaining(RATE_KEY_ANALYZE)
    }

    /// Analyze a single text with default options (auto language detection,
    /// no extra context, cache honored).
    pub async fn analyze_text(
        &self,
        text: &str,
        platform: &str,
    ) -> Result<AnalysisResult, ApiError> {
        self.analyze_text_with_options(text, platform, AnalysisOptions::default())
            .await
    }

    /// Analyze a single text with explicit per-call options.
    pub async fn analyze_text_with_options(
        &self,
        text: &str,
        platform: &str,
        options: AnalysisOptions,
    ) -> Result<AnalysisResult, ApiError> {
        let request = AnalysisRequest {
            text: text.to_string(),
            platform: platform.to_string(),
            language: options.language,
            context: options.context,
        };
        self.analyze_request(request, options.force_refresh).await
    }

    /// Analyze a single text.
    ///
    /// Flow: validate, check the cache, join any identical in-flight
    /// request, consume rate-limit quota, then POST with retries. If every
    /// network attempt fails the local heuristic analyzer produces a
    /// degraded result, so after validation and rate limiting this method
    /// only returns `Ok`.
    pub async fn analyze(&self, request: AnalysisRequest) -> Result<AnalysisResult, ApiError> {
        self.analyze_request(request, false).await
    }

    async fn analyze_request(
        &self,
        request: AnalysisRequest,
        force_refresh: bool,
    ) -> Result<AnalysisResult, ApiError> {
        self.validate_text(&request.text)?;
        let request = AnalysisRequest {
            text: request.text.trim().to_string(),
            ..request
        };

        let body = serde_json::to_string(&request)
            .map_err(|e| ApiError::InvalidInput(e.to_string()))?;
        let key = fingerprint(ANALYZE_PATH, &body);

        if self.config.use_cache && !force_refresh {
            if let Some(hit) = self.cache.get(&key) {
                debug!(platform = %request.platform, "analysis cache hit");
                return Ok(hit);
            }
        }

        // Dedup and quota decisions happen under one lock so a caller that
        // joins an existing flight never consumes quota.
        let sender = {
            let mut pending = lock_pending(&self.pending);
            if let Some(tx) = pending.get(&key) {
                Flight::Joined(tx.subscribe())
            } else if !self.limiter.is_allowed(RATE_KEY_ANALYZE) {
                return Err(ApiError::RateLimited {
                    remaining: self.limiter.remaining(RATE_KEY_ANALYZE),
                    retry_after: self.limiter.retry_after(RATE_KEY_ANALYZE),
                });
            } else {
                let (tx, _) = broadcast::channel(1);
                pending.insert(key.clone(), tx.clone());
                Flight::Leader(tx)
            }
        };

        let sender = match sender {
            Flight::Joined(mut rx) => {
                debug!("joining in-flight analysis");
                return match rx.recv().await {
                    Ok(result) => Ok(result),
                    // Leader dropped without publishing. Degrade locally
                    // rather than surface an internal error.
                    Err(_) => Ok(self.local_result(
                        &request.text,
                        &request.platform,
                        &request.language,
                        "in-flight request abandoned",
                    )),
                };
            }
            Flight::Leader(tx) => tx,
        };

        let result = match self
            .post_with_retries::<_, AnalysisResult>(ANALYZE_PATH, &request)
            .await
        {
            Ok(mut result) => {
                result.normalize(self.config.detection_threshold, &self.config.warning_bands);
                if self.config.use_cache {
                    self.cache
                        .set(&key, result.clone(), self.config.analysis_cache_ttl());
                }
                result
            }
            Err(err) => {
                warn!(%err, "all analysis attempts failed, using local heuristics");
                // Degraded results are deliberately not cached.
                self.local_result(
                    &request.text,
                    &request.platform,
                    &request.language,
                    &err.to_string(),
                )
            }
        };

        // Unregister before publishing so a late arrival starts a fresh
        // flight instead of subscribing to a finished one.
        lock_pending(&self.pending).remove(&key);
        let _ = sender.send(result.clone());
        Ok(result)
    }

    /// Analyze up to `max_batch_size` texts, preserving submission order.
    pub async fn analyze_batch(
        &self,
        texts: &[String],
        platform: &str,
    ) -> Result<Vec<AnalysisResult>, ApiError> {
        self.analyze_batch_with_progress(texts, platform, |_| {})
            .await
    }

    /// Like [`analyze_batch`](Self::analyze_batch), invoking `on_progress`
    /// after each completed chunk.
    ///
    /// Texts are submitted in chunks of `batch_size`. A chunk whose batch
    /// call fails (or returns the wrong number of results) degrades to
    /// per-text analysis, so the output always has one result per input, in
    /// input order. One batch call consumes one unit of rate-limit quota
    /// regardless of chunk count.
    pub async fn analyze_batch_with_progress<F>(
        &self,
        texts: &[String],
        platform: &str,
        mut on_progress: F,
    ) -> Result<Vec<AnalysisResult>, ApiError>
    where
        F: FnMut(BatchProgress),
    {
        if texts.is_empty() {
            return Err(ApiError::InvalidInput("batch is empty".to_string()));
        }
        if texts.len() > self.config.max_batch_size {
            return Err(ApiError::InvalidInput(format!(
                "batch of {} texts exceeds the limit of {}",
                texts.len(),
                self.config.max_batch_size
            )));
        }
        if !self.limiter.is_allowed(RATE_KEY_ANALYZE) {
            return Err(ApiError::RateLimited {
                remaining: self.limiter.remaining(RATE_KEY_ANALYZE),
                retry_after: self.limiter.retry_after(RATE_KEY_ANALYZE),
            });
        }

        let total = texts.len();
        let chunk_size = self.config.batch_size.max(1);
        let mut results = Vec::with_capacity(total);

        on_progress(BatchProgress::new(0, total));
        for (index, chunk) in texts.chunks(chunk_size).enumerate() {
            if index > 0 {
                tokio::time::sleep(self.config.batch_pause()).await;
            }
            results.extend(self.analyze_chunk(chunk, platform).await);
            on_progress(BatchProgress::new(results.len(), total));
        }

        info!(total, platform, "batch analysis complete");
        Ok(results)
    }

    async fn analyze_chunk(&self, chunk: &[String], platform: &str) -> Vec<AnalysisResult> {
        let request = BatchRequest {
            texts: chunk.to_vec(),
            platform: platform.to_string(),
            batch_size: None,
        };
        match self
            .post_with_retries::<_, BatchResponse>(BATCH_PATH, &request)
            .await
        {
            Ok(response) if response.results.len() == chunk.len() => response
                .results
                .into_iter()
                .map(|mut result| {
                    result.normalize(self.config.detection_threshold, &self.config.warning_bands);
                    result
                })
                .collect(),
            Ok(response) => {
                warn!(
                    expected = chunk.len(),
                    received = response.results.len(),
                    "batch result count mismatch, degrading to per-text analysis"
                );
                self.analyze_chunk_individually(chunk, platform).await
            }
            Err(err) => {
                warn!(%err, "batch request failed, degrading to per-text analysis");
                self.analyze_chunk_individually(chunk, platform).await
            }
        }
    }

    async fn analyze_chunk_individually(
        &self,
        chunk: &[String],
        platform: &str,
    ) -> Vec<AnalysisResult> {
        // `buffered` preserves input order while keeping a bounded number
        // of requests in flight.
        stream::iter(chunk.iter().map(|text| self.analyze_degraded(text, platform)))
            .buffered(self.config.batch_concurrency.max(1))
            .collect()
            .await
    }

    /// Per-text analysis used on the batch degradation path. Never fails:
    /// invalid or unanalyzable texts get a local heuristic result.
    async fn analyze_degraded(&self, text: &str, platform: &str) -> AnalysisResult {
        if let Err(err) = self.validate_text(text) {
            return self.local_result(text.trim(), platform, "auto", &err.to_string());
        }
        let request = AnalysisRequest {
            text: text.trim().to_string(),
            platform: platform.to_string(),
            language: "auto".to_string(),
            context: BTreeMap::new(),
        };
        let key = serde_json::to_string(&request)
            .ok()
            .map(|body| fingerprint(ANALYZE_PATH, &body));

        if self.config.use_cache {
            if let Some(hit) = key.as_deref().and_then(|k| self.cache.get(k)) {
                return hit;
            }
        }

        match self
            .post_with_retries::<_, AnalysisResult>(ANALYZE_PATH, &request)
            .await
        {
            Ok(mut result) => {
                result.normalize(self.config.detection_threshold, &self.config.warning_bands);
                if self.config.use_cache {
                    if let Some(key) = &key {
                        self.cache
                            .set(key, result.clone(), self.config.analysis_cache_ttl());
                    }
                }
                result
            }
            Err(err) => self.local_result(&request.text, platform, "auto", &err.to_string()),
        }
    }

    fn local_result(
        &self,
        text: &str,
        platform: &str,
        language: &str,
        reason: &str,
    ) -> AnalysisResult {
        let mut result = self.analyzer.analyze(text, platform, language);
        result.fallback_reason = Some(reason.to_string());
        result
    }

    fn validate_text(&self, text: &str) -> Result<(), ApiError> {
        let trimmed_len = text.trim().chars().count();
        if trimmed_len < self.config.min_text_length {
            return Err(ApiError::InvalidInput(format!(
                "text must be at least {} characters after trimming",
                self.config.min_text_length
            )));
        }
        if text.chars().count() > self.config.max_text_length {
            return Err(ApiError::InvalidInput(format!(
                "text exceeds the maximum length of {} characters",
                self.config.max_text_length
            )));
        }
        Ok(())
    }

    async fn post_with_retries<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let mut last_err = ApiError::Network("no attempts made".to_string());
        for attempt in 0..self.config.retry_attempts {
            if attempt > 0 {
                let delay = self.config.backoff_delay(attempt - 1);
                debug!(?delay, attempt, path, "backing off before retry");
                tokio::time::sleep(delay).await;
            }
            match self.post_json(path, body).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() => {
                    warn!(%err, path, attempt, "request attempt failed");
                    last_err = err;
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_err)
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let response = execute(
            &self.config,
            self.request(Method::POST, path).json(body),
        )
        .await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Network(format!("malformed response body: {e}")))
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);
        let mut builder = self
            .http
            .request(method, url)
            .header("X-Client-Version", &self.config.client_version)
            .header("X-Request-Id", Uuid::new_v4().to_string())
            .header("X-Session-Id", &self.session.session_id);
        if let Some(user_id) = &self.session.user_id {
            builder = builder.header("X-User-Id", user_id);
        }
        builder
    }
}

fn lock_pending(pending: &Mutex<PendingMap>) -> MutexGuard<'_, PendingMap> {
    match pending.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Send a request and map transport and status failures into [`ApiError`].
pub(crate) async fn execute(
    config: &ClientConfig,
    builder: reqwest::RequestBuilder,
) -> Result<reqwest::Response, ApiError> {
    let response = builder.send().await.map_err(|e| {
        if e.is_timeout() {
            ApiError::Timeout(config.timeout())
        } else {
            ApiError::Network(e.to_string())
        }
    })?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ApiError::Http {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> AnalysisClient {
        AnalysisClient::new(ClientConfig::default()).unwrap()
    }

    #[test]
    fn test_invalid_config_is_rejected_at_construction() {
        let config = ClientConfig {
            base_url: "definitely not a url".to_string(),
            ..Default::default()
        };
        assert!(AnalysisClient::new(config).is_err());
    }

    #[tokio::test]
    async fn test_empty_text_rejected_without_network() {
        let err = client().analyze_text("   ", "twitter").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_overlong_text_rejected_without_network() {
        let text = "a".repeat(1_001);
        let err = client().analyze_text(&text, "twitter").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_empty_batch_rejected() {
        let err = client().analyze_batch(&[], "twitter").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_oversized_batch_rejected() {
        let texts: Vec<String> = (0..51).map(|i| format!("text number {i}")).collect();
        let err = client().analyze_batch(&texts, "twitter").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
    }

    #[test]
    fn test_context_requests_fingerprint_deterministically() {
        let build = || AnalysisRequest {
            text: "is this allowed here".to_string(),
            platform: "twitter".to_string(),
            language: "auto".to_string(),
            context: BTreeMap::from([
                ("region".to_string(), "ng".to_string()),
                ("thread_id".to_string(), "t-991".to_string()),
                ("source".to_string(), "reply".to_string()),
                ("audience".to_string(), "public".to_string()),
            ]),
        };
        let reference = fingerprint(
            ANALYZE_PATH,
            &serde_json::to_string(&build()).unwrap(),
        );
        // Identical logical requests must collide on one cache/dedup key
        // no matter how many times the request is rebuilt.
        for _ in 0..256 {
            let body = serde_json::to_string(&build()).unwrap();
            assert_eq!(fingerprint(ANALYZE_PATH, &body), reference);
        }
    }

    #[tokio::test]
    async fn test_exhausted_quota_surfaces_rate_limited() {
        let config = ClientConfig {
            rate_limit_max_requests: 0,
            ..Default::default()
        };
        let client = AnalysisClient::new(config).unwrap();
        let err = client
            .analyze_text("hello there", "twitter")
            .await
            .unwrap_err();
        match err {
            ApiError::RateLimited { remaining, .. } => assert_eq!(remaining, 0),
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }
}
