//! Integration tests for the analysis and stats clients against a local
//! stub HTTP server.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use modguard::{AnalysisClient, AnalysisOptions, ApiError, ClientConfig, HealthStatus, StatsClient};

type Responder = dyn Fn(usize, &str) -> String + Send + Sync;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Minimal one-response-per-connection HTTP server. The responder receives
/// the zero-based request index and the full request (head and body) and
/// returns the raw response to write back.
async fn spawn_server<F>(delay: Duration, responder: F) -> (SocketAddr, Arc<AtomicUsize>)
where
    F: Fn(usize, &str) -> String + Send + Sync + 'static,
{
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let responder: Arc<Responder> = Arc::new(responder);

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let index = counter.fetch_add(1, Ordering::SeqCst);
            let responder = responder.clone();
            tokio::spawn(async move {
                handle_connection(stream, index, delay, responder).await;
            });
        }
    });

    (addr, hits)
}

async fn handle_connection(
    mut stream: TcpStream,
    index: usize,
    delay: Duration,
    responder: Arc<Responder>,
) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let request = loop {
        let n = match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        buf.extend_from_slice(&chunk[..n]);
        let text = String::from_utf8_lossy(&buf).into_owned();
        if let Some(header_end) = text.find("\r\n\r\n") {
            let content_length = text[..header_end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    if name.eq_ignore_ascii_case("content-length") {
                        value.trim().parse::<usize>().ok()
                    } else {
                        None
                    }
                })
                .unwrap_or(0);
            if buf.len() >= header_end + 4 + content_length {
                break text;
            }
        }
    };

    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    let response = responder(index, &request);
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

fn json_response(status: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

fn request_body(request: &str) -> &str {
    request.split("\r\n\r\n").nth(1).unwrap_or("")
}

fn test_config(addr: SocketAddr) -> ClientConfig {
    ClientConfig {
        retry_attempts: 1,
        retry_base_delay_ms: 10,
        retry_max_delay_ms: 50,
        batch_pause_ms: 5,
        timeout_ms: 2_000,
        ..ClientConfig::default()
    }
    .with_base_url(&format!("http://{addr}"))
}

#[tokio::test]
async fn analysis_result_is_cached_for_identical_requests() {
    let (addr, hits) = spawn_server(Duration::ZERO, |_, _| {
        json_response(
            "200 OK",
            r#"{"toxicity_score": 0.92, "confidence": 0.88, "categories": ["insult"], "version": "v2"}"#,
        )
    })
    .await;
    let client = AnalysisClient::new(test_config(addr)).unwrap();

    let first = client.analyze_text("you are so stupid", "twitter").await.unwrap();
    let second = client.analyze_text("you are so stupid", "twitter").await.unwrap();

    assert!(first.is_toxic);
    assert_eq!(first.toxicity_score, 0.92);
    assert_eq!(second.toxicity_score, 0.92);
    assert_eq!(first.version, "v2");
    assert_eq!(hits.load(Ordering::SeqCst), 1, "second call must be served from cache");
    assert_eq!(client.cache_size(), 1);
}

#[tokio::test]
async fn force_refresh_bypasses_a_live_cache_entry() {
    let (addr, hits) = spawn_server(Duration::ZERO, |index, _| {
        let score = if index == 0 { 0.2 } else { 0.8 };
        json_response("200 OK", &format!(r#"{{"toxicity_score": {score}}}"#))
    })
    .await;
    let client = AnalysisClient::new(test_config(addr)).unwrap();

    let first = client.analyze_text("borderline remark", "twitter").await.unwrap();
    assert_eq!(first.toxicity_score, 0.2);

    let refreshed = client
        .analyze_text_with_options(
            "borderline remark",
            "twitter",
            AnalysisOptions {
                force_refresh: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(hits.load(Ordering::SeqCst), 2, "force refresh must hit the backend");
    assert_eq!(refreshed.toxicity_score, 0.8);

    // The refreshed value replaces the cached one
    let cached = client.analyze_text("borderline remark", "twitter").await.unwrap();
    assert_eq!(cached.toxicity_score, 0.8);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn slow_backend_times_out_per_attempt_then_falls_back() {
    let (addr, hits) = spawn_server(Duration::from_millis(500), |_, _| {
        json_response("200 OK", r#"{"toxicity_score": 0.1}"#)
    })
    .await;
    let config = ClientConfig {
        timeout_ms: 100,
        retry_attempts: 2,
        ..test_config(addr)
    };
    let client = AnalysisClient::new(config).unwrap();

    let result = client
        .analyze_text("taking your sweet time", "twitter")
        .await
        .unwrap();

    assert_eq!(
        hits.load(Ordering::SeqCst),
        2,
        "a timed-out attempt must be retried"
    );
    assert!(result.fallback);
    assert!(
        result.fallback_reason.as_deref().unwrap_or("").contains("timed out"),
        "fallback reason should carry the timeout: {:?}",
        result.fallback_reason
    );
}

#[tokio::test]
async fn concurrent_identical_requests_share_one_round_trip() {
    let (addr, hits) = spawn_server(Duration::from_millis(150), |_, _| {
        json_response("200 OK", r#"{"toxicity_score": 0.4}"#)
    })
    .await;
    let client = AnalysisClient::new(test_config(addr)).unwrap();
    let quota_before = client.remaining_requests();

    let (a, b) = tokio::join!(
        client.analyze_text("same text both times", "twitter"),
        client.analyze_text("same text both times", "twitter"),
    );

    let a = a.unwrap();
    let b = b.unwrap();
    assert_eq!(a.toxicity_score, b.toxicity_score);
    assert_eq!(hits.load(Ordering::SeqCst), 1, "joined caller must not hit the network");
    assert_eq!(
        client.remaining_requests(),
        quota_before - 1,
        "joined caller must not consume quota"
    );
}

#[tokio::test]
async fn server_errors_exhaust_retries_then_fall_back_to_heuristics() {
    let (addr, hits) = spawn_server(Duration::ZERO, |_, _| {
        json_response("500 Internal Server Error", r#"{"detail": "boom"}"#)
    })
    .await;
    let config = ClientConfig {
        retry_attempts: 2,
        ..test_config(addr)
    };
    let client = AnalysisClient::new(config).unwrap();

    let result = client
        .analyze_text("you are so stupid and worthless", "twitter")
        .await
        .unwrap();

    assert_eq!(hits.load(Ordering::SeqCst), 2, "every configured attempt must run");
    assert!(result.fallback);
    assert!(result.fallback_reason.is_some());
    assert!(result.is_toxic, "heuristics must still flag obvious insults");
    assert_eq!(client.cache_size(), 0, "degraded results must not be cached");
}

#[tokio::test]
async fn unreachable_backend_falls_back_to_heuristics() {
    let config = ClientConfig {
        retry_attempts: 1,
        ..ClientConfig::default()
    }
    .with_base_url("http://127.0.0.1:9");
    let client = AnalysisClient::new(config).unwrap();

    let result = client
        .analyze_text("have a wonderful day", "whatsapp")
        .await
        .unwrap();

    assert!(result.fallback);
    assert!(!result.is_toxic);
    assert_eq!(result.categories, vec!["safe".to_string()]);
}

#[tokio::test]
async fn quota_exhaustion_returns_rate_limited() {
    let (addr, _) = spawn_server(Duration::ZERO, |_, _| {
        json_response("200 OK", r#"{"toxicity_score": 0.1}"#)
    })
    .await;
    let config = ClientConfig {
        rate_limit_max_requests: 1,
        ..test_config(addr)
    };
    let client = AnalysisClient::new(config).unwrap();

    client.analyze_text("first unique text", "twitter").await.unwrap();
    let err = client
        .analyze_text("second unique text", "twitter")
        .await
        .unwrap_err();

    match err {
        ApiError::RateLimited {
            remaining,
            retry_after,
        } => {
            assert_eq!(remaining, 0);
            assert!(retry_after > Duration::ZERO);
        }
        other => panic!("expected RateLimited, got {other:?}"),
    }
}

#[tokio::test]
async fn batch_is_chunked_and_preserves_length() {
    let (addr, hits) = spawn_server(Duration::ZERO, |_, request| {
        let body: serde_json::Value = serde_json::from_str(request_body(request)).unwrap();
        let count = body["texts"].as_array().map(|a| a.len()).unwrap_or(0);
        let results: Vec<String> = (0..count)
            .map(|_| r#"{"toxicity_score": 0.2}"#.to_string())
            .collect();
        json_response("200 OK", &format!(r#"{{"results": [{}]}}"#, results.join(",")))
    })
    .await;
    let client = AnalysisClient::new(test_config(addr)).unwrap();

    let texts: Vec<String> = (0..7).map(|i| format!("batch text number {i}")).collect();
    let results = client.analyze_batch(&texts, "facebook").await.unwrap();

    assert_eq!(results.len(), 7);
    // Default chunk size is 5: 7 texts make two batch calls
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert!(results.iter().all(|r| !r.is_toxic));
}

#[tokio::test]
async fn failed_batch_degrades_per_text_and_preserves_order() {
    let (addr, _) = spawn_server(Duration::ZERO, |_, request| {
        if request.starts_with("POST /analyze/batch") {
            return json_response("503 Service Unavailable", "{}");
        }
        let body: serde_json::Value = serde_json::from_str(request_body(request)).unwrap();
        let text = body["text"].as_str().unwrap_or("");
        let score = if text.contains("trash") { 0.9 } else { 0.1 };
        json_response("200 OK", &format!(r#"{{"toxicity_score": {score}}}"#))
    })
    .await;
    let client = AnalysisClient::new(test_config(addr)).unwrap();

    let texts = vec![
        "good morning my friend".to_string(),
        "you are complete trash".to_string(),
        "see you at lunch".to_string(),
    ];
    let results = client.analyze_batch(&texts, "twitter").await.unwrap();

    assert_eq!(results.len(), 3);
    assert!(!results[0].is_toxic);
    assert!(results[1].is_toxic);
    assert!(!results[2].is_toxic);
}

#[tokio::test]
async fn batch_progress_reports_each_chunk() {
    let (addr, _) = spawn_server(Duration::ZERO, |_, request| {
        let body: serde_json::Value = serde_json::from_str(request_body(request)).unwrap();
        let count = body["texts"].as_array().map(|a| a.len()).unwrap_or(0);
        let results: Vec<String> = (0..count)
            .map(|_| r#"{"toxicity_score": 0.1}"#.to_string())
            .collect();
        json_response("200 OK", &format!(r#"{{"results": [{}]}}"#, results.join(",")))
    })
    .await;
    let config = ClientConfig {
        batch_size: 3,
        ..test_config(addr)
    };
    let client = AnalysisClient::new(config).unwrap();

    let texts: Vec<String> = (0..7).map(|i| format!("progress text {i}")).collect();
    let mut seen = Vec::new();
    client
        .analyze_batch_with_progress(&texts, "twitter", |p| seen.push(p))
        .await
        .unwrap();

    let processed: Vec<usize> = seen.iter().map(|p| p.processed).collect();
    assert_eq!(processed, vec![0, 3, 6, 7]);
    assert_eq!(seen.last().unwrap().percentage, 100);
    assert!(seen.iter().all(|p| p.total == 7));
}

#[tokio::test]
async fn stats_serve_stale_cache_when_backend_degrades() {
    let (addr, hits) = spawn_server(Duration::ZERO, |index, _| {
        if index == 0 {
            json_response(
                "200 OK",
                r#"{"total_requests": 4321, "toxic_requests": 21, "toxicity_rate": 0.05}"#,
            )
        } else {
            json_response("500 Internal Server Error", "{}")
        }
    })
    .await;
    // Zero TTL: the cached payload is stale immediately
    let config = ClientConfig {
        stats_cache_ttl_secs: 0,
        ..test_config(addr)
    };
    let client = StatsClient::new(config).unwrap();

    let fresh = client.get_stats(false).await;
    assert_eq!(fresh.total_requests, 4321);
    assert!(!fresh.fallback);

    let stale = client.get_stats(false).await;
    assert_eq!(stale.total_requests, 4321, "stale cache must win over hardcoded fallback");
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn stats_are_cached_within_ttl() {
    let (addr, hits) = spawn_server(Duration::ZERO, |_, _| {
        json_response("200 OK", r#"{"total_requests": 99}"#)
    })
    .await;
    let client = StatsClient::new(test_config(addr)).unwrap();

    client.get_stats(false).await;
    client.get_stats(false).await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // force_refresh bypasses the live cache
    client.get_stats(true).await;
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn resources_degrade_to_builtin_list() {
    let (addr, _) = spawn_server(Duration::ZERO, |_, _| {
        json_response("500 Internal Server Error", "{}")
    })
    .await;
    let client = StatsClient::new(test_config(addr)).unwrap();

    let resources = client.get_resources("ng").await;
    assert!(!resources.is_empty());
    assert!(resources.iter().any(|r| r.name.contains("Mentally Aware")));
}

#[tokio::test]
async fn languages_come_from_backend_when_reachable() {
    let (addr, _) = spawn_server(Duration::ZERO, |_, _| {
        json_response(
            "200 OK",
            r#"{"languages": [{"code": "en", "name": "English"}, {"code": "sw", "name": "Swahili", "native_name": "Kiswahili"}]}"#,
        )
    })
    .await;
    let client = StatsClient::new(test_config(addr)).unwrap();

    let languages = client.get_supported_languages().await;
    assert_eq!(languages.len(), 2);
    assert_eq!(languages[1].native_name.as_deref(), Some("Kiswahili"));
}

#[tokio::test]
async fn health_check_maps_status_codes() {
    let (addr, _) = spawn_server(Duration::ZERO, |_, _| {
        json_response("200 OK", r#"{"status": "healthy", "version": "2.1.0"}"#)
    })
    .await;
    let client = StatsClient::new(test_config(addr)).unwrap();
    let report = client.health_check().await;
    assert_eq!(report.status, HealthStatus::Healthy);
    assert_eq!(report.version.as_deref(), Some("2.1.0"));

    let (addr, _) = spawn_server(Duration::ZERO, |_, _| {
        json_response("503 Service Unavailable", "{}")
    })
    .await;
    let client = StatsClient::new(test_config(addr)).unwrap();
    let report = client.health_check().await;
    assert_eq!(report.status, HealthStatus::Unhealthy);
}

#[tokio::test]
async fn messy_backend_responses_are_coerced() {
    let (addr, _) = spawn_server(Duration::ZERO, |_, _| {
        json_response(
            "200 OK",
            r#"{"toxicity_score": 3.2, "confidence": "very", "categories": null, "warning_level": "apocalyptic"}"#,
        )
    })
    .await;
    let client = AnalysisClient::new(test_config(addr)).unwrap();

    let result = client.analyze_text("whatever you say", "twitter").await.unwrap();
    assert_eq!(result.toxicity_score, 1.0);
    assert!(result.is_toxic);
    assert_eq!(result.confidence, 0.5);
    assert_eq!(result.warning_level, modguard::WarningLevel::High);
}

#[tokio::test]
async fn session_and_version_headers_are_sent() {
    let (addr, _) = spawn_server(Duration::ZERO, |_, request| {
        let head = request.split("\r\n\r\n").next().unwrap_or("").to_lowercase();
        let complete = head.contains("x-client-version:")
            && head.contains("x-request-id:")
            && head.contains("x-session-id: session-");
        if complete {
            json_response("200 OK", r#"{"toxicity_score": 0.1}"#)
        } else {
            json_response("400 Bad Request", r#"{"detail": "missing headers"}"#)
        }
    })
    .await;
    let client = AnalysisClient::new(test_config(addr)).unwrap();
    let result = client.analyze_text("checking the headers", "twitter").await.unwrap();
    assert!(!result.fallback, "backend rejected the request headers");
}
