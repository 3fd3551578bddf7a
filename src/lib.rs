//! Client-side orchestration for a toxicity-analysis API.
//!
//! The crate wraps a remote moderation backend with the plumbing a caller
//! should not have to rebuild: input validation, response caching with
//! per-endpoint TTLs, in-flight request deduplication, client-side rate
//! limiting, retries with exponential backoff, and a local heuristic
//! analyzer that keeps results flowing when the backend is down.
//!
//! Entry points:
//! - [`AnalysisClient`] for single and batch text analysis
//! - [`StatsClient`] for stats, health, support resources, and languages
//! - [`HeuristicAnalyzer`] for purely offline analysis
//!
//! ```no_run
//! use modguard::{AnalysisClient, ClientConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = AnalysisClient::new(ClientConfig::from_env())?;
//! let result = client.analyze_text("you are amazing", "twitter").await?;
//! assert!(!result.is_toxic);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod heuristics;
pub mod models;
pub mod rate_limit;

pub use client::stats::StatsClient;
pub use client::AnalysisClient;
pub use config::{ClientConfig, WarningBands};
pub use error::{ApiError, ConfigError};
pub use heuristics::HeuristicAnalyzer;
pub use models::{
    AnalysisOptions, AnalysisRequest, AnalysisResult, BatchProgress, HealthReport, HealthStatus,
    SessionContext, WarningLevel,
};
