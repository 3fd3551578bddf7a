//! Local heuristic toxicity analyzer.
//!
//! The offline fallback when the remote API is unreachable: a weighted
//! regex-rule classifier over lowercased text. Scores start from a small
//! "presumed safe" baseline and are clamped into [0.1, 0.95], so the
//! analyzer never claims certainty in either direction.

mod patterns;

use std::time::Instant;

use regex::Regex;
use tracing::debug;

use crate::config::WarningBands;
use crate::models::{AnalysisResult, CulturalContext, WarningLevel, HEURISTIC_VERSION};

/// Score every text starts from before any rule fires.
pub const BASELINE_SCORE: f64 = 0.1;

/// Ceiling on heuristic scores; regex matching never proves toxicity.
pub const MAX_SCORE: f64 = 0.95;

/// Base confidence for heuristic verdicts.
const BASE_CONFIDENCE: f64 = 0.5;

/// Confidence never reaches 1.0 for a heuristic result.
const MAX_CONFIDENCE: f64 = 0.95;

struct Rule {
    regex: Regex,
    weight: f64,
    category: &'static str,
}

struct RegionRule {
    regex: Regex,
    region: &'static str,
}

/// Regex-driven toxicity classifier. Pure and deterministic given its rule
/// table; only the reported processing time varies between calls.
pub struct HeuristicAnalyzer {
    rules: Vec<Rule>,
    regions: Vec<RegionRule>,
    threshold: f64,
    bands: WarningBands,
}

impl HeuristicAnalyzer {
    /// Build the analyzer with the given detection threshold and warning
    /// bands. The rule table is fixed at compile time.
    pub fn new(threshold: f64, bands: WarningBands) -> Self {
        let rules = patterns::RULES
            .iter()
            .map(|spec| Rule {
                regex: Regex::new(spec.pattern).expect("invalid built-in rule pattern"),
                weight: spec.weight,
                category: spec.category,
            })
            .collect();
        let regions = patterns::REGIONS
            .iter()
            .map(|spec| RegionRule {
                regex: Regex::new(spec.pattern).expect("invalid built-in region pattern"),
                region: spec.region,
            })
            .collect();
        Self {
            rules,
            regions,
            threshold,
            bands,
        }
    }

    /// Analyze a text locally. Never fails; the result is marked
    /// `fallback: true` with the version tag of the heuristic table.
    pub fn analyze(&self, text: &str, platform: &str, language: &str) -> AnalysisResult {
        let started = Instant::now();
        let lowered = text.to_lowercase();

        let mut score = BASELINE_SCORE;
        let mut total_matches = 0usize;
        let mut categories: Vec<String> = Vec::new();

        for rule in &self.rules {
            let count = rule.regex.find_iter(&lowered).count();
            if count == 0 {
                continue;
            }
            score += rule.weight * count as f64;
            total_matches += count;
            if !categories.iter().any(|c| c == rule.category) {
                categories.push(rule.category.to_string());
            }
        }

        // Reward multiple independent signals, but never let the bonus
        // alone flip a verdict.
        score += (0.05 * total_matches as f64).min(0.15);
        score = score.clamp(BASELINE_SCORE, MAX_SCORE);

        let is_toxic = score > self.threshold;
        let warning_level = WarningLevel::from_score(score, &self.bands);

        let length_bonus = (text.chars().count() as f64 * 0.001).min(0.15);
        let match_bonus = (0.05 * total_matches as f64).min(0.2);
        let confidence = (BASE_CONFIDENCE + length_bonus + match_bonus).min(MAX_CONFIDENCE);

        let cultural_context = self.detect_cultural_context(&lowered, language);

        let detected_issues = categories.clone();
        if categories.is_empty() {
            categories.push("safe".to_string());
        }

        debug!(
            platform,
            score,
            matches = total_matches,
            "heuristic analysis complete"
        );

        AnalysisResult {
            toxicity_score: score,
            is_toxic,
            confidence,
            warning_level,
            categories,
            detected_issues,
            processing_time: started.elapsed().as_secs_f64() * 1_000.0,
            cultural_context,
            fallback: true,
            fallback_reason: None,
            version: HEURISTIC_VERSION.to_string(),
        }
    }

    fn detect_cultural_context(&self, lowered: &str, language: &str) -> CulturalContext {
        let regions: Vec<String> = self
            .regions
            .iter()
            .filter(|r| r.regex.is_match(lowered))
            .map(|r| r.region.to_string())
            .collect();
        CulturalContext {
            detected: !regions.is_empty(),
            regions,
            language: if language == "auto" {
                None
            } else {
                Some(language.to_string())
            },
        }
    }
}
