// src/score.rs
//! Scoring policy for discovered records.
//!
//! Two families live here so every connector shares one registry instead of
//! hard-coding numbers inline:
//! - bucket scoring for numeric indicators (Pell rate, retail power price),
//! - additive keyword scoring for free-text records.
//!
//! All scores land in 0..=100. Preset thresholds are expressed 0..=1 and are
//! compared against the rescaled score.

use std::fs;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;

/// Env var that overrides the priority-terms config path.
pub const ENV_PRIORITY_TERMS_PATH: &str = "SCOUT_PRIORITY_TERMS_PATH";
/// Default config location relative to the working directory.
pub const DEFAULT_PRIORITY_TERMS_PATH: &str = "config/priority_terms.json";

/// Coarse relevance band for numeric indicators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreBucket {
    High,
    Medium,
    Low,
}

impl ScoreBucket {
    pub fn points(self) -> f32 {
        match self {
            ScoreBucket::High => 90.0,
            ScoreBucket::Medium => 65.0,
            ScoreBucket::Low => 40.0,
        }
    }
}

/// Institutions serving many Pell recipients rank highest for the programs we
/// track. Rate is a fraction 0..=1.
pub fn pell_rate_bucket(rate: f64) -> ScoreBucket {
    if rate >= 0.50 {
        ScoreBucket::High
    } else if rate >= 0.35 {
        ScoreBucket::Medium
    } else {
        ScoreBucket::Low
    }
}

/// Commercial retail electricity price in cents/kWh. Expensive territories are
/// where efficiency and microgrid work pencils out.
pub fn commercial_rate_bucket(price_cents_kwh: f64) -> ScoreBucket {
    if price_cents_kwh >= 15.0 {
        ScoreBucket::High
    } else if price_cents_kwh >= 10.0 {
        ScoreBucket::Medium
    } else {
        ScoreBucket::Low
    }
}

/// Compare a 0..=100 score against a preset threshold expressed 0..=1.
pub fn meets_threshold(score: f32, threshold: f32) -> bool {
    score / 100.0 >= threshold.clamp(0.0, 1.0)
}

/// Terms and increments for the additive scorer. Loaded from JSON; a seeded
/// copy ships in the binary so a missing file never disables scoring.
#[derive(Debug, Clone, Deserialize)]
pub struct PriorityTerms {
    pub base_score: f32,
    pub keyword_points: f32,
    pub keywords: Vec<String>,
    pub focus_points: f32,
    pub focus_terms: Vec<String>,
    pub state_points: f32,
    pub states: Vec<String>,
}

impl Default for PriorityTerms {
    fn default() -> Self {
        Self {
            base_score: 25.0,
            keyword_points: 10.0,
            keywords: [
                "broadband",
                "rural",
                "energy",
                "workforce",
                "infrastructure",
                "resilience",
                "community college",
                "microgrid",
                "apprenticeship",
                "digital equity",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            focus_points: 20.0,
            focus_terms: [
                "rural broadband",
                "energy transition",
                "workforce development",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            state_points: 15.0,
            states: ["KY", "TN", "WV", "VA", "OH"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl PriorityTerms {
    pub fn from_json_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).context("parse priority terms JSON")
    }
}

/// Additive keyword scorer over cleaned record text.
#[derive(Debug, Clone)]
pub struct KeywordScorer {
    terms: PriorityTerms,
}

impl KeywordScorer {
    pub fn new(terms: PriorityTerms) -> Self {
        Self { terms }
    }

    /// Env path -> default path -> seeded terms. A malformed file logs a
    /// warning and falls back rather than failing a run.
    pub fn load_default() -> Self {
        let path = std::env::var(ENV_PRIORITY_TERMS_PATH)
            .unwrap_or_else(|_| DEFAULT_PRIORITY_TERMS_PATH.to_string());
        match fs::read_to_string(&path) {
            Ok(raw) => match PriorityTerms::from_json_str(&raw) {
                Ok(terms) => Self::new(terms),
                Err(e) => {
                    warn!(target: "score", %path, error = %e, "invalid priority terms file; using seeded terms");
                    Self::new(PriorityTerms::default())
                }
            },
            Err(_) => Self::new(PriorityTerms::default()),
        }
    }

    /// Score free text plus an optional two-letter state code. Matching is
    /// case-insensitive substring; every hit adds its increment once. Result
    /// is capped at 100.
    pub fn score(&self, text: &str, state: Option<&str>) -> f32 {
        let haystack = text.to_ascii_lowercase();
        let mut score = self.terms.base_score;

        for kw in &self.terms.keywords {
            if haystack.contains(&kw.to_ascii_lowercase()) {
                score += self.terms.keyword_points;
            }
        }
        for focus in &self.terms.focus_terms {
            if haystack.contains(&focus.to_ascii_lowercase()) {
                score += self.terms.focus_points;
            }
        }
        if let Some(code) = state {
            let code = code.trim().to_ascii_uppercase();
            if self.terms.states.iter().any(|s| s.eq_ignore_ascii_case(&code)) {
                score += self.terms.state_points;
            }
        }

        score.clamp(0.0, 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    const TERMS_FIXTURE: &str = r#"{
        "base_score": 10.0,
        "keyword_points": 5.0,
        "keywords": ["solar", "grid"],
        "focus_points": 30.0,
        "focus_terms": ["community solar"],
        "state_points": 15.0,
        "states": ["KY"]
    }"#;

    #[test]
    fn buckets_have_fixed_points() {
        assert_eq!(ScoreBucket::High.points(), 90.0);
        assert_eq!(ScoreBucket::Medium.points(), 65.0);
        assert_eq!(ScoreBucket::Low.points(), 40.0);
    }

    #[test]
    fn pell_bucket_boundaries() {
        assert_eq!(pell_rate_bucket(0.50), ScoreBucket::High);
        assert_eq!(pell_rate_bucket(0.49), ScoreBucket::Medium);
        assert_eq!(pell_rate_bucket(0.35), ScoreBucket::Medium);
        assert_eq!(pell_rate_bucket(0.34), ScoreBucket::Low);
    }

    #[test]
    fn power_price_bucket_boundaries() {
        assert_eq!(commercial_rate_bucket(15.0), ScoreBucket::High);
        assert_eq!(commercial_rate_bucket(12.3), ScoreBucket::Medium);
        assert_eq!(commercial_rate_bucket(9.99), ScoreBucket::Low);
    }

    #[test]
    fn threshold_rescales_to_unit_interval() {
        assert!(meets_threshold(65.0, 0.65));
        assert!(!meets_threshold(64.9, 0.65));
        assert!(meets_threshold(0.0, 0.0));
        // Out-of-range thresholds are clamped, not rejected.
        assert!(meets_threshold(100.0, 7.0));
    }

    #[test]
    fn additive_scoring_sums_each_hit_once() {
        let scorer = KeywordScorer::new(
            PriorityTerms::from_json_str(TERMS_FIXTURE).expect("fixture parses"),
        );
        // base 10 + solar 5 + grid 5 + "community solar" 30 + KY 15 = 65
        let s = scorer.score("Community solar pilot on the rural grid", Some("ky"));
        assert_eq!(s, 65.0);
    }

    #[test]
    fn additive_scoring_caps_at_hundred() {
        let mut terms = PriorityTerms::from_json_str(TERMS_FIXTURE).expect("fixture parses");
        terms.keyword_points = 80.0;
        let scorer = KeywordScorer::new(terms);
        let s = scorer.score("solar grid solar grid", Some("KY"));
        assert_eq!(s, 100.0);
    }

    #[test]
    fn no_hits_means_base_score() {
        let scorer = KeywordScorer::new(
            PriorityTerms::from_json_str(TERMS_FIXTURE).expect("fixture parses"),
        );
        assert_eq!(scorer.score("unrelated topic entirely", None), 10.0);
    }

    #[test]
    #[serial]
    fn env_path_overrides_default() {
        let mut f = tempfile::NamedTempFile::new().expect("tempfile");
        f.write_all(TERMS_FIXTURE.as_bytes()).expect("write fixture");

        std::env::set_var(ENV_PRIORITY_TERMS_PATH, f.path());
        let scorer = KeywordScorer::load_default();
        std::env::remove_var(ENV_PRIORITY_TERMS_PATH);

        assert_eq!(scorer.terms.base_score, 10.0);
        assert_eq!(scorer.terms.keywords, vec!["solar", "grid"]);
    }

    #[test]
    #[serial]
    fn missing_file_falls_back_to_seeded_terms() {
        std::env::set_var(ENV_PRIORITY_TERMS_PATH, "/nonexistent/terms.json");
        let scorer = KeywordScorer::load_default();
        std::env::remove_var(ENV_PRIORITY_TERMS_PATH);

        assert_eq!(scorer.terms.base_score, PriorityTerms::default().base_score);
        assert!(!scorer.terms.keywords.is_empty());
    }
}
