// src/connectors/mod.rs
//! Source connectors, one per public API. Each connector turns one provider
//! schema into canonical records through an all-optional raw representation,
//! so a missing or renamed field degrades to a default instead of a failure.
//!
//! Request discipline is shared: one request per search term, sequential
//! within a connector with a fixed delay, bounded client timeouts. Term-level
//! failures are warned and skipped; a connector only errors out when it could
//! not produce anything at all.

pub mod college_scorecard;
pub mod datagov;
pub mod eia;
pub mod grants_gov;
pub mod nsf_awards;
pub mod openei;
pub mod usaspending;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use reqwest::Client;
use tracing::debug;

use crate::model::{DataSource, DatasetRecord, GrantRecord, ProjectRecord};
use crate::presets::Preset;
use crate::score::KeywordScorer;

/// Pause between successive term requests against one provider.
pub const TERM_DELAY: Duration = Duration::from_millis(400);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(12);

const USER_AGENT: &str = concat!("opengov-scout/", env!("CARGO_PKG_VERSION"));

/// Everything one connector contributed to a run. Dataset records are folded
/// into projects by the pipeline before persistence.
#[derive(Debug, Default)]
pub struct Harvest {
    pub projects: Vec<ProjectRecord>,
    pub grants: Vec<GrantRecord>,
    pub datasets: Vec<DatasetRecord>,
}

impl Harvest {
    pub fn total(&self) -> usize {
        self.projects.len() + self.grants.len() + self.datasets.len()
    }

    pub fn absorb(&mut self, other: Harvest) {
        self.projects.extend(other.projects);
        self.grants.extend(other.grants);
        self.datasets.extend(other.datasets);
    }
}

#[async_trait]
pub trait SourceConnector: Send + Sync {
    fn source(&self) -> DataSource;

    /// Fetch and map everything this connector can for the given preset.
    async fn fetch(&self, client: &Client, preset: &Preset) -> Result<Harvest>;
}

/// Shared HTTP client for all connectors in a run.
pub fn http_client() -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .context("build http client")
}

/// The full registry in a fixed order. The scorer is shared policy, cloned
/// into each connector that scores by keyword. Connectors are `Arc`ed so the
/// orchestrator can fan them out onto spawned tasks.
pub fn default_connectors(scorer: &KeywordScorer) -> Vec<Arc<dyn SourceConnector>> {
    vec![
        Arc::new(grants_gov::GrantsGovConnector::new(scorer.clone())),
        Arc::new(usaspending::UsaSpendingConnector::new(scorer.clone())),
        Arc::new(nsf_awards::NsfAwardsConnector::new(scorer.clone())),
        Arc::new(eia::EiaConnector::new()),
        Arc::new(college_scorecard::CollegeScorecardConnector::new()),
        Arc::new(datagov::DataGovConnector::new(scorer.clone())),
        Arc::new(openei::OpenEiConnector::new(scorer.clone())),
    ]
}

pub(crate) async fn pause_between_terms() {
    tokio::time::sleep(TERM_DELAY).await;
}

/// First `n` usable search terms from the preset.
pub(crate) fn take_terms(preset: &Preset, n: usize) -> Vec<String> {
    preset
        .keywords
        .iter()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .take(n)
        .collect()
}

/// Demo credential accepted by api.data.gov-style gateways; real keys come
/// from the environment.
pub(crate) const DEMO_KEY: &str = "DEMO_KEY";

pub(crate) fn api_key_from_env(var: &str) -> String {
    std::env::var(var)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| DEMO_KEY.to_string())
}

/// Providers are inconsistent about numeric vs string ids and amounts; accept
/// either shape.
pub(crate) fn value_to_string(v: &serde_json::Value) -> Option<String> {
    match v {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn value_to_f64(v: &serde_json::Value) -> Option<f64> {
    match v {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().replace(',', "").parse().ok(),
        _ => None,
    }
}

/// Defaulting read for required text fields, with a debug trail of which
/// defaults fired.
pub(crate) fn or_unknown(v: Option<String>, source: DataSource, field: &str) -> String {
    match v {
        Some(s) if !s.trim().is_empty() => s,
        _ => {
            debug!(target: "connectors", source = source.label(), field, "missing field, defaulted to Unknown");
            "Unknown".to_string()
        }
    }
}

/// `MM/DD/YYYY`, as used by Grants.gov and NSF.
pub(crate) fn parse_mdy(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%m/%d/%Y").ok()
}

/// `YYYY-MM-DD`, as used by USAspending.
pub(crate) fn parse_ymd(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

/// CKAN-style naive ISO timestamps (`2024-05-01T12:34:56.000000`), read as UTC.
pub(crate) fn parse_naive_iso_utc(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|ndt| ndt.and_utc())
}
