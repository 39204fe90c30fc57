// src/connectors/usaspending.rs
//! USAspending.gov connector. Queries the spending-by-award search endpoint
//! for grant-type awards and maps each award into a project record keyed on
//! the award's internal id. Response fields are keyed by display name
//! ("Award ID", "Recipient Name", ...), hence the renames below.

use std::collections::HashSet;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::model::{record_id, DataSource, GeoLocation, Origin, ProjectRecord, Provenance};
use crate::presets::Preset;
use crate::score::{meets_threshold, KeywordScorer};

use super::{or_unknown, parse_ymd, pause_between_terms, take_terms, value_to_string, Harvest, SourceConnector};

const SEARCH_URL: &str = "https://api.usaspending.gov/api/v2/search/spending_by_award/";
const PAGE_SIZE: u32 = 25;
const MAX_TERMS: usize = 2;

/// Grant-family award type codes (block, formula, project, cooperative).
const AWARD_TYPE_CODES: [&str; 4] = ["02", "03", "04", "05"];

#[derive(Debug, Deserialize)]
struct AwardSearchResponse {
    results: Option<Vec<AwardRow>>,
}

#[derive(Debug, Deserialize)]
struct AwardRow {
    internal_id: Option<serde_json::Value>,
    #[serde(rename = "Award ID")]
    award_id: Option<String>,
    #[serde(rename = "Recipient Name")]
    recipient: Option<String>,
    #[serde(rename = "Description")]
    description: Option<String>,
    #[serde(rename = "Award Amount")]
    amount: Option<f64>,
    #[serde(rename = "Start Date")]
    start_date: Option<String>,
    #[serde(rename = "Awarding Agency")]
    agency: Option<String>,
    #[serde(rename = "Place of Performance State Code")]
    state: Option<String>,
}

/// Map one spending-by-award response page into project records.
pub fn map_award_response(
    raw: &str,
    scorer: &KeywordScorer,
    preset: &Preset,
) -> Result<Vec<ProjectRecord>> {
    let resp: AwardSearchResponse =
        serde_json::from_str(raw).context("decode usaspending response")?;
    let rows = resp.results.unwrap_or_default();
    debug!(target: "connectors", source = "usaspending", mapped = rows.len(), "award page mapped");

    let sector = preset
        .sectors
        .first()
        .cloned()
        .unwrap_or_else(|| "public-spending".to_string());

    let mut projects = Vec::with_capacity(rows.len());
    for row in rows {
        let external = row
            .internal_id
            .as_ref()
            .and_then(value_to_string)
            .or_else(|| row.award_id.clone())
            .unwrap_or_default();
        let recipient = or_unknown(row.recipient, DataSource::UsaSpending, "recipient");
        let description = row.description.unwrap_or_default();
        let state = row.state.filter(|s| !s.trim().is_empty());

        let score = scorer.score(
            &format!("{recipient} {description}"),
            state.as_deref(),
        );
        if !meets_threshold(score, preset.relevance_threshold) {
            continue;
        }

        let id = record_id(DataSource::UsaSpending, &external);
        let provenance = Provenance::captured_now(DataSource::UsaSpending)
            .with_external_id(external.clone())
            .with_source_url(format!("https://www.usaspending.gov/award/{external}"));

        projects.push(ProjectRecord {
            id,
            title: format!("Federal award: {recipient}"),
            description,
            sector: sector.clone(),
            origin: Origin::External,
            institution: Some(recipient),
            location: state.clone().map(|s| GeoLocation::us(Some(s), None)),
            priority_score: Some(score),
            kpi_summary: row
                .amount
                .map(|a| format!("Award amount ${a:.0}")),
            tags: row
                .agency
                .map(|a| vec![a])
                .unwrap_or_default(),
            effective_date: row.start_date.as_deref().and_then(parse_ymd),
            provenance,
        });
    }

    Ok(projects)
}

pub struct UsaSpendingConnector {
    scorer: KeywordScorer,
}

impl UsaSpendingConnector {
    pub fn new(scorer: KeywordScorer) -> Self {
        Self { scorer }
    }

    async fn fetch_term(&self, client: &Client, term: &str, preset: &Preset) -> Result<Vec<ProjectRecord>> {
        let body = json!({
            "filters": {
                "keywords": [term],
                "award_type_codes": AWARD_TYPE_CODES,
            },
            "fields": [
                "Award ID",
                "Recipient Name",
                "Description",
                "Award Amount",
                "Start Date",
                "Awarding Agency",
                "Place of Performance State Code"
            ],
            "limit": PAGE_SIZE,
            "page": 1,
        });
        let raw = client
            .post(SEARCH_URL)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&body)
            .send()
            .await
            .with_context(|| format!("usaspending request for '{term}'"))?
            .error_for_status()
            .context("usaspending response status")?
            .text()
            .await
            .context("usaspending response body")?;
        map_award_response(&raw, &self.scorer, preset)
    }
}

#[async_trait]
impl SourceConnector for UsaSpendingConnector {
    fn source(&self) -> DataSource {
        DataSource::UsaSpending
    }

    async fn fetch(&self, client: &Client, preset: &Preset) -> Result<Harvest> {
        let terms = take_terms(preset, MAX_TERMS);
        let mut harvest = Harvest::default();
        let mut seen: HashSet<String> = HashSet::new();
        let mut last_err = None;

        for (i, term) in terms.iter().enumerate() {
            if i > 0 {
                pause_between_terms().await;
            }
            match self.fetch_term(client, term, preset).await {
                Ok(projects) => {
                    for p in projects {
                        if seen.insert(p.id.clone()) {
                            harvest.projects.push(p);
                        }
                    }
                }
                Err(e) => {
                    warn!(target: "connectors", source = "usaspending", term = %term, error = %e, "term failed, continuing");
                    last_err = Some(e);
                }
            }
        }

        if harvest.total() == 0 {
            if let Some(e) = last_err {
                return Err(e).context("usaspending produced nothing");
            }
        }
        Ok(harvest)
    }
}
