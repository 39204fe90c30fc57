// src/connectors/grants_gov.rs
//! Grants.gov Search2 connector. POSTs one keyword query per search term and
//! maps opportunity hits into grant records. Search2 returns headline fields
//! only (no synopsis or ceiling), so those stay at their defaults until a
//! richer source fills them in.

use std::collections::HashSet;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::model::{record_id, DataSource, GrantRecord, Provenance};
use crate::presets::Preset;
use crate::score::{meets_threshold, KeywordScorer};

use super::{or_unknown, parse_mdy, pause_between_terms, take_terms, value_to_string, Harvest, SourceConnector};

const SEARCH_URL: &str = "https://api.grants.gov/v1/api/search2";
const ROWS_PER_TERM: u32 = 25;
const MAX_TERMS: usize = 3;

#[derive(Debug, Deserialize)]
struct Search2Response {
    errorcode: Option<i64>,
    msg: Option<String>,
    data: Option<Search2Data>,
}

#[derive(Debug, Deserialize)]
struct Search2Data {
    #[serde(rename = "hitCount")]
    hit_count: Option<i64>,
    #[serde(rename = "oppHits")]
    opp_hits: Option<Vec<OppHit>>,
}

#[derive(Debug, Deserialize)]
struct OppHit {
    id: Option<serde_json::Value>,
    number: Option<String>,
    title: Option<String>,
    #[serde(rename = "agencyName")]
    agency_name: Option<String>,
    #[serde(rename = "agencyCode")]
    agency_code: Option<String>,
    #[serde(rename = "closeDate")]
    close_date: Option<String>,
    #[serde(rename = "oppStatus")]
    opp_status: Option<String>,
    #[serde(rename = "alnist")]
    aln_list: Option<Vec<String>>,
}

/// Map one Search2 response body. Hits scoring under the preset threshold on
/// title + agency text are dropped here, before they ever reach the store.
pub fn map_search_response(
    raw: &str,
    scorer: &KeywordScorer,
    preset: &Preset,
) -> Result<Vec<GrantRecord>> {
    let resp: Search2Response =
        serde_json::from_str(raw).context("decode grants.gov search2 response")?;

    if let Some(code) = resp.errorcode {
        if code != 0 {
            bail!(
                "grants.gov search2 error {code}: {}",
                resp.msg.unwrap_or_default()
            );
        }
    }

    let data = match resp.data {
        Some(d) => d,
        None => {
            debug!(target: "connectors", source = "grants_gov", "response carried no data block");
            return Ok(Vec::new());
        }
    };
    let hits = data.opp_hits.unwrap_or_default();
    debug!(
        target: "connectors",
        source = "grants_gov",
        hit_count = data.hit_count.unwrap_or(0),
        mapped = hits.len(),
        "search2 page mapped"
    );

    let mut grants = Vec::with_capacity(hits.len());
    for hit in hits {
        let external = hit
            .id
            .as_ref()
            .and_then(value_to_string)
            .or_else(|| hit.number.clone())
            .unwrap_or_default();
        let title = or_unknown(hit.title, DataSource::GrantsGov, "title");
        let agency = or_unknown(hit.agency_name.or(hit.agency_code), DataSource::GrantsGov, "agency");

        let score = scorer.score(&format!("{title} {agency}"), None);
        if !meets_threshold(score, preset.relevance_threshold) {
            continue;
        }

        let id = record_id(DataSource::GrantsGov, &external);
        let provenance = Provenance::captured_now(DataSource::GrantsGov)
            .with_external_id(external.clone())
            .with_source_url(format!(
                "https://www.grants.gov/search-results-detail/{external}"
            ));

        grants.push(GrantRecord {
            id,
            title,
            description: String::new(),
            agency,
            program_code: hit.aln_list.as_ref().and_then(|l| l.first().cloned()),
            opportunity_number: hit.number,
            close_date: hit.close_date.as_deref().and_then(parse_mdy),
            funding_ceiling: None,
            eligibility: String::new(),
            topics: hit
                .opp_status
                .map(|s| vec![s])
                .unwrap_or_default(),
            location: None,
            alignment_score: None,
            recommended_category: None,
            provenance,
        });
    }

    Ok(grants)
}

pub struct GrantsGovConnector {
    scorer: KeywordScorer,
}

impl GrantsGovConnector {
    pub fn new(scorer: KeywordScorer) -> Self {
        Self { scorer }
    }

    async fn fetch_term(&self, client: &Client, term: &str, preset: &Preset) -> Result<Vec<GrantRecord>> {
        let body = json!({
            "keyword": term,
            "rows": ROWS_PER_TERM,
            "oppStatuses": "forecasted|posted",
        });
        let raw = client
            .post(SEARCH_URL)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&body)
            .send()
            .await
            .with_context(|| format!("grants.gov request for '{term}'"))?
            .error_for_status()
            .context("grants.gov response status")?
            .text()
            .await
            .context("grants.gov response body")?;
        map_search_response(&raw, &self.scorer, preset)
    }
}

#[async_trait]
impl SourceConnector for GrantsGovConnector {
    fn source(&self) -> DataSource {
        DataSource::GrantsGov
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
                Ok(grants) => {
                    for g in grants {
                        if seen.insert(g.id.clone()) {
                            harvest.grants.push(g);
                        }
                    }
                }
                Err(e) => {
                    warn!(target: "connectors", source = "grants_gov", term = %term, error = %e, "term failed, continuing");
                    last_err = Some(e);
                }
            }
        }

        if harvest.total() == 0 {
            if let Some(e) = last_err {
                return Err(e).context("grants.gov produced nothing");
            }
        }
        Ok(harvest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::PriorityTerms;

    fn scorer() -> KeywordScorer {
        KeywordScorer::new(PriorityTerms::default())
    }

    fn open_preset() -> Preset {
        Preset {
            keywords: vec!["energy".into()],
            sectors: vec![],
            locations: vec![],
            relevance_threshold: 0.0,
        }
    }

    const PAGE: &str = r#"{
        "errorcode": 0,
        "msg": "ok",
        "data": {
            "hitCount": 2,
            "oppHits": [
                {
                    "id": 358284,
                    "number": "DE-FOA-0003298",
                    "title": "Rural Energy Resilience Pilots",
                    "agencyCode": "DOE",
                    "agencyName": "Department of Energy",
                    "openDate": "05/01/2025",
                    "closeDate": "09/30/2025",
                    "oppStatus": "posted",
                    "alnist": ["81.086"]
                },
                {
                    "number": "ED-GRANTS-042",
                    "title": null,
                    "closeDate": "not a date"
                }
            ]
        }
    }"#;

    #[test]
    fn maps_hits_with_defaults_for_gaps() {
        let grants = map_search_response(PAGE, &scorer(), &open_preset()).expect("maps");
        assert_eq!(grants.len(), 2);

        let first = &grants[0];
        assert_eq!(first.id, "grantsgov-358284");
        assert_eq!(first.agency, "Department of Energy");
        assert_eq!(first.program_code.as_deref(), Some("81.086"));
        assert_eq!(first.opportunity_number.as_deref(), Some("DE-FOA-0003298"));
        assert_eq!(
            first.close_date,
            chrono::NaiveDate::from_ymd_opt(2025, 9, 30)
        );
        assert_eq!(
            first.provenance.external_id.as_deref(),
            Some("358284")
        );

        let second = &grants[1];
        assert_eq!(second.id, "grantsgov-ED-GRANTS-042");
        assert_eq!(second.title, "Unknown");
        assert_eq!(second.agency, "Unknown");
        assert!(second.close_date.is_none());
    }

    #[test]
    fn threshold_drops_low_scoring_hits() {
        let mut preset = open_preset();
        preset.relevance_threshold = 0.99;
        let grants = map_search_response(PAGE, &scorer(), &preset).expect("maps");
        assert!(grants.is_empty());
    }

    #[test]
    fn nonzero_errorcode_is_an_error() {
        let raw = r#"{"errorcode": 5, "msg": "rate limited"}"#;
        let err = map_search_response(raw, &scorer(), &open_preset()).unwrap_err();
        assert!(err.to_string().contains("rate limited"));
    }

    #[test]
    fn missing_data_block_is_empty_not_error() {
        let raw = r#"{"errorcode": 0, "msg": "ok"}"#;
        let grants = map_search_response(raw, &scorer(), &open_preset()).expect("maps");
        assert!(grants.is_empty());
    }
}
