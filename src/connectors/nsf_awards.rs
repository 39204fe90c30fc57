// src/connectors/nsf_awards.rs
//! NSF Awards connector. Keyword GET against the public awards endpoint;
//! every award becomes a project record with the awardee as institution.
//! NSF serializes amounts as strings, so the raw struct keeps them loose.

use std::collections::HashSet;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::model::{record_id, DataSource, GeoLocation, Origin, ProjectRecord, Provenance};
use crate::presets::Preset;
use crate::score::{meets_threshold, KeywordScorer};

use super::{or_unknown, parse_mdy, pause_between_terms, take_terms, value_to_f64, value_to_string, Harvest, SourceConnector};

const AWARDS_URL: &str = "https://api.nsf.gov/services/v1/awards.json";
const PRINT_FIELDS: &str =
    "id,title,awardeeName,awardeeStateCode,awardeeCity,fundsObligatedAmt,date,startDate,abstractText";
const MAX_TERMS: usize = 2;

#[derive(Debug, Deserialize)]
struct NsfResponse {
    response: Option<NsfBody>,
}

#[derive(Debug, Deserialize)]
struct NsfBody {
    award: Option<Vec<NsfAward>>,
}

#[derive(Debug, Deserialize)]
struct NsfAward {
    id: Option<serde_json::Value>,
    title: Option<String>,
    #[serde(rename = "awardeeName")]
    awardee_name: Option<String>,
    #[serde(rename = "awardeeStateCode")]
    awardee_state: Option<String>,
    #[serde(rename = "awardeeCity")]
    awardee_city: Option<String>,
    #[serde(rename = "fundsObligatedAmt")]
    funds_obligated: Option<serde_json::Value>,
    date: Option<String>,
    #[serde(rename = "startDate")]
    start_date: Option<String>,
    #[serde(rename = "abstractText")]
    abstract_text: Option<String>,
}

/// Map one awards response body into project records.
pub fn map_awards_response(
    raw: &str,
    scorer: &KeywordScorer,
    preset: &Preset,
) -> Result<Vec<ProjectRecord>> {
    let resp: NsfResponse = serde_json::from_str(raw).context("decode nsf awards response")?;
    let awards = resp.response.and_then(|b| b.award).unwrap_or_default();
    debug!(target: "connectors", source = "nsf_awards", mapped = awards.len(), "awards page mapped");

    let sector = preset
        .sectors
        .first()
        .cloned()
        .unwrap_or_else(|| "research".to_string());

    let mut projects = Vec::with_capacity(awards.len());
    for award in awards {
        let external = award
            .id
            .as_ref()
            .and_then(value_to_string)
            .unwrap_or_default();
        let title = or_unknown(award.title, DataSource::NsfAwards, "title");
        let description = award.abstract_text.unwrap_or_default();
        let state = award.awardee_state.filter(|s| !s.trim().is_empty());

        let score = scorer.score(&format!("{title} {description}"), state.as_deref());
        if !meets_threshold(score, preset.relevance_threshold) {
            continue;
        }

        let id = record_id(DataSource::NsfAwards, &external);
        let provenance = Provenance::captured_now(DataSource::NsfAwards)
            .with_external_id(external.clone())
            .with_source_url(format!(
                "https://www.nsf.gov/awardsearch/showAward?AWD_ID={external}"
            ));

        projects.push(ProjectRecord {
            id,
            title,
            description,
            sector: sector.clone(),
            origin: Origin::External,
            institution: award.awardee_name,
            location: if state.is_some() || award.awardee_city.is_some() {
                Some(GeoLocation::us(state, award.awardee_city))
            } else {
                None
            },
            priority_score: Some(score),
            kpi_summary: award
                .funds_obligated
                .as_ref()
                .and_then(value_to_f64)
                .map(|f| format!("Funds obligated ${f:.0}")),
            tags: Vec::new(),
            effective_date: award
                .start_date
                .or(award.date)
                .as_deref()
                .and_then(parse_mdy),
            provenance,
        });
    }

    Ok(projects)
}

pub struct NsfAwardsConnector {
    scorer: KeywordScorer,
}

impl NsfAwardsConnector {
    pub fn new(scorer: KeywordScorer) -> Self {
        Self { scorer }
    }

    async fn fetch_term(&self, client: &Client, term: &str, preset: &Preset) -> Result<Vec<ProjectRecord>> {
        let raw = client
            .get(AWARDS_URL)
            .query(&[("keyword", term), ("printFields", PRINT_FIELDS)])
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .with_context(|| format!("nsf awards request for '{term}'"))?
            .error_for_status()
            .context("nsf awards response status")?
            .text()
            .await
            .context("nsf awards response body")?;
        map_awards_response(&raw, &self.scorer, preset)
    }
}

#[async_trait]
impl SourceConnector for NsfAwardsConnector {
    fn source(&self) -> DataSource {
        DataSource::NsfAwards
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
                    warn!(target: "connectors", source = "nsf_awards", term = %term, error = %e, "term failed, continuing");
                    last_err = Some(e);
                }
            }
        }

        if harvest.total() == 0 {
            if let Some(e) = last_err {
                return Err(e).context("nsf awards produced nothing");
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
            keywords: vec!["microgrid".into()],
            sectors: vec!["energy".into()],
            locations: vec![],
            relevance_threshold: 0.0,
        }
    }

    const PAGE: &str = r#"{
        "response": {
            "award": [
                {
                    "id": "2415991",
                    "title": "Community Microgrid Control for Rural Resilience",
                    "awardeeName": "University of Kentucky",
                    "awardeeStateCode": "KY",
                    "awardeeCity": "Lexington",
                    "fundsObligatedAmt": "499998",
                    "date": "06/15/2024",
                    "startDate": "08/01/2024",
                    "abstractText": "This project develops control software for community microgrids."
                },
                {
                    "id": 17,
                    "title": "Untitled effort"
                }
            ]
        }
    }"#;

    #[test]
    fn maps_awards_into_projects() {
        let projects = map_awards_response(PAGE, &scorer(), &open_preset()).expect("maps");
        assert_eq!(projects.len(), 2);

        let first = &projects[0];
        assert_eq!(first.id, "nsf-2415991");
        assert_eq!(first.institution.as_deref(), Some("University of Kentucky"));
        assert_eq!(
            first.location.as_ref().and_then(|l| l.city.as_deref()),
            Some("Lexington")
        );
        assert_eq!(first.kpi_summary.as_deref(), Some("Funds obligated $499998"));
        // startDate preferred over award date.
        assert_eq!(
            first.effective_date,
            chrono::NaiveDate::from_ymd_opt(2024, 8, 1)
        );
        assert!(first.priority_score.expect("scored") > 50.0);

        let second = &projects[1];
        assert_eq!(second.id, "nsf-17");
        assert!(second.institution.is_none());
        assert!(second.location.is_none());
        assert!(second.effective_date.is_none());
    }

    #[test]
    fn absent_response_block_is_empty() {
        let projects = map_awards_response("{}", &scorer(), &open_preset()).expect("maps");
        assert!(projects.is_empty());
    }
}
