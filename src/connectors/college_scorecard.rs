// src/connectors/college_scorecard.rs
//! College Scorecard connector. Pulls institution profiles (name, state,
//! Pell grant rate, enrollment) and bucket-scores them by Pell rate. The
//! response is a flat map with dotted field names, mirrored verbatim in the
//! raw struct renames. Preset locations narrow the query when present.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::model::{record_id, DataSource, GeoLocation, Origin, ProjectRecord, Provenance};
use crate::presets::Preset;
use crate::score::pell_rate_bucket;

use super::{api_key_from_env, or_unknown, value_to_f64, value_to_string, Harvest, SourceConnector};

const SCHOOLS_URL: &str = "https://api.data.gov/ed/collegescorecard/v1/schools";
const FIELDS: &str =
    "id,school.name,school.state,school.city,latest.student.size,latest.aid.pell_grant_rate";
const PAGE_SIZE: u32 = 50;

pub const ENV_DATA_GOV_API_KEY: &str = "DATA_GOV_API_KEY";

#[derive(Debug, Deserialize)]
struct ScorecardResponse {
    results: Option<Vec<SchoolRow>>,
}

#[derive(Debug, Deserialize)]
struct SchoolRow {
    id: Option<serde_json::Value>,
    #[serde(rename = "school.name")]
    name: Option<String>,
    #[serde(rename = "school.state")]
    state: Option<String>,
    #[serde(rename = "school.city")]
    city: Option<String>,
    #[serde(rename = "latest.student.size")]
    size: Option<serde_json::Value>,
    #[serde(rename = "latest.aid.pell_grant_rate")]
    pell_rate: Option<serde_json::Value>,
}

/// Map one schools page into Pell-bucket-scored project records.
pub fn map_schools_response(raw: &str) -> Result<Vec<ProjectRecord>> {
    let resp: ScorecardResponse =
        serde_json::from_str(raw).context("decode college scorecard response")?;
    let rows = resp.results.unwrap_or_default();
    debug!(target: "connectors", source = "college_scorecard", mapped = rows.len(), "schools page mapped");

    let mut projects = Vec::with_capacity(rows.len());
    for row in rows {
        let external = row
            .id
            .as_ref()
            .and_then(value_to_string)
            .unwrap_or_default();
        let name = or_unknown(row.name, DataSource::CollegeScorecard, "school.name");
        let pell = row
            .pell_rate
            .as_ref()
            .and_then(value_to_f64)
            .unwrap_or(0.0);
        let size = row.size.as_ref().and_then(value_to_f64);
        let state = row.state.filter(|s| !s.trim().is_empty());

        let description = match size {
            Some(n) => format!(
                "Pell grant rate {:.0}% across {n:.0} enrolled students.",
                pell * 100.0
            ),
            None => format!("Pell grant rate {:.0}%.", pell * 100.0),
        };

        let provenance = Provenance::captured_now(DataSource::CollegeScorecard)
            .with_external_id(external.clone())
            .with_source_url(format!(
                "https://collegescorecard.ed.gov/school/?{external}"
            ));

        projects.push(ProjectRecord {
            id: record_id(DataSource::CollegeScorecard, &external),
            title: format!("Student aid profile: {name}"),
            description,
            sector: "education".to_string(),
            origin: Origin::External,
            institution: Some(name),
            location: if state.is_some() || row.city.is_some() {
                Some(GeoLocation::us(state, row.city))
            } else {
                None
            },
            priority_score: Some(pell_rate_bucket(pell).points()),
            kpi_summary: None,
            tags: vec!["education".to_string(), "pell".to_string()],
            effective_date: None,
            provenance,
        });
    }

    Ok(projects)
}

/// Bucket-scored source; keyword threshold does not apply. Preset locations
/// become a `school.state` facet on the query.
#[derive(Default)]
pub struct CollegeScorecardConnector;

impl CollegeScorecardConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SourceConnector for CollegeScorecardConnector {
    fn source(&self) -> DataSource {
        DataSource::CollegeScorecard
    }

    async fn fetch(&self, client: &Client, preset: &Preset) -> Result<Harvest> {
        let api_key = api_key_from_env(ENV_DATA_GOV_API_KEY);
        let per_page = PAGE_SIZE.to_string();
        let mut query: Vec<(&str, String)> = vec![
            ("api_key", api_key),
            ("fields", FIELDS.to_string()),
            ("per_page", per_page),
        ];
        if !preset.locations.is_empty() {
            query.push(("school.state", preset.locations.join(",")));
        }

        let raw = client
            .get(SCHOOLS_URL)
            .query(&query)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .context("college scorecard request")?
            .error_for_status()
            .context("college scorecard response status")?
            .text()
            .await
            .context("college scorecard response body")?;

        let projects = map_schools_response(&raw)?;
        Ok(Harvest {
            projects,
            ..Harvest::default()
        })
    }
}
