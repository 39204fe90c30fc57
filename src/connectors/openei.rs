// src/connectors/openei.rs
//! OpenEI utility rate database connector. One minimal-detail query for
//! commercial rate plans per run; each plan becomes a project record scored
//! by keyword match on the utility and plan names. Start dates arrive as
//! unix seconds.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::DateTime;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::model::{record_id, DataSource, Origin, ProjectRecord, Provenance};
use crate::presets::Preset;
use crate::score::{meets_threshold, KeywordScorer};

use super::{api_key_from_env, or_unknown, value_to_f64, Harvest, SourceConnector};

const UTILITY_RATES_URL: &str = "https://api.openei.org/utility_rates";
const PLAN_LIMIT: u32 = 25;

pub const ENV_OPENEI_API_KEY: &str = "OPENEI_API_KEY";

#[derive(Debug, Deserialize)]
struct UrdbResponse {
    items: Option<Vec<UrdbItem>>,
}

#[derive(Debug, Deserialize)]
struct UrdbItem {
    label: Option<String>,
    utility: Option<String>,
    name: Option<String>,
    uri: Option<String>,
    /// Unix seconds; numeric or string depending on vintage.
    startdate: Option<serde_json::Value>,
}

/// Map a utility-rates response into keyword-scored project records.
pub fn map_utility_rates(
    raw: &str,
    scorer: &KeywordScorer,
    preset: &Preset,
) -> Result<Vec<ProjectRecord>> {
    let resp: UrdbResponse = serde_json::from_str(raw).context("decode openei response")?;
    let items = resp.items.unwrap_or_default();
    debug!(target: "connectors", source = "openei", mapped = items.len(), "rate plans mapped");

    let mut projects = Vec::with_capacity(items.len());
    for item in items {
        let external = item.label.clone().unwrap_or_default();
        let utility = or_unknown(item.utility, DataSource::OpenEi, "utility");
        let name = or_unknown(item.name, DataSource::OpenEi, "name");

        let score = scorer.score(&format!("{utility} {name}"), None);
        if !meets_threshold(score, preset.relevance_threshold) {
            continue;
        }

        let mut provenance = Provenance::captured_now(DataSource::OpenEi)
            .with_external_id(external.clone());
        if let Some(uri) = &item.uri {
            provenance = provenance.with_source_url(uri.clone());
        }

        projects.push(ProjectRecord {
            id: record_id(DataSource::OpenEi, &external),
            title: format!("{utility}: {name}"),
            description: format!("Commercial utility rate plan '{name}' offered by {utility}."),
            sector: "energy".to_string(),
            origin: Origin::External,
            institution: Some(utility),
            location: None,
            priority_score: Some(score),
            kpi_summary: None,
            tags: vec!["utility-rates".to_string()],
            effective_date: item
                .startdate
                .as_ref()
                .and_then(value_to_f64)
                .and_then(|secs| DateTime::from_timestamp(secs as i64, 0))
                .map(|dt| dt.date_naive()),
            provenance,
        });
    }

    Ok(projects)
}

pub struct OpenEiConnector {
    scorer: KeywordScorer,
}

impl OpenEiConnector {
    pub fn new(scorer: KeywordScorer) -> Self {
        Self { scorer }
    }
}

#[async_trait]
impl SourceConnector for OpenEiConnector {
    fn source(&self) -> DataSource {
        DataSource::OpenEi
    }

    async fn fetch(&self, client: &Client, preset: &Preset) -> Result<Harvest> {
        let api_key = api_key_from_env(ENV_OPENEI_API_KEY);
        let raw = client
            .get(UTILITY_RATES_URL)
            .query(&[
                ("version", "latest"),
                ("format", "json"),
                ("api_key", api_key.as_str()),
                ("country", "USA"),
                ("sector", "Commercial"),
                ("detail", "minimal"),
                ("limit", &PLAN_LIMIT.to_string()),
            ])
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .context("openei utility rates request")?
            .error_for_status()
            .context("openei response status")?
            .text()
            .await
            .context("openei response body")?;

        let projects = map_utility_rates(&raw, &self.scorer, preset)?;
        Ok(Harvest {
            projects,
            ..Harvest::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::{KeywordScorer, PriorityTerms};

    fn scorer() -> KeywordScorer {
        let terms = PriorityTerms {
            base_score: 20.0,
            keyword_points: 30.0,
            keywords: vec!["solar".into(), "time-of-use".into()],
            focus_points: 0.0,
            focus_terms: vec![],
            state_points: 0.0,
            states: vec![],
        };
        KeywordScorer::new(terms)
    }

    fn preset(threshold: f32) -> Preset {
        Preset {
            keywords: vec!["commercial rates".into()],
            sectors: vec!["energy".into()],
            locations: vec![],
            relevance_threshold: threshold,
        }
    }

    const PAGE: &str = r#"{
        "items": [
            {
                "label": "539f6a23ec4f024411ec8bf9",
                "utility": "Kentucky Utilities Co",
                "name": "Commercial Time-of-Use Service",
                "uri": "https://apps.openei.org/USURDB/rate/view/539f6a23ec4f024411ec8bf9",
                "approved": true,
                "startdate": 1388534400
            },
            {
                "label": "63aa1e2b7f",
                "utility": "Plains Electric",
                "name": "General Service"
            }
        ]
    }"#;

    #[test]
    fn maps_rate_plans_into_projects() {
        let projects = map_utility_rates(PAGE, &scorer(), &preset(0.0)).expect("maps");
        assert_eq!(projects.len(), 2);

        let first = &projects[0];
        assert_eq!(first.id, "openei-539f6a23ec4f024411ec8bf9");
        assert_eq!(first.title, "Kentucky Utilities Co: Commercial Time-of-Use Service");
        assert_eq!(first.institution.as_deref(), Some("Kentucky Utilities Co"));
        assert_eq!(
            first.provenance.source_url.as_deref(),
            Some("https://apps.openei.org/USURDB/rate/view/539f6a23ec4f024411ec8bf9")
        );
        // 2014-01-01 from unix seconds.
        assert_eq!(
            first.effective_date,
            chrono::NaiveDate::from_ymd_opt(2014, 1, 1)
        );
        assert_eq!(first.priority_score, Some(50.0));
    }

    #[test]
    fn threshold_filters_plain_tariffs() {
        let projects = map_utility_rates(PAGE, &scorer(), &preset(0.40)).expect("maps");
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].title, "Kentucky Utilities Co: Commercial Time-of-Use Service");
    }

    #[test]
    fn empty_items_map_to_empty() {
        assert!(map_utility_rates("{}", &scorer(), &preset(0.0))
            .expect("maps")
            .is_empty());
    }
}
