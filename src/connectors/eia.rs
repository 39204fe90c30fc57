// src/connectors/eia.rs
//! EIA v2 connector for commercial retail electricity prices. One request per
//! run (the endpoint is not keyword-searchable); rows arrive sorted newest
//! period first, and only the newest row per state is kept. The record id is
//! stable per state so later periods replace earlier ones in the store.

use std::collections::HashSet;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::model::{record_id, DataSource, GeoLocation, Origin, ProjectRecord, Provenance};
use crate::presets::Preset;
use crate::score::commercial_rate_bucket;

use super::{api_key_from_env, value_to_f64, Harvest, SourceConnector};

const RETAIL_SALES_URL: &str = "https://api.eia.gov/v2/electricity/retail-sales/data/";
const ROW_LIMIT: u32 = 60;

pub const ENV_EIA_API_KEY: &str = "EIA_API_KEY";

#[derive(Debug, Deserialize)]
struct EiaResponse {
    response: Option<EiaBody>,
}

#[derive(Debug, Deserialize)]
struct EiaBody {
    data: Option<Vec<EiaRow>>,
}

#[derive(Debug, Deserialize)]
struct EiaRow {
    period: Option<String>,
    stateid: Option<String>,
    #[serde(rename = "stateDescription")]
    state_description: Option<String>,
    /// Numeric in some vintages, string in others.
    price: Option<serde_json::Value>,
    #[serde(rename = "price-units")]
    price_units: Option<String>,
}

/// `YYYY-MM` monthly period to the first of that month.
fn parse_period(period: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(&format!("{}-01", period.trim()), "%Y-%m-%d").ok()
}

/// Map a retail-sales response into one bucket-scored project per state.
pub fn map_retail_sales(raw: &str) -> Result<Vec<ProjectRecord>> {
    let resp: EiaResponse = serde_json::from_str(raw).context("decode eia response")?;
    let rows = resp.response.and_then(|b| b.data).unwrap_or_default();
    debug!(target: "connectors", source = "eia", rows = rows.len(), "retail sales rows mapped");

    let mut seen_states: HashSet<String> = HashSet::new();
    let mut projects = Vec::new();

    for row in rows {
        let state_id = match row.stateid.filter(|s| !s.trim().is_empty()) {
            Some(s) => s.trim().to_ascii_uppercase(),
            None => continue,
        };
        // Rows are sorted newest first; keep only the newest per state.
        if !seen_states.insert(state_id.clone()) {
            continue;
        }

        let price = row.price.as_ref().and_then(value_to_f64).unwrap_or(0.0);
        let units = row
            .price_units
            .unwrap_or_else(|| "cents per kilowatt-hour".to_string());
        let state_name = row
            .state_description
            .unwrap_or_else(|| state_id.clone());
        let period = row.period.unwrap_or_default();

        let external = format!("retail-com-{}", state_id.to_ascii_lowercase());
        let provenance = Provenance::captured_now(DataSource::Eia)
            .with_external_id(external.clone())
            .with_source_url("https://www.eia.gov/electricity/data.php");

        projects.push(ProjectRecord {
            id: record_id(DataSource::Eia, &external),
            title: format!("Commercial electricity price: {state_name}"),
            description: format!(
                "Average commercial retail price {price} {units} for {period}."
            ),
            sector: "energy".to_string(),
            origin: Origin::External,
            institution: None,
            location: Some(GeoLocation::us(Some(state_id), None)),
            priority_score: Some(commercial_rate_bucket(price).points()),
            kpi_summary: None,
            tags: vec!["electricity".to_string(), "rates".to_string()],
            effective_date: parse_period(&period),
            provenance,
        });
    }

    Ok(projects)
}

/// Bucket-scored source: the preset's threshold does not apply here, so the
/// connector ignores keywords entirely.
#[derive(Default)]
pub struct EiaConnector;

impl EiaConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SourceConnector for EiaConnector {
    fn source(&self) -> DataSource {
        DataSource::Eia
    }

    async fn fetch(&self, client: &Client, _preset: &Preset) -> Result<Harvest> {
        let api_key = api_key_from_env(ENV_EIA_API_KEY);
        let raw = client
            .get(RETAIL_SALES_URL)
            .query(&[
                ("api_key", api_key.as_str()),
                ("frequency", "monthly"),
                ("data[0]", "price"),
                ("facets[sectorid][]", "COM"),
                ("sort[0][column]", "period"),
                ("sort[0][direction]", "desc"),
                ("length", &ROW_LIMIT.to_string()),
            ])
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .context("eia retail sales request")?
            .error_for_status()
            .context("eia response status")?
            .text()
            .await
            .context("eia response body")?;

        let projects = map_retail_sales(&raw)?;
        Ok(Harvest {
            projects,
            ..Harvest::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::ScoreBucket;

    const PAGE: &str = r#"{
        "response": {
            "total": "3",
            "data": [
                {
                    "period": "2025-05",
                    "stateid": "CA",
                    "stateDescription": "California",
                    "sectorid": "COM",
                    "price": 22.35,
                    "price-units": "cents per kilowatt-hour"
                },
                {
                    "period": "2025-05",
                    "stateid": "KY",
                    "stateDescription": "Kentucky",
                    "sectorid": "COM",
                    "price": "11.02",
                    "price-units": "cents per kilowatt-hour"
                },
                {
                    "period": "2025-04",
                    "stateid": "CA",
                    "stateDescription": "California",
                    "sectorid": "COM",
                    "price": 21.90,
                    "price-units": "cents per kilowatt-hour"
                }
            ]
        }
    }"#;

    #[test]
    fn keeps_newest_row_per_state() {
        let projects = map_retail_sales(PAGE).expect("maps");
        assert_eq!(projects.len(), 2);
        assert_eq!(projects[0].id, "eia-retail-com-ca");
        assert_eq!(projects[1].id, "eia-retail-com-ky");
        // The April CA row was shadowed by May.
        assert_eq!(
            projects[0].effective_date,
            NaiveDate::from_ymd_opt(2025, 5, 1)
        );
    }

    #[test]
    fn prices_bucket_into_fixed_points() {
        let projects = map_retail_sales(PAGE).expect("maps");
        assert_eq!(
            projects[0].priority_score,
            Some(ScoreBucket::High.points())
        );
        assert_eq!(
            projects[1].priority_score,
            Some(ScoreBucket::Medium.points())
        );
    }

    #[test]
    fn string_prices_parse_like_numbers() {
        let projects = map_retail_sales(PAGE).expect("maps");
        assert!(projects[1].description.contains("11.02"));
    }

    #[test]
    fn rows_without_state_are_skipped() {
        let raw = r#"{"response": {"data": [{"period": "2025-05", "price": 10.0}]}}"#;
        assert!(map_retail_sales(raw).expect("maps").is_empty());
    }
}
