// src/connectors/datagov.rs
//! data.gov CKAN connector. Runs `package_search` per term and maps packages
//! into open-dataset records; the pipeline folds those into projects before
//! persistence. Notes arrive with markup, which the normalizer strips later.

use std::collections::{BTreeSet, HashSet};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::model::{record_id, DataSource, DatasetRecord, Provenance};
use crate::presets::Preset;
use crate::score::{meets_threshold, KeywordScorer};

use super::{or_unknown, parse_naive_iso_utc, pause_between_terms, take_terms, Harvest, SourceConnector};

const PACKAGE_SEARCH_URL: &str = "https://catalog.data.gov/api/3/action/package_search";
const ROWS_PER_TERM: u32 = 20;
const MAX_TERMS: usize = 2;

#[derive(Debug, Deserialize)]
struct CkanResponse {
    success: Option<bool>,
    result: Option<CkanResult>,
}

#[derive(Debug, Deserialize)]
struct CkanResult {
    count: Option<i64>,
    results: Option<Vec<CkanPackage>>,
}

#[derive(Debug, Deserialize)]
struct CkanPackage {
    id: Option<String>,
    name: Option<String>,
    title: Option<String>,
    notes: Option<String>,
    metadata_modified: Option<String>,
    organization: Option<CkanOrganization>,
    tags: Option<Vec<CkanTag>>,
    resources: Option<Vec<CkanResource>>,
}

#[derive(Debug, Deserialize)]
struct CkanOrganization {
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CkanTag {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CkanResource {
    format: Option<String>,
    url: Option<String>,
}

/// Map one package_search response into dataset records.
pub fn map_package_search(
    raw: &str,
    scorer: &KeywordScorer,
    preset: &Preset,
) -> Result<Vec<DatasetRecord>> {
    let resp: CkanResponse = serde_json::from_str(raw).context("decode datagov response")?;
    if resp.success == Some(false) {
        bail!("datagov package_search reported failure");
    }
    let result = resp.result.unwrap_or(CkanResult {
        count: None,
        results: None,
    });
    let packages = result.results.unwrap_or_default();
    debug!(
        target: "connectors",
        source = "datagov",
        count = result.count.unwrap_or(0),
        mapped = packages.len(),
        "package page mapped"
    );

    let category = preset
        .sectors
        .first()
        .cloned()
        .unwrap_or_else(|| "open-data".to_string());

    let mut datasets = Vec::with_capacity(packages.len());
    for pkg in packages {
        let external = pkg
            .id
            .clone()
            .or_else(|| pkg.name.clone())
            .unwrap_or_default();
        let title = or_unknown(pkg.title, DataSource::DataGov, "title");
        let description = pkg.notes.unwrap_or_default();
        let publisher = or_unknown(
            pkg.organization.and_then(|o| o.title),
            DataSource::DataGov,
            "organization.title",
        );
        let tags: Vec<String> = pkg
            .tags
            .unwrap_or_default()
            .into_iter()
            .filter_map(|t| t.name)
            .collect();

        let haystack = format!("{title} {description} {}", tags.join(" "));
        let relevance = scorer.score(&haystack, None);
        if !meets_threshold(relevance, preset.relevance_threshold) {
            continue;
        }

        let resources = pkg.resources.unwrap_or_default();
        let formats: Vec<String> = resources
            .iter()
            .filter_map(|r| r.format.as_ref())
            .map(|f| f.trim().to_ascii_uppercase())
            .filter(|f| !f.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let download_url = resources.into_iter().find_map(|r| r.url);
        let landing_url = pkg
            .name
            .as_deref()
            .map(|n| format!("https://catalog.data.gov/dataset/{n}"));

        let mut provenance = Provenance::captured_now(DataSource::DataGov)
            .with_external_id(external.clone());
        if let Some(url) = &landing_url {
            provenance = provenance.with_source_url(url.clone());
        }

        datasets.push(DatasetRecord {
            id: record_id(DataSource::DataGov, &external),
            title,
            description,
            publisher,
            category: category.clone(),
            formats,
            landing_url,
            download_url,
            modified: pkg
                .metadata_modified
                .as_deref()
                .and_then(parse_naive_iso_utc),
            tags,
            relevance_score: relevance,
            provenance,
        });
    }

    Ok(datasets)
}

pub struct DataGovConnector {
    scorer: KeywordScorer,
}

impl DataGovConnector {
    pub fn new(scorer: KeywordScorer) -> Self {
        Self { scorer }
    }

    async fn fetch_term(&self, client: &Client, term: &str, preset: &Preset) -> Result<Vec<DatasetRecord>> {
        let raw = client
            .get(PACKAGE_SEARCH_URL)
            .query(&[("q", term), ("rows", &ROWS_PER_TERM.to_string())])
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .with_context(|| format!("datagov request for '{term}'"))?
            .error_for_status()
            .context("datagov response status")?
            .text()
            .await
            .context("datagov response body")?;
        map_package_search(&raw, &self.scorer, preset)
    }
}

#[async_trait]
impl SourceConnector for DataGovConnector {
    fn source(&self) -> DataSource {
        DataSource::DataGov
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
                Ok(datasets) => {
                    for d in datasets {
                        if seen.insert(d.id.clone()) {
                            harvest.datasets.push(d);
                        }
                    }
                }
                Err(e) => {
                    warn!(target: "connectors", source = "datagov", term = %term, error = %e, "term failed, continuing");
                    last_err = Some(e);
                }
            }
        }

        if harvest.total() == 0 {
            if let Some(e) = last_err {
                return Err(e).context("datagov produced nothing");
            }
        }
        Ok(harvest)
    }
}
