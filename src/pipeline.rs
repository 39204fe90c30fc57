// src/pipeline.rs
//! Discovery orchestration: fetch -> normalize -> merge/persist -> enrich ->
//! re-persist, with one ingestion-job record per run.
//!
//! Connector failures (errors or panics) degrade to an empty contribution and
//! an entry in the job's error list; only merge/persist failures fail the
//! whole job. Enrichment can only ever add derived fields, never block a run.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use once_cell::sync::OnceCell;
use serde::de::DeserializeOwned;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::connectors::{http_client, Harvest, SourceConnector};
use crate::enrich::{DynEnrichmentClient, EnrichmentRequest, ItemType};
use crate::merge::{merge_records, MergeOutcome, GRANT_CAP, JOB_HISTORY_CAP, PROJECT_CAP};
use crate::model::{DatasetRecord, GrantRecord, IngestionJob, ProjectRecord};
use crate::normalize::{normalize_dataset, normalize_grant, normalize_project};
use crate::presets::Preset;
use crate::store::{get_json, set_json, KeyValueStore, KEY_GRANTS, KEY_JOBS, KEY_LAST_RUN, KEY_PROJECTS};

/// Most records enriched in one run, grants first.
pub const ENRICH_SLICE: usize = 20;

/// One-time metrics registration.
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "discovery_records_total",
            "Records mapped by connectors before merge."
        );
        describe_counter!(
            "discovery_kept_total",
            "Records inserted or replaced by merge."
        );
        describe_counter!(
            "discovery_connector_errors_total",
            "Connector-level fetch failures."
        );
        describe_counter!("discovery_runs_total", "Completed discovery runs.");
        describe_histogram!(
            "discovery_fetch_ms",
            "Per-connector fetch time in milliseconds."
        );
        describe_gauge!(
            "discovery_last_run_ts",
            "Unix ts of the last completed run."
        );
    });
}

/// Everything the CLI reports after a run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub job: IngestionJob,
    pub projects: MergeOutcome,
    pub grants: MergeOutcome,
    pub enriched_grants: usize,
    pub enriched_projects: usize,
}

/// Snapshot of stored state for `status`.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub last_run: Option<String>,
    pub project_count: usize,
    pub grant_count: usize,
    pub jobs: Vec<IngestionJob>,
}

pub struct DiscoveryEngine {
    connectors: Vec<Arc<dyn SourceConnector>>,
    store: Arc<dyn KeyValueStore>,
    enrichment: DynEnrichmentClient,
}

impl DiscoveryEngine {
    pub fn new(
        connectors: Vec<Arc<dyn SourceConnector>>,
        store: Arc<dyn KeyValueStore>,
        enrichment: DynEnrichmentClient,
    ) -> Self {
        Self {
            connectors,
            store,
            enrichment,
        }
    }

    /// Run one discovery pass for a named preset.
    pub async fn run(&self, preset_name: &str, preset: &Preset, enrich: bool) -> Result<RunSummary> {
        ensure_metrics_described();

        let mut job = IngestionJob::pending(preset_name);
        job.start();
        info!(
            target: "pipeline",
            job = %job.id,
            preset = preset_name,
            connectors = self.connectors.len(),
            "discovery run started"
        );

        let (harvest, errors) = self.fetch_stage(preset).await;
        job.errors = errors;

        let harvest = normalize_stage(harvest);
        job.records_found = harvest.total();

        let (proj_outcome, grant_outcome) = match self.merge_stage(harvest).await {
            Ok(outcomes) => outcomes,
            Err(e) => {
                let msg = format!("{e:#}");
                job.fail(msg);
                if let Err(append_err) = self.append_job(&job).await {
                    warn!(target: "pipeline", error = %append_err, "could not record failed job");
                }
                return Err(e);
            }
        };
        job.records_imported = proj_outcome.inserted
            + proj_outcome.replaced
            + grant_outcome.inserted
            + grant_outcome.replaced;

        let (enriched_grants, enriched_projects) = if enrich {
            match self.enrich_stage().await {
                Ok(counts) => counts,
                Err(e) => {
                    // Enrichment persistence trouble is recoverable: the
                    // merged state is already on disk.
                    warn!(target: "pipeline", error = %e, "enrichment stage failed, continuing");
                    job.errors.push(format!("enrichment: {e:#}"));
                    (0, 0)
                }
            }
        } else {
            debug!(target: "pipeline", "enrichment skipped");
            (0, 0)
        };

        job.complete();
        let now = Utc::now();
        set_json(self.store.as_ref(), KEY_LAST_RUN, &now.to_rfc3339())
            .await
            .context("persist last run timestamp")?;
        self.append_job(&job).await?;

        counter!("discovery_kept_total").increment(job.records_imported as u64);
        counter!("discovery_runs_total").increment(1);
        gauge!("discovery_last_run_ts").set(now.timestamp() as f64);
        info!(
            target: "pipeline",
            job = %job.id,
            found = job.records_found,
            imported = job.records_imported,
            errors = job.errors.len(),
            "discovery run finished"
        );

        Ok(RunSummary {
            job,
            projects: proj_outcome,
            grants: grant_outcome,
            enriched_grants,
            enriched_projects,
        })
    }

    /// Fan all connectors out concurrently; requests stay sequential inside
    /// each one. A failed or panicked connector becomes an error-list entry.
    async fn fetch_stage(&self, preset: &Preset) -> (Harvest, Vec<String>) {
        let client = match http_client() {
            Ok(c) => c,
            Err(e) => return (Harvest::default(), vec![format!("http client: {e:#}")]),
        };

        let mut tasks = JoinSet::new();
        for connector in &self.connectors {
            let connector = Arc::clone(connector);
            let client = client.clone();
            let preset = preset.clone();
            tasks.spawn(async move {
                let started = Instant::now();
                let outcome = connector.fetch(&client, &preset).await;
                (connector.source(), started.elapsed(), outcome)
            });
        }

        let mut harvest = Harvest::default();
        let mut errors = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((source, elapsed, Ok(part))) => {
                    histogram!("discovery_fetch_ms").record(elapsed.as_millis() as f64);
                    counter!("discovery_records_total").increment(part.total() as u64);
                    info!(
                        target: "pipeline",
                        source = source.label(),
                        records = part.total(),
                        ms = elapsed.as_millis() as u64,
                        "connector finished"
                    );
                    harvest.absorb(part);
                }
                Ok((source, _, Err(e))) => {
                    warn!(target: "pipeline", source = source.label(), error = %e, "connector failed");
                    counter!("discovery_connector_errors_total").increment(1);
                    errors.push(format!("{}: {e:#}", source.label()));
                }
                Err(join_err) => {
                    warn!(target: "pipeline", error = %join_err, "connector task panicked");
                    counter!("discovery_connector_errors_total").increment(1);
                    errors.push(format!("connector task: {join_err}"));
                }
            }
        }

        (harvest, errors)
    }

    /// Fold datasets into projects, merge both collections against the store,
    /// persist. This is the serialization point of the run.
    async fn merge_stage(&self, harvest: Harvest) -> Result<(MergeOutcome, MergeOutcome)> {
        let Harvest {
            mut projects,
            grants,
            datasets,
        } = harvest;
        projects.extend(datasets.into_iter().map(DatasetRecord::into_project));

        let existing: Vec<ProjectRecord> = self.load_list(KEY_PROJECTS).await;
        let (merged, proj_outcome) = merge_records(existing, projects, PROJECT_CAP);
        set_json(self.store.as_ref(), KEY_PROJECTS, &merged)
            .await
            .context("persist projects")?;

        let existing: Vec<GrantRecord> = self.load_list(KEY_GRANTS).await;
        let (merged, grant_outcome) = merge_records(existing, grants, GRANT_CAP);
        set_json(self.store.as_ref(), KEY_GRANTS, &merged)
            .await
            .context("persist grants")?;

        info!(
            target: "pipeline",
            projects_inserted = proj_outcome.inserted,
            projects_replaced = proj_outcome.replaced,
            projects_evicted = proj_outcome.evicted,
            grants_inserted = grant_outcome.inserted,
            grants_replaced = grant_outcome.replaced,
            grants_evicted = grant_outcome.evicted,
            "merge complete"
        );
        Ok((proj_outcome, grant_outcome))
    }

    /// Patch derived fields onto a bounded slice of stored records: grants
    /// first (alignment + category, summary fills an empty description), then
    /// projects (KPI summary) with whatever budget remains.
    async fn enrich_stage(&self) -> Result<(usize, usize)> {
        if self.enrichment.provider_name() == "disabled" {
            debug!(target: "pipeline", "enrichment client disabled");
            return Ok((0, 0));
        }

        let mut budget = ENRICH_SLICE;
        let mut grants: Vec<GrantRecord> = self.load_list(KEY_GRANTS).await;
        let mut grants_done = 0;
        for grant in grants.iter_mut() {
            if budget == 0 {
                break;
            }
            if grant.alignment_score.is_some() {
                continue;
            }
            budget -= 1;
            let req = EnrichmentRequest {
                title: &grant.title,
                snippet: &grant.description,
                item_type: ItemType::Grant,
            };
            if let Some(enrichment) = self.enrichment.enrich(&req).await {
                grant.alignment_score = Some(enrichment.alignment);
                if !enrichment.category.is_empty() {
                    grant.recommended_category = Some(enrichment.category);
                }
                if grant.description.is_empty() {
                    grant.description = enrichment.summary;
                }
                grants_done += 1;
            }
        }

        let mut projects: Vec<ProjectRecord> = self.load_list(KEY_PROJECTS).await;
        let mut projects_done = 0;
        for project in projects.iter_mut() {
            if budget == 0 {
                break;
            }
            if project.kpi_summary.is_some() {
                continue;
            }
            budget -= 1;
            let req = EnrichmentRequest {
                title: &project.title,
                snippet: &project.description,
                item_type: ItemType::Project,
            };
            if let Some(enrichment) = self.enrichment.enrich(&req).await {
                project.kpi_summary = Some(enrichment.summary);
                projects_done += 1;
            }
        }

        if grants_done > 0 {
            set_json(self.store.as_ref(), KEY_GRANTS, &grants)
                .await
                .context("persist enriched grants")?;
        }
        if projects_done > 0 {
            set_json(self.store.as_ref(), KEY_PROJECTS, &projects)
                .await
                .context("persist enriched projects")?;
        }
        info!(
            target: "pipeline",
            grants = grants_done,
            projects = projects_done,
            provider = self.enrichment.provider_name(),
            "enrichment complete"
        );
        Ok((grants_done, projects_done))
    }

    /// Prepend the job to the capped history ring.
    async fn append_job(&self, job: &IngestionJob) -> Result<()> {
        let mut jobs: Vec<IngestionJob> = self.load_list(KEY_JOBS).await;
        jobs.insert(0, job.clone());
        jobs.truncate(JOB_HISTORY_CAP);
        set_json(self.store.as_ref(), KEY_JOBS, &jobs)
            .await
            .context("persist job history")
    }

    /// Stored list reader that treats corrupt JSON as empty. Losing a corrupt
    /// list to a fresh run beats refusing to run at all.
    async fn load_list<T: DeserializeOwned>(&self, key: &str) -> Vec<T> {
        match get_json::<Vec<T>>(self.store.as_ref(), key).await {
            Ok(Some(list)) => list,
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(target: "pipeline", key, error = %e, "stored list unreadable, starting empty");
                Vec::new()
            }
        }
    }
}

/// Pure per-record cleanup over a whole harvest.
pub fn normalize_stage(harvest: Harvest) -> Harvest {
    Harvest {
        projects: harvest.projects.into_iter().map(normalize_project).collect(),
        grants: harvest.grants.into_iter().map(normalize_grant).collect(),
        datasets: harvest.datasets.into_iter().map(normalize_dataset).collect(),
    }
}

/// Read the status snapshot without running anything.
pub async fn load_status(store: &dyn KeyValueStore) -> Result<StatusReport> {
    let last_run: Option<String> = get_json(store, KEY_LAST_RUN).await.unwrap_or_default();
    let projects: Vec<ProjectRecord> = get_json(store, KEY_PROJECTS)
        .await
        .unwrap_or_default()
        .unwrap_or_default();
    let grants: Vec<GrantRecord> = get_json(store, KEY_GRANTS)
        .await
        .unwrap_or_default()
        .unwrap_or_default();
    let jobs: Vec<IngestionJob> = get_json(store, KEY_JOBS)
        .await
        .unwrap_or_default()
        .unwrap_or_default();

    Ok(StatusReport {
        last_run,
        project_count: projects.len(),
        grant_count: grants.len(),
        jobs,
    })
}
