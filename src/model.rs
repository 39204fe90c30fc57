// src/model.rs
//! Canonical record types shared by every connector and the merge/store layer.
//!
//! Records are created by connectors on every discovery run, replaced wholesale
//! during merge (never partially patched, except the enrichment fields), and
//! dropped only when they fall outside a collection's retention cap.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Known origin systems. One connector per variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    GrantsGov,
    UsaSpending,
    NsfAwards,
    Eia,
    CollegeScorecard,
    DataGov,
    OpenEi,
}

impl DataSource {
    /// Stable id prefix used when building record identifiers.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            DataSource::GrantsGov => "grantsgov",
            DataSource::UsaSpending => "usaspending",
            DataSource::NsfAwards => "nsf",
            DataSource::Eia => "eia",
            DataSource::CollegeScorecard => "scorecard",
            DataSource::DataGov => "datagov",
            DataSource::OpenEi => "openei",
        }
    }

    /// Human-readable label for CLI summaries and logs.
    pub fn label(&self) -> &'static str {
        match self {
            DataSource::GrantsGov => "Grants.gov",
            DataSource::UsaSpending => "USAspending",
            DataSource::NsfAwards => "NSF Awards",
            DataSource::Eia => "EIA",
            DataSource::CollegeScorecard => "College Scorecard",
            DataSource::DataGov => "Data.gov",
            DataSource::OpenEi => "OpenEI",
        }
    }
}

/// Build a collection-unique record id: `<prefix>-<external id>`.
///
/// External ids are trimmed; an empty external id degrades to "unknown" so the
/// record still merges deterministically instead of being dropped.
pub fn record_id(source: DataSource, external: &str) -> String {
    let ext = external.trim();
    if ext.is_empty() {
        format!("{}-unknown", source.id_prefix())
    } else {
        format!("{}-{}", source.id_prefix(), ext)
    }
}

/// Where and when a record was obtained. Immutable once set; `captured_at` is
/// the tiebreaker during merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub source: DataSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    pub captured_at: DateTime<Utc>,
}

impl Provenance {
    /// Stamp provenance at fetch time.
    pub fn captured_now(source: DataSource) -> Self {
        Self {
            source,
            external_id: None,
            source_url: None,
            captured_at: Utc::now(),
        }
    }

    pub fn with_external_id(mut self, id: impl Into<String>) -> Self {
        self.external_id = Some(id.into());
        self
    }

    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }
}

/// Coarse geographic location. Country is the only required component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub country: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
}

impl GeoLocation {
    /// US location with optional state/city, the common case for these sources.
    pub fn us(state: Option<String>, city: Option<String>) -> Self {
        Self {
            country: "USA".to_string(),
            state,
            city,
            lat: None,
            lon: None,
        }
    }
}

/// Whether a project record came from internal work or outside discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Labs,
    Consulting,
    External,
}

/// A discovered project or engagement opportunity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: String,
    pub title: String,
    pub description: String,
    /// Free-form sector label ("education", "energy", ...), lowercased.
    pub sector: String,
    pub origin: Origin,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub institution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoLocation>,
    /// Priority heuristic in 0..=100; `None` when the connector did not score.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kpi_summary: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_date: Option<NaiveDate>,
    pub provenance: Provenance,
}

/// A grant or funding opportunity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrantRecord {
    pub id: String,
    pub title: String,
    pub description: String,
    pub agency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opportunity_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub funding_ceiling: Option<f64>,
    pub eligibility: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoLocation>,
    /// Set by the enrichment step only; 0..=100.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alignment_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommended_category: Option<String>,
    pub provenance: Provenance,
}

/// An open-data catalog entry. Produced by the catalog connector and folded
/// into project records before persistence (the store keeps no dataset key).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub id: String,
    pub title: String,
    pub description: String,
    pub publisher: String,
    pub category: String,
    #[serde(default)]
    pub formats: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub landing_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub relevance_score: f32,
    pub provenance: Provenance,
}

impl DatasetRecord {
    /// Fold a catalog entry into the project collection: same id and
    /// provenance, publisher as institution, relevance as priority.
    pub fn into_project(self) -> ProjectRecord {
        let kpi = self
            .landing_url
            .as_deref()
            .map(|u| format!("Dataset: {u}"));
        ProjectRecord {
            id: self.id,
            title: self.title,
            description: self.description,
            sector: self.category,
            origin: Origin::External,
            institution: Some(self.publisher),
            location: None,
            priority_score: Some(self.relevance_score),
            kpi_summary: kpi,
            tags: self.tags,
            effective_date: self.modified.map(|m| m.date_naive()),
            provenance: self.provenance,
        }
    }
}

/// Lifecycle of one discovery run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

/// Status record for one end-to-end run, appended to a capped job history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionJob {
    pub id: String,
    /// Preset label the run was started with.
    pub source: String,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub records_found: usize,
    pub records_imported: usize,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl IngestionJob {
    pub fn pending(source: impl Into<String>) -> Self {
        let started_at = Utc::now();
        Self {
            id: format!("job-{}", started_at.format("%Y%m%d%H%M%S%3f")),
            source: source.into(),
            status: JobStatus::Pending,
            started_at,
            completed_at: None,
            records_found: 0,
            records_imported: 0,
            errors: Vec::new(),
        }
    }

    pub fn start(&mut self) {
        self.status = JobStatus::Running;
    }

    pub fn complete(&mut self) {
        self.status = JobStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.errors.push(message.into());
    }

    /// Elapsed seconds once the job reached a terminal state.
    pub fn duration_secs(&self) -> Option<i64> {
        self.completed_at
            .map(|done| (done - self.started_at).num_seconds())
    }
}
