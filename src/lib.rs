// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod connectors;
pub mod enrich;
pub mod merge;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod presets;
pub mod score;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::merge::{merge_records, MergeOutcome, Mergeable};
pub use crate::model::{
    DataSource, DatasetRecord, GrantRecord, IngestionJob, JobStatus, ProjectRecord,
};
pub use crate::pipeline::{DiscoveryEngine, RunSummary, StatusReport};
pub use crate::presets::{Preset, PresetBook};
pub use crate::store::{JsonFileStore, KeyValueStore, MemoryStore};
