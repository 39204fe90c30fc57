// src/merge.rs
//! Merge-by-id for persisted record lists. One rule: a record replaces its
//! stored counterpart only when captured strictly later. Replacement carries
//! sticky fields forward so a plain re-harvest never erases enrichment, and
//! the result is sorted newest-first and truncated to the retention cap.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::model::{GrantRecord, ProjectRecord};

/// Retention cap for the project list.
pub const PROJECT_CAP: usize = 200;
/// Retention cap for the grant list.
pub const GRANT_CAP: usize = 150;
/// Retention cap for the job history ring.
pub const JOB_HISTORY_CAP: usize = 25;

pub trait Mergeable {
    fn merge_id(&self) -> &str;
    fn captured_at(&self) -> DateTime<Utc>;
    /// Carry sticky fields forward from the record being replaced. Scores
    /// only ever go up across merges; enrichment text survives runs that
    /// skipped enrichment.
    fn absorb(&mut self, prior: &Self);
}

fn max_score(new: Option<f32>, old: Option<f32>) -> Option<f32> {
    match (new, old) {
        (Some(n), Some(o)) => Some(n.max(o)),
        (a, b) => a.or(b),
    }
}

impl Mergeable for ProjectRecord {
    fn merge_id(&self) -> &str {
        &self.id
    }

    fn captured_at(&self) -> DateTime<Utc> {
        self.provenance.captured_at
    }

    fn absorb(&mut self, prior: &Self) {
        self.priority_score = max_score(self.priority_score, prior.priority_score);
        if self.kpi_summary.is_none() {
            self.kpi_summary = prior.kpi_summary.clone();
        }
    }
}

impl Mergeable for GrantRecord {
    fn merge_id(&self) -> &str {
        &self.id
    }

    fn captured_at(&self) -> DateTime<Utc> {
        self.provenance.captured_at
    }

    fn absorb(&mut self, prior: &Self) {
        self.alignment_score = max_score(self.alignment_score, prior.alignment_score);
        if self.recommended_category.is_none() {
            self.recommended_category = prior.recommended_category.clone();
        }
    }
}

/// Counts reported back to the job record and run logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub inserted: usize,
    pub replaced: usize,
    pub unchanged: usize,
    pub evicted: usize,
}

/// Merge `incoming` into `existing`, returning the new list and the tally.
/// Re-applying the same batch is a no-op apart from `unchanged` counts.
pub fn merge_records<T: Mergeable>(
    existing: Vec<T>,
    incoming: Vec<T>,
    cap: usize,
) -> (Vec<T>, MergeOutcome) {
    let mut outcome = MergeOutcome::default();
    let mut by_id: HashMap<String, T> = HashMap::with_capacity(existing.len() + incoming.len());

    // A stored list written by an older build could carry duplicate ids;
    // collapse them to the newest before merging on top.
    for rec in existing {
        match by_id.entry(rec.merge_id().to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(rec);
            }
            Entry::Occupied(mut slot) => {
                if rec.captured_at() > slot.get().captured_at() {
                    slot.insert(rec);
                }
            }
        }
    }

    for mut rec in incoming {
        match by_id.entry(rec.merge_id().to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(rec);
                outcome.inserted += 1;
            }
            Entry::Occupied(mut slot) => {
                if rec.captured_at() > slot.get().captured_at() {
                    rec.absorb(slot.get());
                    slot.insert(rec);
                    outcome.replaced += 1;
                } else {
                    outcome.unchanged += 1;
                }
            }
        }
    }

    let mut merged: Vec<T> = by_id.into_values().collect();
    merged.sort_by(|a, b| {
        b.captured_at()
            .cmp(&a.captured_at())
            .then_with(|| a.merge_id().cmp(b.merge_id()))
    });

    if merged.len() > cap {
        outcome.evicted = merged.len() - cap;
        merged.truncate(cap);
    }

    (merged, outcome)
}
