// src/normalize.rs
//! Pure per-record cleanup applied to every batch before it reaches the
//! merge/store layer. Total functions: no I/O, no failure mode.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;

use crate::model::{DatasetRecord, GrantRecord, ProjectRecord};

/// Longest free-text field kept after cleanup. Grant synopses from public APIs
/// can run to tens of kilobytes of markup.
const TEXT_CAP: usize = 2_000;

/// Clean one free-text field: decode HTML entities, strip tags, normalize
/// typographic quotes/dashes, drop non-printable/non-ASCII characters,
/// collapse whitespace runs, trim, cap length.
pub fn clean_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize typographic quotes and dashes to ASCII before the filter below
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace(['\u{2013}', '\u{2014}'], "-");

    // 4) Keep printable ASCII only; everything else becomes a space
    out = out
        .chars()
        .map(|c| if (' '..='~').contains(&c) { c } else { ' ' })
        .collect();

    // 5) Collapse whitespace runs and trim
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").expect("whitespace regex"));
    out = re_ws.replace_all(&out, " ").trim().to_string();

    // 6) Length cap
    if out.len() > TEXT_CAP {
        out.truncate(TEXT_CAP);
        out = out.trim_end().to_string();
    }

    out
}

/// Lowercase, trim, drop empties, deduplicate. Set semantics: the output is
/// sorted, which keeps merged records byte-stable across runs.
pub fn clean_tags<S: AsRef<str>>(tags: &[S]) -> Vec<String> {
    let mut set = BTreeSet::new();
    for tag in tags {
        let t = tag.as_ref().trim().to_ascii_lowercase();
        if !t.is_empty() {
            set.insert(t);
        }
    }
    set.into_iter().collect()
}

/// Clamp a relevance/priority score into 0..=100. NaN degrades to 0.
pub fn clamp_score(score: f32) -> f32 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 100.0)
    }
}

/// Defaulting rule for capture timestamps: a non-positive (epoch-floor)
/// timestamp means the connector could not establish one, so use "now".
pub fn ensure_captured_at(ts: DateTime<Utc>) -> DateTime<Utc> {
    if ts.timestamp() <= 0 {
        Utc::now()
    } else {
        ts
    }
}

pub fn normalize_project(mut p: ProjectRecord) -> ProjectRecord {
    p.title = clean_text(&p.title);
    p.description = clean_text(&p.description);
    p.sector = p.sector.trim().to_ascii_lowercase();
    p.institution = p.institution.map(|i| clean_text(&i)).filter(|i| !i.is_empty());
    p.kpi_summary = p.kpi_summary.map(|k| clean_text(&k)).filter(|k| !k.is_empty());
    p.tags = clean_tags(&p.tags);
    p.priority_score = p.priority_score.map(clamp_score);
    p.provenance.captured_at = ensure_captured_at(p.provenance.captured_at);
    p
}

pub fn normalize_grant(mut g: GrantRecord) -> GrantRecord {
    g.title = clean_text(&g.title);
    g.description = clean_text(&g.description);
    g.agency = clean_text(&g.agency);
    g.eligibility = clean_text(&g.eligibility);
    g.topics = clean_tags(&g.topics);
    g.alignment_score = g.alignment_score.map(clamp_score);
    g.provenance.captured_at = ensure_captured_at(g.provenance.captured_at);
    g
}

pub fn normalize_dataset(mut d: DatasetRecord) -> DatasetRecord {
    d.title = clean_text(&d.title);
    d.description = clean_text(&d.description);
    d.publisher = clean_text(&d.publisher);
    d.category = d.category.trim().to_ascii_lowercase();
    d.tags = clean_tags(&d.tags);
    // Absent relevance is encoded as a non-finite or negative value upstream;
    // clamping doubles as the "default to 0" rule.
    d.relevance_score = clamp_score(d.relevance_score);
    d.provenance.captured_at = ensure_captured_at(d.provenance.captured_at);
    d
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn empty_is_ok() {
        assert_eq!(clean_text(""), "");
    }

    #[test]
    fn strips_html_and_unescapes() {
        let s = "<p>Rural&nbsp;<b>broadband</b> &ldquo;pilot&rdquo;</p>";
        assert_eq!(clean_text(s), r#"Rural broadband "pilot""#);
    }

    #[test]
    fn folds_whitespace_and_drops_nonprintable() {
        let s = "A\u{00A0}\n\tB \u{0007} C\u{2014}D";
        assert_eq!(clean_text(s), "A B C-D");
    }

    #[test]
    fn length_cap_applies() {
        let s = "x".repeat(5_000);
        assert!(clean_text(&s).len() <= TEXT_CAP);
    }

    #[test]
    fn tags_dedup_case_insensitively() {
        let tags = ["Energy", " energy ", "GRID", "grid", "", "solar"];
        assert_eq!(clean_tags(&tags), vec!["energy", "grid", "solar"]);
    }

    #[test]
    fn scores_are_clamped_into_bounds() {
        assert_eq!(clamp_score(-3.0), 0.0);
        assert_eq!(clamp_score(250.0), 100.0);
        assert_eq!(clamp_score(f32::NAN), 0.0);
        assert_eq!(clamp_score(42.5), 42.5);
    }

    #[test]
    fn epoch_floor_timestamps_default_to_now() {
        let floor = Utc.timestamp_opt(0, 0).single().expect("epoch");
        assert!(ensure_captured_at(floor) > floor);

        let real = Utc.timestamp_opt(1_700_000_000, 0).single().expect("ts");
        assert_eq!(ensure_captured_at(real), real);
    }
}
