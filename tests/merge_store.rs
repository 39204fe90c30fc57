// tests/merge_store.rs
// Merged record lists written through the JSON file store and read back:
// full serde round trips, recency replacement across store generations, and
// the retention caps over real collections.

use chrono::{DateTime, TimeZone, Utc};

use opengov_scout::merge::{merge_records, PROJECT_CAP};
use opengov_scout::model::{
    DataSource, GeoLocation, GrantRecord, Origin, ProjectRecord, Provenance,
};
use opengov_scout::store::{get_json, set_json, JsonFileStore, KEY_GRANTS, KEY_PROJECTS};

fn captured(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_750_000_000 + secs, 0).single().expect("ts")
}

fn grant(id: &str, secs: i64, title: &str) -> GrantRecord {
    let mut prov = Provenance::captured_now(DataSource::GrantsGov)
        .with_external_id(id)
        .with_source_url(format!("https://www.grants.gov/search-results-detail/{id}"));
    prov.captured_at = captured(secs);
    GrantRecord {
        id: format!("grantsgov-{id}"),
        title: title.to_string(),
        description: "Last-mile buildout for unserved counties.".to_string(),
        agency: "DOC-NTIA".to_string(),
        program_code: Some("11.035".to_string()),
        opportunity_number: Some(format!("NTIA-{id}")),
        close_date: chrono::NaiveDate::from_ymd_opt(2025, 11, 14),
        funding_ceiling: Some(5_000_000.0),
        eligibility: "States and territories".to_string(),
        topics: vec!["posted".to_string()],
        location: Some(GeoLocation::us(Some("KY".to_string()), None)),
        alignment_score: None,
        recommended_category: None,
        provenance: prov,
    }
}

fn project(id: &str, secs: i64) -> ProjectRecord {
    let mut prov = Provenance::captured_now(DataSource::DataGov).with_external_id(id);
    prov.captured_at = captured(secs);
    ProjectRecord {
        id: format!("datagov-{id}"),
        title: format!("Dataset {id}"),
        description: "Open data listing".to_string(),
        sector: "open-data".to_string(),
        origin: Origin::External,
        institution: Some("Civic Data Office".to_string()),
        location: None,
        priority_score: Some(45.0),
        kpi_summary: None,
        tags: vec!["catalog".to_string()],
        effective_date: None,
        provenance: prov,
    }
}

#[tokio::test]
async fn merged_grants_round_trip_through_the_file_store() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = JsonFileStore::new(dir.path());

    let batch = vec![grant("g1", 10, "Broadband Planning"), grant("g2", 11, "Digital Equity")];
    let (merged, outcome) = merge_records(Vec::new(), batch, 150);
    assert_eq!(outcome.inserted, 2);
    set_json(&store, KEY_GRANTS, &merged).await.expect("persist");

    // A fresh handle over the same directory sees the identical records,
    // dates and provenance included.
    let reopened = JsonFileStore::new(dir.path());
    let back: Vec<GrantRecord> = get_json(&reopened, KEY_GRANTS)
        .await
        .expect("read")
        .expect("stored");
    assert_eq!(back, merged);
    assert!(dir.path().join("discovered_grants.json").exists());
}

#[tokio::test]
async fn newer_capture_replaces_through_store_generations() {
    let dir = tempfile::tempdir().expect("tempdir");

    // Generation one: harvested and then enriched.
    {
        let store = JsonFileStore::new(dir.path());
        let mut first = grant("g1", 100, "Original Title");
        first.alignment_score = Some(70.0);
        first.recommended_category = Some("broadband".to_string());
        let (merged, _) = merge_records(Vec::new(), vec![first], 150);
        set_json(&store, KEY_GRANTS, &merged).await.expect("persist");
    }

    // Generation two: the same opportunity re-harvested later, unenriched.
    let store = JsonFileStore::new(dir.path());
    let existing: Vec<GrantRecord> = get_json(&store, KEY_GRANTS)
        .await
        .expect("read")
        .expect("stored");
    let (merged, outcome) =
        merge_records(existing, vec![grant("g1", 200, "Updated Title")], 150);
    assert_eq!(outcome.replaced, 1);
    set_json(&store, KEY_GRANTS, &merged).await.expect("persist");

    let back: Vec<GrantRecord> = get_json(&store, KEY_GRANTS)
        .await
        .expect("read")
        .expect("stored");
    assert_eq!(back.len(), 1);
    assert_eq!(back[0].title, "Updated Title");
    assert_eq!(back[0].provenance.captured_at, captured(200));
    // Enrichment survived the replacement.
    assert_eq!(back[0].alignment_score, Some(70.0));
    assert_eq!(back[0].recommended_category.as_deref(), Some("broadband"));
}

#[tokio::test]
async fn stale_captures_do_not_clobber_stored_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = JsonFileStore::new(dir.path());

    let (merged, _) = merge_records(Vec::new(), vec![grant("g1", 300, "Current")], 150);
    set_json(&store, KEY_GRANTS, &merged).await.expect("persist");

    let existing: Vec<GrantRecord> = get_json(&store, KEY_GRANTS)
        .await
        .expect("read")
        .expect("stored");
    let (merged, outcome) =
        merge_records(existing, vec![grant("g1", 250, "Stale Replay")], 150);
    assert_eq!(outcome.unchanged, 1);
    assert_eq!(outcome.replaced, 0);
    assert_eq!(merged[0].title, "Current");
}

#[tokio::test]
async fn project_cap_holds_over_a_real_collection() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = JsonFileStore::new(dir.path());

    let batch: Vec<ProjectRecord> = (0..PROJECT_CAP + 3)
        .map(|i| project(&format!("p{i:03}"), i as i64))
        .collect();
    let (merged, outcome) = merge_records(Vec::new(), batch, PROJECT_CAP);
    assert_eq!(merged.len(), PROJECT_CAP);
    assert_eq!(outcome.evicted, 3);
    // The three oldest captures fell off the tail.
    assert!(merged.iter().all(|p| p.id != "datagov-p000"));
    assert!(merged.iter().all(|p| p.id != "datagov-p002"));

    set_json(&store, KEY_PROJECTS, &merged).await.expect("persist");
    let back: Vec<ProjectRecord> = get_json(&store, KEY_PROJECTS)
        .await
        .expect("read")
        .expect("stored");
    assert_eq!(back.len(), PROJECT_CAP);
    assert_eq!(back, merged);
}
