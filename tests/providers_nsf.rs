// tests/providers_nsf.rs
// Fixture-driven checks for the NSF awards mapping: string amounts, the
// startDate-over-date preference, and threshold filtering.

use std::fs;

use opengov_scout::connectors::nsf_awards::map_awards_response;
use opengov_scout::presets::Preset;
use opengov_scout::score::{KeywordScorer, PriorityTerms};

fn scorer() -> KeywordScorer {
    KeywordScorer::new(PriorityTerms::default())
}

fn preset(threshold: f32) -> Preset {
    Preset {
        keywords: vec!["microgrid".into()],
        sectors: vec!["energy".into()],
        locations: vec![],
        relevance_threshold: threshold,
    }
}

fn fixture() -> String {
    fs::read_to_string("tests/fixtures/nsf_awards.json")
        .expect("missing tests/fixtures/nsf_awards.json")
}

#[test]
fn awards_fixture_maps_institutions_and_dates() {
    let projects = map_awards_response(&fixture(), &scorer(), &preset(0.0)).expect("fixture maps");
    assert_eq!(projects.len(), 3);

    let microgrid = &projects[0];
    assert_eq!(microgrid.id, "nsf-2415991");
    assert_eq!(
        microgrid.institution.as_deref(),
        Some("University of Kentucky Research Foundation")
    );
    assert_eq!(
        microgrid.location.as_ref().and_then(|l| l.state.as_deref()),
        Some("KY")
    );
    assert_eq!(
        microgrid.location.as_ref().and_then(|l| l.city.as_deref()),
        Some("Lexington")
    );
    // The string amount parses like a number.
    assert_eq!(
        microgrid.kpi_summary.as_deref(),
        Some("Funds obligated $499998")
    );
    // startDate wins over the award date.
    assert_eq!(
        microgrid.effective_date,
        chrono::NaiveDate::from_ymd_opt(2024, 8, 1)
    );
    assert_eq!(microgrid.priority_score, Some(70.0));
    assert_eq!(microgrid.sector, "energy");

    let pathways = &projects[1];
    assert_eq!(pathways.id, "nsf-2430877");
    assert_eq!(pathways.priority_score, Some(70.0));

    // Numeric id, no startDate: the award date fills in.
    let moduli = &projects[2];
    assert_eq!(moduli.id, "nsf-2391114");
    assert_eq!(
        moduli.effective_date,
        chrono::NaiveDate::from_ymd_opt(2024, 5, 1)
    );
    assert_eq!(moduli.priority_score, Some(25.0));
}

#[test]
fn threshold_drops_off_mission_awards() {
    let projects = map_awards_response(&fixture(), &scorer(), &preset(0.30)).expect("fixture maps");
    assert_eq!(projects.len(), 2);
    assert!(projects.iter().all(|p| p.id != "nsf-2391114"));
}
