// tests/providers_eia.rs
// Fixture-driven checks for the EIA retail-sales mapping: newest-period-wins
// per state, string prices, and fixed bucket points.

use std::fs;

use opengov_scout::connectors::eia::map_retail_sales;
use opengov_scout::score::ScoreBucket;

fn fixture() -> String {
    fs::read_to_string("tests/fixtures/eia_retail_sales.json")
        .expect("missing tests/fixtures/eia_retail_sales.json")
}

#[test]
fn retail_fixture_keeps_newest_period_per_state() {
    let projects = map_retail_sales(&fixture()).expect("fixture maps");
    // Six rows in: the April CA/KY rows are shadowed by May, and the
    // stateless row is skipped outright.
    assert_eq!(projects.len(), 3);

    let ids: Vec<&str> = projects.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(
        ids,
        vec!["eia-retail-com-ca", "eia-retail-com-ky", "eia-retail-com-wv"]
    );
    assert!(projects
        .iter()
        .all(|p| p.effective_date == chrono::NaiveDate::from_ymd_opt(2025, 5, 1)));
}

#[test]
fn prices_bucket_against_fixed_boundaries() {
    let projects = map_retail_sales(&fixture()).expect("fixture maps");

    // CA 22.35 is High, KY 11.02 Medium, WV 9.87 Low.
    assert_eq!(projects[0].priority_score, Some(ScoreBucket::High.points()));
    assert_eq!(
        projects[1].priority_score,
        Some(ScoreBucket::Medium.points())
    );
    assert_eq!(projects[2].priority_score, Some(ScoreBucket::Low.points()));

    // The KY price arrives as a string and still lands in the description.
    assert!(projects[1].description.contains("11.02"));
    assert_eq!(
        projects[1].title,
        "Commercial electricity price: Kentucky"
    );
}
