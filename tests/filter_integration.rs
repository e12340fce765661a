//! Integration tests for filtering stored records.

use paperspider_core::filter::apply;
use paperspider_core::{
    ArtifactPayload, ArtifactUpdate, FilterField, FilterRule, FilterSet, MatchMode, PaperRecord,
    Store, sync,
};

mod support;
use support::{MockSource, paper, temp_store};

fn titles(records: &[&PaperRecord]) -> Vec<String> {
    records.iter().map(|r| r.title.clone()).collect()
}

/// Store holding "Graph Nets", "Graph Attention Networks" and "Tree Models",
/// with an abstract fetched for the second one.
async fn graph_store() -> (tempfile::TempDir, Store) {
    let (dir, store) = temp_store().await;
    let source = MockSource::new("neurips").with_listing(vec![
        paper("a", "Graph Nets"),
        paper("b", "Graph Attention Networks"),
        paper("c", "Tree Models").with_keywords(["transformer"]),
    ]);
    sync(&source, &store).await.unwrap();
    store
        .mark_artifact(
            &store.dataset().key("b"),
            ArtifactUpdate::Fetched(ArtifactPayload::Abstract(
                "We apply masked self-attention to graph-structured data.".into(),
            )),
        )
        .await
        .unwrap();
    (dir, store)
}

fn graph_filter() -> FilterSet {
    FilterSet::new()
        .with_rule(FilterRule::new(FilterField::Title, MatchMode::Contains, "graph").must())
        .with_rule(FilterRule::new(FilterField::Abstract, MatchMode::Contains, "attention").should())
        .with_rule(
            FilterRule::new(FilterField::Keywords, MatchMode::Contains, "transformer").should(),
        )
        .with_min_should_match(1)
}

#[tokio::test]
async fn test_must_and_should_select_over_stored_records() {
    let (_dir, store) = graph_store().await;
    let records = store.records().await.unwrap();

    let selected = apply(&graph_filter(), &records);

    assert_eq!(titles(&selected), vec!["Graph Attention Networks"]);
}

#[tokio::test]
async fn test_repeated_evaluation_is_deterministic() {
    let (_dir, store) = graph_store().await;
    let records = store.records().await.unwrap();
    let set = graph_filter();

    let first = titles(&apply(&set, &records));
    for _ in 0..5 {
        assert_eq!(titles(&apply(&set, &records)), first);
    }
}

#[tokio::test]
async fn test_without_should_rules_only_must_and_must_not_count() {
    let (_dir, store) = graph_store().await;
    let records = store.records().await.unwrap();
    let set = FilterSet::new()
        .with_rule(FilterRule::new(FilterField::Title, MatchMode::Contains, "graph").must())
        .with_rule(FilterRule::new(FilterField::All, MatchMode::Contains, "masked").must_not())
        .with_min_should_match(3);

    let selected = apply(&set, &records);

    assert_eq!(titles(&selected), vec!["Graph Nets"]);
}

#[tokio::test]
async fn test_parsed_rules_match_keywords_case_insensitively() {
    let (_dir, store) = graph_store().await;
    let records = store.records().await.unwrap();
    let set = FilterSet::new().with_rule("keywords:contains:TRANSFORMER".parse::<FilterRule>().unwrap().must());

    let selected = apply(&set, &records);

    assert_eq!(titles(&selected), vec!["Tree Models"]);
}

#[tokio::test]
async fn test_empty_filter_keeps_everything() {
    let (_dir, store) = graph_store().await;
    let records = store.records().await.unwrap();

    assert_eq!(apply(&FilterSet::new(), &records).len(), 3);
}
