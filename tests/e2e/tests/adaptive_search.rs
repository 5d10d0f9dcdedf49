//! Adaptive search journeys: threshold relaxation across passes and
//! recovery of weak matches at the floor.

use cartomem_core::{
    AdaptiveSearch, LocalIndex, NavigationState, RelevanceEngine, Zoom, RELEVANCE_FLOOR,
};
use cartomem_e2e::{record, vector_with_similarity};
use chrono::Utc;

const DIM: usize = 8;

fn query() -> Vec<f64> {
    let mut v = vec![0.0; DIM];
    v[0] = 1.0;
    v
}

#[tokio::test]
async fn widening_passes_reach_the_target() {
    // Twenty near-misses: similarities spread over 0.18..0.42, all below
    // the entity threshold of 0.45
    let index = LocalIndex::new(DIM);
    for i in 0..20 {
        let sim = 0.18 + (i as f64) * (0.42 - 0.18) / 19.0;
        index
            .add(record(
                &format!("banana-{}", i),
                "banana notes",
                "ripeness observations for bananas",
                Some(vector_with_similarity(DIM, sim)),
            ))
            .unwrap();
    }

    let state = NavigationState::defaults();
    let result = AdaptiveSearch::default()
        .run(&index, &query(), &state)
        .await
        .unwrap();

    assert_eq!(result.passes, 2);
    assert_eq!(result.per_pass_stats[0].results, 0);
    assert!(result.per_pass_stats[1].results >= 5);
    // Pass 2 relaxes the entity threshold by 30% and doubles the cap
    assert!((result.threshold_config[1] - 0.315).abs() < 1e-12);
    assert_eq!(result.per_pass_stats[1].limit, 6);
}

#[tokio::test]
async fn zoom_controls_first_pass_scope() {
    let index = LocalIndex::new(DIM);
    for i in 0..12 {
        index
            .add(record(
                &format!("r{}", i),
                "note",
                "well matched note",
                Some(vector_with_similarity(DIM, 0.8)),
            ))
            .unwrap();
    }

    let entity = NavigationState::defaults();
    let corpus = NavigationState {
        zoom: Zoom::Corpus,
        ..NavigationState::defaults()
    };

    let search = AdaptiveSearch::default();
    let narrow = search.run(&index, &query(), &entity).await.unwrap();
    let wide = search.run(&index, &query(), &corpus).await.unwrap();

    assert_eq!(narrow.per_pass_stats[0].limit, 3);
    assert_eq!(wide.per_pass_stats[0].limit, 10);
    assert!(wide.contexts.len() > narrow.contexts.len());
}

#[tokio::test]
async fn stale_session_record_buried_at_entity_zoom_recovered_at_corpus() {
    // A session record last touched 48h ago with similarity 0.6. The search
    // threshold applies to raw similarity, so the record clears the entity
    // cut of 0.45 - what buries it at a narrow zoom is its multi-factor
    // relevance, which collapses under the one-hour session half-life.
    let index = LocalIndex::new(DIM);
    let mut stale = record(
        "forgotten",
        "session scratchpad",
        "notes from an old session",
        Some(vector_with_similarity(DIM, 0.6)),
    );
    stale.domains = vec!["session:old".into()];
    stale.last_accessed = Utc::now() - chrono::Duration::hours(48);
    index.add(stale.clone()).unwrap();

    let entity = NavigationState::defaults();
    let narrow = AdaptiveSearch::default()
        .run(&index, &query(), &entity)
        .await
        .unwrap();
    assert!(
        narrow.contexts.iter().any(|c| c.record.id == "forgotten"),
        "raw similarity 0.6 must clear the entity threshold"
    );

    // Under entity defaults the relevance score sits far below the 0.45
    // cut (~0.21: domain 0.1, temporal ~0, session boost 0.8), so any
    // relevance-ranked consumer drops it - while the floor keeps it
    // recoverable rather than permanently invisible
    let engine = RelevanceEngine::default();
    let score = engine.score(
        &stale,
        &entity,
        Some(&query()),
        "old notes",
        None,
        Utc::now(),
    );
    assert!(
        score.score < 0.25,
        "stale session relevance did not collapse: {}",
        score.score
    );
    assert!(score.score >= RELEVANCE_FLOOR);

    // Switching to corpus zoom must return the record among results
    let corpus = NavigationState {
        zoom: Zoom::Corpus,
        ..NavigationState::defaults()
    };
    let wide = AdaptiveSearch::default()
        .run(&index, &query(), &corpus)
        .await
        .unwrap();
    assert!(wide.contexts.iter().any(|c| c.record.id == "forgotten"));
}

#[tokio::test]
async fn empty_index_returns_reason() {
    let index = LocalIndex::new(DIM);
    let result = AdaptiveSearch::default()
        .run(&index, &query(), &NavigationState::defaults())
        .await
        .unwrap();
    assert!(result.contexts.is_empty());
    assert!(result.reason.is_some());
    assert_eq!(result.passes, 3);
}
