//! Registry journey: create, load, train with streamed progress, query the
//! trained map, and tear down - plus the hard validation limits.

use cartomem_core::{
    DistanceMetric, EngineState, FeatureMapKind, GaussianSampler, GridBoundary, GridShape,
    RecordDraft, RegistryConfig, TrainerConfig, VsomConfig, VsomRegistry, WeightInit,
};
use cartomem_e2e::basis_sample;

const DIM: usize = 128;

fn config() -> VsomConfig {
    VsomConfig {
        map_width: 8,
        map_height: 8,
        shape: GridShape::Rectangular,
        boundary: GridBoundary::Bounded,
        metric: DistanceMetric::Cosine,
        embedding_dim: DIM,
        max_iterations: 200,
        weight_init: WeightInit::Random,
    }
}

fn drafts(n: usize, seed: u64) -> Vec<RecordDraft> {
    let mut sampler = GaussianSampler::seeded(seed);
    (0..n)
        .map(|i| RecordDraft {
            id: format!("r{}", i),
            label: Some(format!("record {}", i)),
            embedding: Some(basis_sample(DIM, i % 4, 0.02, &mut sampler)),
            ..RecordDraft::default()
        })
        .collect()
}

fn train_opts() -> TrainerConfig {
    TrainerConfig {
        iterations: 30,
        min_iterations: 30,
        seed: Some(42),
        ..TrainerConfig::default()
    }
}

async fn wait_for_idle(registry: &VsomRegistry, id: &str) -> EngineState {
    for _ in 0..200 {
        let state = registry.training_status(Some(id)).await.unwrap()[0].state;
        if state != EngineState::Training {
            return state;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("training never settled");
}

#[tokio::test]
async fn full_lifecycle_journey() {
    let registry = VsomRegistry::default();
    let info = registry.create(config()).await.unwrap();
    let id = info.instance_id.clone();
    assert_eq!(info.state, EngineState::Created);

    // Load normalizes drafts; legacy field names are accepted
    let mut batch = drafts(48, 7);
    batch[0].label = None;
    batch[0].prompt = Some("legacy prompt".into());
    let report = registry.load_data(&id, batch).await.unwrap();
    assert_eq!(report.loaded, 48);

    // Train and watch progress stream by
    let mut rx = registry.train(&id, train_opts()).await.unwrap();
    let mut iterations_seen = Vec::new();
    while let Some(event) = rx.recv().await {
        iterations_seen.push(event.iteration);
        assert_eq!(event.total_iterations, 30);
        assert!(event.quantization_error.is_finite());
    }
    assert!(!iterations_seen.is_empty());
    assert_eq!(wait_for_idle(&registry, &id).await, EngineState::Trained);

    // Query surfaces
    let mappings = registry.node_mappings(&id).await.unwrap();
    assert_eq!(mappings.len(), 48);

    let umatrix = registry
        .feature_maps(&id, FeatureMapKind::Umatrix)
        .await
        .unwrap();
    assert_eq!(umatrix.len(), 64);

    let clusters = registry.cluster(&id, 0.85, None).await.unwrap();
    assert!(!clusters.is_empty());

    let export = registry.export(&id, "journey", 0.85).await.unwrap();
    assert_eq!(export.dataset, "journey");
    assert_eq!(export.assignments.len(), 48);
    for a in &export.assignments {
        assert!((0.0..=1.0).contains(&a.confidence));
    }

    let grid = registry.grid_state(&id, true).await.unwrap();
    assert_eq!(grid.weights.unwrap().len(), 64);

    registry.delete(&id).await.unwrap();
    assert!(registry.list_instances().await.is_empty());
}

#[tokio::test]
async fn stop_training_preserves_a_queryable_map() {
    let registry = VsomRegistry::default();
    let info = registry.create(config()).await.unwrap();
    let id = info.instance_id.clone();
    registry.load_data(&id, drafts(64, 3)).await.unwrap();

    let opts = TrainerConfig {
        iterations: 200,
        min_iterations: 200,
        seed: Some(1),
        ..TrainerConfig::default()
    };
    let _rx = registry.train(&id, opts).await.unwrap();
    registry.stop_training(&id).await.unwrap();

    let state = wait_for_idle(&registry, &id).await;
    assert!(matches!(
        state,
        EngineState::Trained | EngineState::TrainingStopped
    ));
    // Either way the map answers queries
    assert!(registry.node_mappings(&id).await.is_ok());
}

#[tokio::test]
async fn hard_limits_enforced() {
    let registry = VsomRegistry::new(RegistryConfig { max_instances: 1 });

    // Map side below the minimum
    let mut bad = config();
    bad.map_width = 2;
    assert!(registry.create(bad).await.is_err());

    // Embedding dimension outside [100, 2000]
    let mut bad = config();
    bad.embedding_dim = 64;
    assert!(registry.create(bad).await.is_err());
    let mut bad = config();
    bad.embedding_dim = 4096;
    assert!(registry.create(bad).await.is_err());

    // Iteration ceiling clamps rather than fails
    let mut clamped = config();
    clamped.max_iterations = 100_000;
    let info = registry.create(clamped).await.unwrap();
    assert_eq!(info.state, EngineState::Created);

    // Instance ceiling
    assert!(registry.create(config()).await.is_err());
}

#[tokio::test]
async fn training_status_lists_all_instances() {
    let registry = VsomRegistry::default();
    let a = registry.create(config()).await.unwrap();
    let b = registry.create(config()).await.unwrap();

    let statuses = registry.training_status(None).await.unwrap();
    assert_eq!(statuses.len(), 2);
    let ids: Vec<&str> = statuses.iter().map(|s| s.instance_id.as_str()).collect();
    assert!(ids.contains(&a.instance_id.as_str()));
    assert!(ids.contains(&b.instance_id.as_str()));
}
