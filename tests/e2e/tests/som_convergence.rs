//! Map training journey: four well-separated Gaussians organize onto a
//! 10x10 grid with low quantization and topographic error, and region
//! growing recovers one cluster per Gaussian.

use cartomem_core::{
    DistanceMetric, GaussianSampler, GridBoundary, GridShape, GridTopology, NeighborhoodKernel,
    ParamSchedule, ScheduleKind, SomCore, SomTrainer, TrainerConfig, TrainingControl, WeightInit,
};
use cartomem_e2e::basis_sample;

const DIM: usize = 4;
const MAP_SIDE: usize = 10;

fn training_data(seed: u64, n: usize) -> Vec<Vec<f64>> {
    let mut sampler = GaussianSampler::seeded(seed);
    (0..n)
        .map(|i| basis_sample(DIM, i % 4, 0.05, &mut sampler))
        .collect()
}

fn trainer_config(seed: u64) -> TrainerConfig {
    TrainerConfig {
        iterations: 500,
        batch_size: 100,
        learning_rate: ParamSchedule::learning_rate(ScheduleKind::Linear, 0.1, 0.01),
        radius: ParamSchedule::radius(ScheduleKind::Linear, 2.5, 0.5),
        kernel: NeighborhoodKernel::Gaussian,
        quality_check_interval: 100,
        // Force the full run; convergence is advisory
        min_iterations: 500,
        convergence_window: 10,
        convergence_threshold: 1e-4,
        seed: Some(seed),
    }
}

fn trained_map(seed: u64, data: &[Vec<f64>]) -> (SomCore, f64) {
    let topo = GridTopology::new(MAP_SIDE, MAP_SIDE, GridShape::Rectangular, GridBoundary::Bounded);
    let mut core = SomCore::new(topo, DIM, DistanceMetric::Cosine);
    let mut sampler = GaussianSampler::seeded(seed);
    core.init_weights(WeightInit::Random, &mut sampler).unwrap();

    let outcome = SomTrainer::new(trainer_config(seed))
        .train(&mut core, data, &TrainingControl::new(), None, None)
        .unwrap();
    (core, outcome.final_quantization_error)
}

#[test]
fn four_gaussians_organize_cleanly() {
    let data = training_data(42, 200);
    let (core, final_qe) = trained_map(42, &data);

    assert!(final_qe < 0.05, "quantization error too high: {}", final_qe);

    let te = core.topographic_error(&data).unwrap();
    assert!(te < 0.1, "topographic error too high: {}", te);

    // Every weight stays finite through 500 iterations
    for row in core.weights() {
        assert!(row.iter().all(|w| w.is_finite()));
    }
}

#[test]
fn region_growing_recovers_the_four_directions() {
    let data = training_data(42, 200);
    let (core, _) = trained_map(42, &data);

    let clusters = core.extract_clusters(0.9, 3).unwrap();
    assert!(clusters.len() >= 4, "expected the four regions, got {}", clusters.len());

    // Every basis axis is recovered by at least one strongly aligned region
    let mut axes_seen = std::collections::HashSet::new();
    for cluster in &clusters {
        let centroid = cartomem_core::normalized(&cluster.centroid);
        let (axis, strength) = centroid
            .iter()
            .enumerate()
            .map(|(i, v)| (i, v.abs()))
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
            .unwrap();
        if strength > 0.85 {
            axes_seen.insert(axis);
        }
    }
    assert_eq!(axes_seen.len(), 4, "a Gaussian went unrecovered");
}

#[test]
fn training_is_deterministic_under_a_seed() {
    let data = training_data(42, 200);
    let (core_a, qe_a) = trained_map(42, &data);
    let (core_b, qe_b) = trained_map(42, &data);

    assert_eq!(qe_a, qe_b);
    assert_eq!(core_a.weights(), core_b.weights());
}

#[test]
fn cluster_extraction_is_stable() {
    let data = training_data(42, 200);
    let (core, _) = trained_map(42, &data);

    let first = core.extract_clusters(0.9, 3).unwrap();
    let second = core.extract_clusters(0.9, 3).unwrap();
    let sets = |clusters: &[cartomem_core::Cluster]| -> Vec<Vec<usize>> {
        clusters.iter().map(|c| c.members.clone()).collect()
    };
    assert_eq!(sets(&first), sets(&second));
}

#[test]
fn quantization_error_drops_across_seeds() {
    for seed in [1u64, 7, 13, 29, 42] {
        let data = training_data(seed, 120);
        let topo =
            GridTopology::new(8, 8, GridShape::Rectangular, GridBoundary::Bounded);
        let mut core = SomCore::new(topo, DIM, DistanceMetric::Cosine);
        let mut sampler = GaussianSampler::seeded(seed);
        core.init_weights(WeightInit::Random, &mut sampler).unwrap();

        let config = TrainerConfig {
            iterations: 150,
            min_iterations: 150,
            seed: Some(seed),
            ..trainer_config(seed)
        };
        let outcome = SomTrainer::new(config)
            .train(&mut core, &data, &TrainingControl::new(), None, None)
            .unwrap();

        let early = outcome.trace.first().unwrap().quantization_error;
        let late = outcome.final_quantization_error;
        assert!(
            late < early,
            "seed {}: qe went {} -> {}",
            seed,
            early,
            late
        );
    }
}
