//! Map engine lifecycle
//!
//! Owns the SOM core, its topology, and the trainer; children hold no
//! back-pointers. Drives the instance state machine:
//!
//! ```text
//! Created --load--> DataLoaded --train--> Training --ok--> Trained
//!                                |-stop--> TrainingStopped --train--> Training
//!                                `-err--> Error (terminal except delete)
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::{CoreError, Result};
use crate::record::Record;
use crate::som::core::{Cluster, SomCore, WeightInit};
use crate::som::trainer::{
    SomTrainer, TrainerConfig, TrainingControl, TrainingOutcome, TrainingProgress,
};
use crate::topology::{GridBoundary, GridShape, GridTopology};
use crate::vector::{DistanceMetric, GaussianSampler};

// ============================================================================
// LIMITS
// ============================================================================

/// Smallest allowed map side
pub const MIN_MAP_SIDE: usize = 3;
/// Largest allowed map side
pub const MAX_MAP_SIDE: usize = 100;
/// Smallest allowed embedding dimension
pub const MIN_EMBEDDING_DIM: usize = 100;
/// Largest allowed embedding dimension
pub const MAX_EMBEDDING_DIM: usize = 2000;
/// Ceiling applied to configured training iterations
pub const MAX_TRAINING_ITERATIONS: usize = 1000;
/// Default minimum cluster size at extraction
pub const DEFAULT_MIN_CLUSTER_SIZE: usize = 3;

// ============================================================================
// CONFIGURATION / STATE
// ============================================================================

/// Map instance configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VsomConfig {
    pub map_width: usize,
    pub map_height: usize,
    #[serde(default)]
    pub shape: GridShape,
    #[serde(default)]
    pub boundary: GridBoundary,
    #[serde(default)]
    pub metric: DistanceMetric,
    pub embedding_dim: usize,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default)]
    pub weight_init: WeightInit,
}

fn default_max_iterations() -> usize {
    500
}

impl VsomConfig {
    /// Validate hard limits and clamp the iteration ceiling
    pub fn validated(mut self) -> Result<Self> {
        for (name, side) in [("width", self.map_width), ("height", self.map_height)] {
            if !(MIN_MAP_SIDE..=MAX_MAP_SIDE).contains(&side) {
                return Err(CoreError::BadInput(format!(
                    "map {} {} outside [{}, {}]",
                    name, side, MIN_MAP_SIDE, MAX_MAP_SIDE
                )));
            }
        }
        if !(MIN_EMBEDDING_DIM..=MAX_EMBEDDING_DIM).contains(&self.embedding_dim) {
            return Err(CoreError::BadInput(format!(
                "embedding dimension {} outside [{}, {}]",
                self.embedding_dim, MIN_EMBEDDING_DIM, MAX_EMBEDDING_DIM
            )));
        }
        if self.max_iterations > MAX_TRAINING_ITERATIONS {
            self.max_iterations = MAX_TRAINING_ITERATIONS;
        }
        if self.max_iterations == 0 {
            self.max_iterations = 1;
        }
        Ok(self)
    }
}

/// Lifecycle state of a map instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Created,
    DataLoaded,
    Training,
    Trained,
    TrainingStopped,
    Error,
    Deleted,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EngineState::Created => "created",
            EngineState::DataLoaded => "data_loaded",
            EngineState::Training => "training",
            EngineState::Trained => "trained",
            EngineState::TrainingStopped => "training_stopped",
            EngineState::Error => "error",
            EngineState::Deleted => "deleted",
        };
        write!(f, "{}", name)
    }
}

// ============================================================================
// RESULT TYPES
// ============================================================================

/// Outcome of loading records into an instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadReport {
    pub loaded: usize,
    pub skipped_dimension_mismatch: usize,
    pub skipped_missing_embedding: usize,
}

/// Per-record BMU assignment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMapping {
    pub record_id: String,
    pub label: String,
    pub node_index: usize,
    pub x: usize,
    pub y: usize,
    pub distance: f64,
}

/// Requested feature map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "component")]
pub enum FeatureMapKind {
    /// Mean distance from each node to its grid neighbors
    Umatrix,
    /// One weight component across the grid
    Component(usize),
}

/// Snapshot of the grid for callers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridState {
    pub width: usize,
    pub height: usize,
    pub shape: GridShape,
    pub boundary: GridBoundary,
    pub state: EngineState,
    pub embedding_dim: usize,
    pub loaded_records: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weights: Option<Vec<Vec<f64>>>,
}

/// One exported record assignment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportAssignment {
    pub record_id: String,
    pub label: String,
    pub node_index: usize,
    pub x: usize,
    pub y: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<usize>,
    /// `max(0, 1 - bmu_distance)`
    pub confidence: f64,
}

/// Language-agnostic export of a trained map
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapExport {
    pub dataset: String,
    pub width: usize,
    pub height: usize,
    pub clusters: Vec<Cluster>,
    pub assignments: Vec<ExportAssignment>,
}

#[derive(Debug, Clone)]
struct EntityRef {
    id: String,
    label: String,
}

// ============================================================================
// ENGINE
// ============================================================================

/// A single map instance: configuration, weights, loaded corpus, lifecycle
pub struct VsomEngine {
    config: VsomConfig,
    state: EngineState,
    core: SomCore,
    entities: Vec<EntityRef>,
    embeddings: Vec<Vec<f64>>,
    metadata: Vec<serde_json::Value>,
    control: TrainingControl,
    last_outcome: Option<TrainingOutcome>,
}

impl VsomEngine {
    /// Create an instance in `Created` state
    pub fn create(config: VsomConfig) -> Result<Self> {
        let config = config.validated()?;
        let topology = GridTopology::new(
            config.map_width,
            config.map_height,
            config.shape,
            config.boundary,
        );
        let core = SomCore::new(topology, config.embedding_dim, config.metric);
        Ok(Self {
            config,
            state: EngineState::Created,
            core,
            entities: Vec::new(),
            embeddings: Vec::new(),
            metadata: Vec::new(),
            control: TrainingControl::new(),
            last_outcome: None,
        })
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn config(&self) -> &VsomConfig {
        &self.config
    }

    pub fn core(&self) -> &SomCore {
        &self.core
    }

    /// Shared cancellation handle for the current/next training run
    pub fn control(&self) -> TrainingControl {
        self.control.clone()
    }

    /// Trace and quality numbers of the last completed run
    pub fn last_outcome(&self) -> Option<&TrainingOutcome> {
        self.last_outcome.as_ref()
    }

    fn require_state(&self, allowed: &[EngineState], op: &str) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(CoreError::NotReady {
                expected: format!(
                    "{} (for {})",
                    allowed
                        .iter()
                        .map(|s| s.to_string())
                        .collect::<Vec<_>>()
                        .join("|"),
                    op
                ),
                actual: self.state.to_string(),
            })
        }
    }

    // ------------------------------------------------------------------
    // Load
    // ------------------------------------------------------------------

    /// Load records into the instance. Records whose embedding dimension
    /// mismatches the configured one are skipped, not fatal; the report
    /// carries the counts.
    pub fn load(&mut self, records: &[Record]) -> Result<LoadReport> {
        self.require_state(&[EngineState::Created, EngineState::DataLoaded], "load")?;

        let mut report = LoadReport {
            loaded: 0,
            skipped_dimension_mismatch: 0,
            skipped_missing_embedding: 0,
        };

        for record in records {
            let Some(embedding) = &record.embedding else {
                report.skipped_missing_embedding += 1;
                continue;
            };
            if embedding.len() != self.config.embedding_dim {
                report.skipped_dimension_mismatch += 1;
                continue;
            }
            self.entities.push(EntityRef {
                id: record.id.clone(),
                label: record.label.clone(),
            });
            self.embeddings.push(embedding.clone());
            self.metadata.push(record.metadata.clone());
            report.loaded += 1;
        }

        if report.skipped_dimension_mismatch > 0 || report.skipped_missing_embedding > 0 {
            warn!(
                dimension_mismatch = report.skipped_dimension_mismatch,
                missing_embedding = report.skipped_missing_embedding,
                "skipped records during load"
            );
        }

        if self.embeddings.is_empty() {
            return Err(CoreError::BadInput(
                "no loadable records (all skipped or empty input)".into(),
            ));
        }

        self.state = EngineState::DataLoaded;
        Ok(report)
    }

    /// Number of loaded records
    pub fn loaded_records(&self) -> usize {
        self.embeddings.len()
    }

    // ------------------------------------------------------------------
    // Train
    // ------------------------------------------------------------------

    /// Run training synchronously. Callers wanting progress streaming or
    /// cancellation run this on a blocking thread and keep the
    /// [`TrainingControl`] from [`VsomEngine::control`].
    pub fn train(
        &mut self,
        mut opts: TrainerConfig,
        progress: Option<&mpsc::Sender<TrainingProgress>>,
    ) -> Result<TrainingOutcome> {
        self.require_state(
            &[EngineState::DataLoaded, EngineState::TrainingStopped],
            "train",
        )?;

        opts.iterations = opts.iterations.min(self.config.max_iterations).max(1);

        // First training from scratch initializes weights; a resumed run
        // continues from the partially trained map.
        if self.state == EngineState::DataLoaded {
            let mut sampler = match opts.seed {
                Some(seed) => GaussianSampler::seeded(seed),
                None => GaussianSampler::from_entropy(),
            };
            self.core.init_weights(self.config.weight_init, &mut sampler)?;
        }

        // The control handle survives across runs so concurrent holders can
        // stop this one; a resumed run starts with the flag cleared.
        self.control.reset();
        self.state = EngineState::Training;
        let trainer = SomTrainer::new(opts);
        let control = self.control.clone();

        match trainer.train(&mut self.core, &self.embeddings, &control, None, progress) {
            Ok(outcome) => {
                self.state = if outcome.cancelled {
                    EngineState::TrainingStopped
                } else {
                    EngineState::Trained
                };
                info!(
                    iterations = outcome.iterations_run,
                    converged = outcome.converged,
                    cancelled = outcome.cancelled,
                    qe = outcome.final_quantization_error,
                    "training finished"
                );
                self.last_outcome = Some(outcome.clone());
                Ok(outcome)
            }
            Err(err) => {
                self.state = EngineState::Error;
                Err(err)
            }
        }
    }

    // ------------------------------------------------------------------
    // Query operations (self-loop on Trained / TrainingStopped)
    // ------------------------------------------------------------------

    /// BMU assignment and distance for every loaded record
    pub fn node_mappings(&self) -> Result<Vec<NodeMapping>> {
        self.require_state(
            &[EngineState::Trained, EngineState::TrainingStopped],
            "node_mappings",
        )?;

        let bmus = self.core.find_bmus_batch(&self.embeddings)?;
        Ok(self
            .entities
            .iter()
            .zip(bmus.iter())
            .map(|(entity, &(node, distance))| {
                let (x, y) = self.core.topology().index_to_coords(node);
                NodeMapping {
                    record_id: entity.id.clone(),
                    label: entity.label.clone(),
                    node_index: node,
                    x,
                    y,
                    distance,
                }
            })
            .collect())
    }

    /// Extract clusters by region-growing on weight similarity; see
    /// [`SomCore::extract_clusters`]
    pub fn clusters(&self, threshold: f64, min_cluster_size: usize) -> Result<Vec<Cluster>> {
        self.require_state(
            &[EngineState::Trained, EngineState::TrainingStopped],
            "clusters",
        )?;
        self.core.extract_clusters(threshold, min_cluster_size)
    }

    /// Compute a feature map: one value per node
    pub fn feature_map(&self, kind: FeatureMapKind) -> Result<Vec<f64>> {
        self.require_state(
            &[EngineState::Trained, EngineState::TrainingStopped],
            "feature_map",
        )?;

        let weights = self.core.weights();
        match kind {
            FeatureMapKind::Umatrix => {
                let total = self.core.topology().total_nodes();
                let mut out = Vec::with_capacity(total);
                for node in 0..total {
                    let neighbors = self.core.topology().adjacent(node);
                    if neighbors.is_empty() {
                        out.push(0.0);
                        continue;
                    }
                    let mut sum = 0.0;
                    for &n in &neighbors {
                        sum += self
                            .core
                            .metric()
                            .distance(&weights[node], &weights[n])?;
                    }
                    out.push(sum / neighbors.len() as f64);
                }
                Ok(out)
            }
            FeatureMapKind::Component(c) => {
                if c >= self.config.embedding_dim {
                    return Err(CoreError::BadInput(format!(
                        "component {} outside embedding dimension {}",
                        c, self.config.embedding_dim
                    )));
                }
                Ok(weights.iter().map(|row| row[c]).collect())
            }
        }
    }

    /// Grid snapshot, optionally including the full weight matrix
    pub fn grid_state(&self, include_weights: bool) -> GridState {
        GridState {
            width: self.config.map_width,
            height: self.config.map_height,
            shape: self.config.shape,
            boundary: self.config.boundary,
            state: self.state,
            embedding_dim: self.config.embedding_dim,
            loaded_records: self.embeddings.len(),
            weights: include_weights.then(|| self.core.weights().to_vec()),
        }
    }

    /// Restore a previously exported weight matrix onto this instance.
    /// The restored map is immediately queryable.
    pub fn restore_weights(&mut self, weights: Vec<Vec<f64>>) -> Result<()> {
        if self.state == EngineState::Deleted || self.state == EngineState::Training {
            return Err(CoreError::NotReady {
                expected: "any idle state (for restore_weights)".into(),
                actual: self.state.to_string(),
            });
        }
        self.core.set_weights(weights)?;
        self.state = EngineState::Trained;
        Ok(())
    }

    /// Export record assignments with cluster membership and confidence
    pub fn export(&self, dataset: &str, cluster_threshold: f64) -> Result<MapExport> {
        let mappings = self.node_mappings()?;
        let clusters = self.clusters(cluster_threshold, DEFAULT_MIN_CLUSTER_SIZE)?;

        let mut node_cluster: std::collections::HashMap<usize, usize> =
            std::collections::HashMap::new();
        for cluster in &clusters {
            for &m in &cluster.members {
                node_cluster.insert(m, cluster.id);
            }
        }

        let assignments = mappings
            .into_iter()
            .map(|m| ExportAssignment {
                cluster_id: node_cluster.get(&m.node_index).copied(),
                confidence: (1.0 - m.distance).max(0.0),
                record_id: m.record_id,
                label: m.label,
                node_index: m.node_index,
                x: m.x,
                y: m.y,
            })
            .collect();

        Ok(MapExport {
            dataset: dataset.to_string(),
            width: self.config.map_width,
            height: self.config.map_height,
            clusters,
            assignments,
        })
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Terminal transition. Training must have been stopped first.
    pub fn delete(&mut self) -> Result<()> {
        if self.state == EngineState::Training {
            return Err(CoreError::NotReady {
                expected: "non-training state (stop training before delete)".into(),
                actual: self.state.to_string(),
            });
        }
        self.state = EngineState::Deleted;
        self.entities.clear();
        self.embeddings.clear();
        self.metadata.clear();
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
