//! Map Engine Module
//!
//! The offline organizer of the embedding corpus:
//! - Weight matrix with batched BMU search and accumulated batch updates
//! - Scheduled training with convergence detection and cancellation
//! - Instance lifecycle (create, load, train, cluster, export, delete)
//! - A registry exposing the logical control surface over live instances

pub mod core;
pub mod engine;
pub mod registry;
pub mod trainer;

pub use self::core::{Cluster, SomCore, WeightInit};
pub use engine::{
    EngineState, ExportAssignment, FeatureMapKind, GridState, LoadReport, MapExport,
    NodeMapping, VsomConfig, VsomEngine, DEFAULT_MIN_CLUSTER_SIZE, MAX_EMBEDDING_DIM,
    MAX_MAP_SIDE, MAX_TRAINING_ITERATIONS, MIN_EMBEDDING_DIM, MIN_MAP_SIDE,
};
pub use registry::{
    InstanceInfo, RegistryConfig, TrainingStatusView, VsomRegistry, DEFAULT_MAX_INSTANCES,
};
pub use trainer::{
    ParamSchedule, ScheduleKind, SomTrainer, TraceEntry, TrainerConfig, TrainingControl,
    TrainingOutcome, TrainingProgress,
};
