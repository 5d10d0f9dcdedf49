//! # Cartomem Core
//!
//! Semantic-memory retrieval core. Two subsystems over one embedding corpus:
//!
//! - **Map engine**: clusters high-dimensional embeddings onto a 2-D
//!   topological grid (batched BMU search, neighborhood kernels, scheduled
//!   training with convergence detection, region-grown cluster extraction).
//! - **Hybrid retrieval & fusion**: runs a multi-pass local search and an
//!   external enhancement fan-out in parallel, scores the evidence with a
//!   multi-factor relevance model, and fuses both branches into a single
//!   weighted context with span-level attribution.
//!
//! Both share the relevance model (temporal decay, domain alignment,
//! semantic similarity, access frequency) and the Zoom/Pan/Tilt navigation
//! state that constrains scope and fusion weights.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cartomem_core::prelude::*;
//! use std::sync::{Arc, RwLock};
//!
//! let index = Arc::new(LocalIndex::new(768));
//! let broker = Arc::new(EnhancementBroker::new(BrokerConfig::default()));
//! let fusion = FusionCore::new(
//!     index,
//!     broker,
//!     Arc::new(RwLock::new(RelevanceEngine::default())),
//!     AdaptiveSearch::default(),
//!     FusionConfig::default(),
//! );
//!
//! let response = fusion.query(QueryRequest::local("what did we decide?")).await;
//! println!("{}", response.merged_context.summary_text);
//! ```
//!
//! The map engine is driven through [`VsomRegistry`]: create an instance,
//! load records, train (streaming progress), then query mappings, clusters,
//! and feature maps.

#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod enhance;
pub mod error;
pub mod fusion;
pub mod index;
pub mod nav;
pub mod record;
pub mod relevance;
pub mod retrieval;
pub mod som;
pub mod topology;
pub mod vector;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use error::{CoreError, Result};

pub use record::{dominant_domain_type, DomainTag, DomainType, Record, RecordDraft};

pub use nav::{NavigationState, PanFilter, TemporalWindow, Tilt, Zoom};

pub use vector::{
    cosine_distance, cosine_similarity, dot_product, euclidean_distance, manhattan_distance,
    norm, normalize_in_place, normalized, DistanceMetric, GaussianSampler, NORM_EPSILON,
};

pub use topology::{
    CoordMode, GridBoundary, GridShape, GridTopology, NeighborhoodKernel, KERNEL_EPSILON,
};

pub use som::{
    Cluster, EngineState, ExportAssignment, FeatureMapKind, GridState, InstanceInfo, LoadReport,
    MapExport, NodeMapping, ParamSchedule, RegistryConfig, ScheduleKind, SomCore, SomTrainer,
    TraceEntry, TrainerConfig, TrainingControl, TrainingOutcome, TrainingProgress,
    TrainingStatusView, VsomConfig, VsomEngine, VsomRegistry, WeightInit,
};

pub use relevance::{
    AdaptiveSignals, FactorWeights, RelevanceBreakdown, RelevanceEngine, RelevanceScore,
    UserContext, RELEVANCE_FLOOR,
};

pub use index::{
    CandidateSource, EmbeddingIndex, FlatEmbeddingIndex, InMemoryRecordStore, IndexStats,
    LocalIndex, RecordStore, ScoredRecord, SearchOptions,
};

pub use enhance::{
    BrokerConfig, EmbeddingService, EnhanceOptions, EnhancementBroker, EnhancementResult,
    KnowledgeSource, SemanticCache, SourceItem, SourceKind, SourceResult,
    StructuredKnowledgeService, TextSearchService,
};

pub use retrieval::{
    AdaptiveSearch, AdaptiveSearchConfig, AdaptiveSearchResult, PassStats, THRESHOLD_FLOOR,
};

pub use fusion::{
    ContextSpan, Diagnostics, ExternalResult, FusionConfig, FusionCore, FusionStrategy,
    FusionWeights, MergedContext, PersonalResult, QueryRequest, QueryResponse, Timings,
};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        AdaptiveSearch, BrokerConfig, CoreError, DistanceMetric, EnhancementBroker, FusionConfig,
        FusionCore, FusionStrategy, LocalIndex, NavigationState, QueryRequest, QueryResponse,
        Record, RecordDraft, RegistryConfig, RelevanceEngine, Result, Tilt, TrainerConfig,
        VsomConfig, VsomRegistry, Zoom,
    };
}
