//! Enhancement Module
//!
//! Everything between the fusion core and the outside world:
//! - Uniform knowledge-source contract plus adapters for text-search and
//!   structured-knowledge services
//! - Fan-out broker with per-source rate limiting, timeouts, and caching
//! - Per-source FIFO caches and the cross-source semantic cache

mod broker;
mod cache;
mod source;

pub use broker::{
    BrokerConfig, EnhanceOptions, EnhancementBroker, EnhancementMetadata, EnhancementResult,
    IndividualResults, SourceFailure, SourceSuccess, DEFAULT_MIN_REQUEST_INTERVAL_MS,
    DEFAULT_SOURCE_TIMEOUT_MS,
};
pub use cache::{
    normalize_query, SemanticCache, SemanticCacheEntry, SemanticCacheHit, SourceResultCache,
    BASE_TTL_DAYS, SEMANTIC_CACHE_CAP, SEMANTIC_MATCH_THRESHOLD, SOURCE_CACHE_CAP,
};
pub use source::{
    EmbeddingService, EntityDetails, KnowledgeEntity, KnowledgeSource, SourceItem, SourceKind,
    SourceResult, StructuredKnowledgeService, StructuredKnowledgeSource, TextSearchService,
    TextSearchSource,
};
