//! Enhancement broker
//!
//! Fans a query out to the registered external knowledge sources with
//! per-source rate limiting, timeouts, and caching. The broker never fails
//! as a whole while at least one source succeeded; per-source failures come
//! back in a structured list.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

use crate::enhance::cache::{SemanticCache, SourceResultCache, SOURCE_CACHE_CAP};
use crate::enhance::source::{EmbeddingService, KnowledgeSource, SourceKind, SourceResult};
use crate::error::{CoreError, Result};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Default per-source call timeout
pub const DEFAULT_SOURCE_TIMEOUT_MS: u64 = 10_000;

/// Default minimum interval between requests to one source
pub const DEFAULT_MIN_REQUEST_INTERVAL_MS: u64 = 100;

/// Query-embedding LRU capacity
const EMBEDDING_CACHE_CAP: usize = 256;

/// Broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerConfig {
    pub source_timeout_ms: u64,
    pub min_request_interval_ms: u64,
    pub source_cache_cap: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            source_timeout_ms: DEFAULT_SOURCE_TIMEOUT_MS,
            min_request_interval_ms: DEFAULT_MIN_REQUEST_INTERVAL_MS,
            source_cache_cap: SOURCE_CACHE_CAP,
        }
    }
}

/// Per-call options
#[derive(Debug, Clone, Default)]
pub struct EnhanceOptions {
    /// Cap on how many sources to consult; None consults all
    pub max_sources: Option<usize>,
    /// Restrict to these source names; empty means all registered
    pub source_names: Vec<String>,
}

// ============================================================================
// RESULT ENVELOPE
// ============================================================================

/// A successful per-source result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSuccess {
    pub source: String,
    pub kind: SourceKind,
    pub result: SourceResult,
    pub from_cache: bool,
    pub elapsed_ms: u64,
}

/// A failed per-source result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceFailure {
    pub source: String,
    pub reason: String,
}

/// Per-source outcomes split by success
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndividualResults {
    pub successful: Vec<SourceSuccess>,
    pub failed: Vec<SourceFailure>,
}

/// The broker's answer envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhancementResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    pub sources: Vec<String>,
    pub individual_results: IndividualResults,
    pub metadata: EnhancementMetadata,
}

/// Timing and cache diagnostics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhancementMetadata {
    pub total_elapsed_ms: u64,
    pub cache_hits: Vec<String>,
}

impl EnhancementResult {
    /// Dominant kind among successful sources (highest reliability wins)
    pub fn dominant_kind(&self) -> Option<SourceKind> {
        self.individual_results
            .successful
            .iter()
            .map(|s| s.kind)
            .max_by(|a, b| {
                a.reliability_factor()
                    .partial_cmp(&b.reliability_factor())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    }
}

// ============================================================================
// BROKER
// ============================================================================

struct SourceLane {
    source: Arc<dyn KnowledgeSource>,
    /// Rate-limit lane: last request instant, serialized per source
    last_request: Arc<Mutex<Option<Instant>>>,
    cache: Arc<std::sync::Mutex<SourceResultCache>>,
}

/// Fan-out orchestrator over the registered knowledge sources
pub struct EnhancementBroker {
    config: BrokerConfig,
    lanes: HashMap<String, SourceLane>,
    embedder: Option<Arc<dyn EmbeddingService>>,
    embedding_cache: std::sync::Mutex<LruCache<String, Vec<f64>>>,
    semantic_cache: std::sync::Mutex<SemanticCache>,
}

impl EnhancementBroker {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            lanes: HashMap::new(),
            embedder: None,
            embedding_cache: std::sync::Mutex::new(LruCache::new(
                NonZeroUsize::new(EMBEDDING_CACHE_CAP).unwrap(),
            )),
            semantic_cache: std::sync::Mutex::new(SemanticCache::default()),
        }
    }

    /// Register a knowledge source under its own rate-limit lane and cache
    pub fn register_source(&mut self, source: Arc<dyn KnowledgeSource>) {
        let name = source.name().to_string();
        self.lanes.insert(
            name,
            SourceLane {
                source,
                last_request: Arc::new(Mutex::new(None)),
                cache: Arc::new(std::sync::Mutex::new(SourceResultCache::new(
                    self.config.source_cache_cap,
                ))),
            },
        );
    }

    /// Attach the optional embedding service
    pub fn set_embedder(&mut self, embedder: Arc<dyn EmbeddingService>) {
        self.embedder = Some(embedder);
    }

    /// Registered source names
    pub fn source_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lanes.keys().cloned().collect();
        names.sort();
        names
    }

    /// Embed a query, memoizing through the LRU cache. Errors when no
    /// embedding service is attached.
    pub async fn embed_query(&self, query: &str) -> Result<Vec<f64>> {
        if let Some(hit) = self.embedding_cache.lock().unwrap().get(query).cloned() {
            return Ok(hit);
        }
        let embedder = self.embedder.as_ref().ok_or_else(|| {
            CoreError::UpstreamFailure {
                source_name: "embedding".into(),
                message: "no embedding service attached".into(),
            }
        })?;
        let embedding = embedder.embed(query).await?;
        self.embedding_cache
            .lock()
            .unwrap()
            .put(query.to_string(), embedding.clone());
        Ok(embedding)
    }

    /// Shared cross-source semantic cache
    pub fn semantic_cache(&self) -> &std::sync::Mutex<SemanticCache> {
        &self.semantic_cache
    }

    /// Fan out to the selected sources and gather the envelope.
    ///
    /// Cross-source calls run in parallel; requests to one source queue
    /// behind its rate-limit lane. Each call races its own timeout. The
    /// broker succeeds when at least one source did.
    pub async fn enhance(&self, query: &str, options: &EnhanceOptions) -> EnhancementResult {
        let started = Instant::now();
        let mut selected: Vec<&SourceLane> = self
            .lanes
            .iter()
            .filter(|(name, _)| {
                options.source_names.is_empty() || options.source_names.contains(name)
            })
            .map(|(_, lane)| lane)
            .collect();
        selected.sort_by(|a, b| a.source.name().cmp(b.source.name()));
        if let Some(cap) = options.max_sources {
            selected.truncate(cap);
        }

        let mut join_set: JoinSet<(String, SourceKind, Result<(SourceResult, bool)>, u64)> =
            JoinSet::new();
        let timeout_ms = self.config.source_timeout_ms;
        let min_interval = Duration::from_millis(self.config.min_request_interval_ms);

        for lane in selected {
            let source = Arc::clone(&lane.source);
            let last_request = Arc::clone(&lane.last_request);
            let cache = Arc::clone(&lane.cache);
            let query = query.to_string();

            join_set.spawn(async move {
                let call_started = Instant::now();
                let name = source.name().to_string();
                let kind = source.kind();

                if let Some(cached) = cache.lock().unwrap().get(&query).cloned() {
                    let elapsed = call_started.elapsed().as_millis() as u64;
                    return (name, kind, Ok((cached, true)), elapsed);
                }

                // Rate-limit lane: hold the lock across the wait so queued
                // requests to this source space themselves out.
                {
                    let mut last = last_request.lock().await;
                    if let Some(previous) = *last {
                        let since = previous.elapsed();
                        if since < min_interval {
                            sleep(min_interval - since).await;
                        }
                    }
                    *last = Some(Instant::now());
                }

                let outcome = match timeout(Duration::from_millis(timeout_ms), source.fetch(&query))
                    .await
                {
                    Ok(Ok(result)) => {
                        cache.lock().unwrap().insert(&query, result.clone());
                        Ok((result, false))
                    }
                    Ok(Err(err)) => Err(err),
                    Err(_) => Err(CoreError::TimedOut { what: name.clone() }),
                };
                let elapsed = call_started.elapsed().as_millis() as u64;
                (name, kind, outcome, elapsed)
            });
        }

        let mut individual = IndividualResults::default();
        let mut cache_hits = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((name, kind, Ok((result, from_cache)), elapsed_ms)) => {
                    if from_cache {
                        cache_hits.push(name.clone());
                    }
                    individual.successful.push(SourceSuccess {
                        source: name,
                        kind,
                        result,
                        from_cache,
                        elapsed_ms,
                    });
                }
                Ok((name, _, Err(err), _)) => {
                    debug!(source = %name, error = %err, "source failed");
                    individual.failed.push(SourceFailure {
                        reason: failure_reason(&err),
                        source: name,
                    });
                }
                Err(join_err) => {
                    warn!(error = %join_err, "source task panicked");
                    individual.failed.push(SourceFailure {
                        source: "unknown".into(),
                        reason: "internal".into(),
                    });
                }
            }
        }

        individual.successful.sort_by(|a, b| a.source.cmp(&b.source));
        individual.failed.sort_by(|a, b| a.source.cmp(&b.source));

        let success = !individual.successful.is_empty();
        let answer = success.then(|| {
            individual
                .successful
                .iter()
                .map(|s| s.result.summary.as_str())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join("\n")
        });
        let sources = individual
            .successful
            .iter()
            .map(|s| s.source.clone())
            .collect();

        EnhancementResult {
            success,
            answer,
            sources,
            individual_results: individual,
            metadata: EnhancementMetadata {
                total_elapsed_ms: started.elapsed().as_millis() as u64,
                cache_hits,
            },
        }
    }

    /// Store a completed enhancement into the cross-source semantic cache
    pub fn cache_result(&self, query: &str, query_embedding: &[f64], result: &EnhancementResult, quality: f64) {
        let Some(answer) = &result.answer else {
            return;
        };
        let dominant = result.dominant_kind().unwrap_or(SourceKind::Generated);
        self.semantic_cache.lock().unwrap().store(
            query,
            query_embedding,
            answer.clone(),
            result.sources.clone(),
            dominant,
            quality,
            Utc::now(),
        );
    }
}

fn failure_reason(err: &CoreError) -> String {
    match err {
        CoreError::TimedOut { .. } => "timeout".into(),
        CoreError::RateLimited { .. } => "rate_limited".into(),
        CoreError::UpstreamFailure { message, .. } => format!("upstream: {}", message),
        other => other.to_string(),
    }
}

// ============================================================================
// TESTS
// ============================================================================
