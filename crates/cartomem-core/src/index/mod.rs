//! Local Index
//!
//! Vector index over stored records with filter-aware similarity search.
//! Search runs against a combined view: the in-memory index (fast path) and
//! an optional auxiliary record store (exact path). The in-memory index and
//! the canonical record list stay consistent through an explicit integer
//! position map whose entries are tombstoned on removal, never reused.

use std::collections::HashMap;
use std::sync::RwLock as StdRwLock;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CoreError, Result};
use crate::nav::{NavigationState, PanFilter};
use crate::record::Record;
use crate::vector::{cosine_similarity, DistanceMetric};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Similarity band within which the more recently indexed candidate wins
const RECENCY_TIE_BAND: f64 = 0.01;

/// Keyword match boost per matching pan keyword
const KEYWORD_BOOST: f64 = 0.05;

/// Entity mention boost
const ENTITY_BOOST: f64 = 0.1;

/// Oversampling factor against the raw index before filtering
const CANDIDATE_MULTIPLIER: usize = 4;

// ============================================================================
// COLLABORATOR CONTRACTS
// ============================================================================

/// Abstract embedding index: the fast approximate path
pub trait EmbeddingIndex: Send + Sync {
    /// Register a vector under a caller-chosen position id
    fn add(&mut self, id: u64, vector: &[f64]) -> Result<()>;
    /// Nearest neighbors as `(id, distance)`, closest first
    fn search(&self, query: &[f64], k: usize) -> Result<Vec<(u64, f64)>>;
    /// Number of stored vectors
    fn size(&self) -> usize;
    /// Distance semantics of [`EmbeddingIndex::search`]
    fn metric(&self) -> DistanceMetric;
}

/// Abstract record store: the exact auxiliary path
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn put(&self, record: Record) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<Record>>;
    /// All records passing the filter, in insertion order
    async fn scan(&self, filter: Option<&PanFilter>) -> Result<Vec<Record>>;
}

// ============================================================================
// FLAT INDEX (reference implementation)
// ============================================================================

/// Exact linear-scan index; the in-process default
pub struct FlatEmbeddingIndex {
    dim: usize,
    metric: DistanceMetric,
    vectors: Vec<(u64, Vec<f64>)>,
}

impl FlatEmbeddingIndex {
    pub fn new(dim: usize, metric: DistanceMetric) -> Self {
        Self {
            dim,
            metric,
            vectors: Vec::new(),
        }
    }
}

impl EmbeddingIndex for FlatEmbeddingIndex {
    fn add(&mut self, id: u64, vector: &[f64]) -> Result<()> {
        if vector.len() != self.dim {
            return Err(CoreError::DimensionMismatch {
                expected: self.dim,
                got: vector.len(),
            });
        }
        self.vectors.push((id, vector.to_vec()));
        Ok(())
    }

    fn search(&self, query: &[f64], k: usize) -> Result<Vec<(u64, f64)>> {
        if query.len() != self.dim {
            return Err(CoreError::DimensionMismatch {
                expected: self.dim,
                got: query.len(),
            });
        }
        let mut scored: Vec<(u64, f64)> = self
            .vectors
            .iter()
            .map(|(id, v)| Ok((*id, self.metric.distance(query, v)?)))
            .collect::<Result<_>>()?;
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    fn size(&self) -> usize {
        self.vectors.len()
    }

    fn metric(&self) -> DistanceMetric {
        self.metric
    }
}

// ============================================================================
// IN-MEMORY RECORD STORE (reference implementation)
// ============================================================================

/// Reference record store kept entirely in process
#[derive(Default)]
pub struct InMemoryRecordStore {
    records: tokio::sync::RwLock<Vec<Record>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn put(&self, record: Record) -> Result<()> {
        let mut records = self.records.write().await;
        if let Some(existing) = records.iter_mut().find(|r| r.id == record.id) {
            *existing = record;
        } else {
            records.push(record);
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Record>> {
        Ok(self.records.read().await.iter().find(|r| r.id == id).cloned())
    }

    async fn scan(&self, filter: Option<&PanFilter>) -> Result<Vec<Record>> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| filter.map(|f| passes_domain_filter(r, f)).unwrap_or(true))
            .cloned()
            .collect())
    }
}

// ============================================================================
// SEARCH RESULTS
// ============================================================================

/// Which side of the combined view produced a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateSource {
    Memory,
    Store,
}

/// A retrieved candidate with its (boosted) similarity
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub record: Record,
    pub similarity: f64,
    pub source: CandidateSource,
}

/// Tuning knobs for one search call
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Result cap; None falls back to the zoom's cap
    pub limit: Option<usize>,
    /// Minimum raw similarity
    pub threshold: f64,
    /// Multiplier on pan-keyword boosts (widened passes raise it)
    pub keyword_boost_scale: f64,
    /// Drop the temporal window, keeping keywords/entities as soft boosts
    pub relax_filters: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: None,
            threshold: 0.0,
            keyword_boost_scale: 1.0,
            relax_filters: false,
        }
    }
}

/// Index health numbers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub records: usize,
    pub indexed_vectors: usize,
    pub tombstones: usize,
    pub dimensions: usize,
}

struct IndexInner {
    records: Vec<Record>,
    id_to_pos: HashMap<String, usize>,
    index: Box<dyn EmbeddingIndex>,
    /// index position -> record position; `None` marks a tombstone
    pos_map: Vec<Option<usize>>,
}

// ============================================================================
// LOCAL INDEX
// ============================================================================

/// The local retrieval surface over stored records.
///
/// Reads share the lock; writes (new records, access-stat bumps) serialize
/// through the single write lane.
pub struct LocalIndex {
    dim: usize,
    inner: StdRwLock<IndexInner>,
    store: Option<Arc<dyn RecordStore>>,
}

impl LocalIndex {
    /// Memory-only index with the flat exact backend
    pub fn new(dim: usize) -> Self {
        Self::with_backend(
            dim,
            Box::new(FlatEmbeddingIndex::new(dim, DistanceMetric::Cosine)),
            None,
        )
    }

    /// Index over a custom embedding backend and optional auxiliary store
    pub fn with_backend(
        dim: usize,
        index: Box<dyn EmbeddingIndex>,
        store: Option<Arc<dyn RecordStore>>,
    ) -> Self {
        Self {
            dim,
            inner: StdRwLock::new(IndexInner {
                records: Vec::new(),
                id_to_pos: HashMap::new(),
                index,
                pos_map: Vec::new(),
            }),
            store,
        }
    }

    /// Embedding dimension enforced on every vector
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Add (or replace) a record. Replacement tombstones the old index
    /// entry; positions are never reused.
    pub fn add(&self, record: Record) -> Result<()> {
        let Some(embedding) = &record.embedding else {
            return Err(CoreError::BadInput(format!(
                "record {} has no embedding",
                record.id
            )));
        };
        if embedding.len() != self.dim {
            return Err(CoreError::DimensionMismatch {
                expected: self.dim,
                got: embedding.len(),
            });
        }

        let mut inner = self.inner.write().unwrap();
        if let Some(&old_pos) = inner.id_to_pos.get(&record.id) {
            // Tombstone every index slot that pointed at the replaced record
            for slot in inner.pos_map.iter_mut() {
                if *slot == Some(old_pos) {
                    *slot = None;
                }
            }
            inner.records[old_pos] = record.clone();
            let index_pos = inner.pos_map.len() as u64;
            let vector = embedding.clone();
            inner.index.add(index_pos, &vector)?;
            inner.pos_map.push(Some(old_pos));
            return Ok(());
        }

        let record_pos = inner.records.len();
        let index_pos = inner.pos_map.len() as u64;
        let vector = embedding.clone();
        inner.id_to_pos.insert(record.id.clone(), record_pos);
        inner.records.push(record);
        inner.index.add(index_pos, &vector)?;
        inner.pos_map.push(Some(record_pos));
        Ok(())
    }

    /// Remove a record from the searchable view. Its index slots are
    /// tombstoned; returns whether the id was present.
    pub fn remove(&self, id: &str) -> bool {
        let mut inner = self.inner.write().unwrap();
        let Some(pos) = inner.id_to_pos.remove(id) else {
            return false;
        };
        for slot in inner.pos_map.iter_mut() {
            if *slot == Some(pos) {
                *slot = None;
            }
        }
        true
    }

    /// Fetch a record by id from the canonical list
    pub fn get(&self, id: &str) -> Option<Record> {
        let inner = self.inner.read().unwrap();
        inner
            .id_to_pos
            .get(id)
            .and_then(|&pos| inner.records.get(pos))
            .cloned()
    }

    /// Record the retrieval of the given ids (access stats move forward)
    pub fn touch_all(&self, ids: &[String]) {
        let now = Utc::now();
        let mut inner = self.inner.write().unwrap();
        for id in ids {
            if let Some(&pos) = inner.id_to_pos.get(id) {
                inner.records[pos].touch(now);
            }
        }
    }

    /// Current stats
    pub fn stats(&self) -> IndexStats {
        let inner = self.inner.read().unwrap();
        IndexStats {
            records: inner.id_to_pos.len(),
            indexed_vectors: inner.index.size(),
            tombstones: inner.pos_map.iter().filter(|s| s.is_none()).count(),
            dimensions: self.dim,
        }
    }

    /// Filter-aware similarity search over the combined view.
    ///
    /// `limit` of `None` truncates at the zoom's result cap. Candidates from
    /// both paths are deduplicated by id keeping the highest similarity;
    /// within a similarity band of 0.01 the more recently indexed candidate
    /// ranks first.
    pub async fn search(
        &self,
        query_embedding: &[f64],
        state: &NavigationState,
        limit: Option<usize>,
        threshold: f64,
    ) -> Result<Vec<ScoredRecord>> {
        self.search_with(
            query_embedding,
            state,
            &SearchOptions {
                limit,
                threshold,
                ..SearchOptions::default()
            },
        )
        .await
    }

    /// [`LocalIndex::search`] with full per-call tuning
    pub async fn search_with(
        &self,
        query_embedding: &[f64],
        state: &NavigationState,
        options: &SearchOptions,
    ) -> Result<Vec<ScoredRecord>> {
        if query_embedding.len() != self.dim {
            return Err(CoreError::DimensionMismatch {
                expected: self.dim,
                got: query_embedding.len(),
            });
        }
        let threshold = options.threshold;
        let limit = options.limit.unwrap_or_else(|| state.zoom.result_cap());

        // Fast path: the in-memory index. Recency = record position.
        let mut candidates: Vec<(ScoredRecord, usize)> = Vec::new();
        {
            let inner = self.inner.read().unwrap();
            let k = (limit * CANDIDATE_MULTIPLIER).max(limit);
            for (index_pos, distance) in inner.index.search(query_embedding, k)? {
                // Tombstoned or out-of-range positions are misses, not errors
                let Some(&Some(record_pos)) = inner.pos_map.get(index_pos as usize) else {
                    continue;
                };
                let record = &inner.records[record_pos];
                let similarity = distance_to_similarity(inner.index.metric(), distance);
                candidates.push((
                    ScoredRecord {
                        record: record.clone(),
                        similarity,
                        source: CandidateSource::Memory,
                    },
                    record_pos,
                ));
            }
        }

        // Exact path: the auxiliary store, when configured
        if let Some(store) = &self.store {
            let memory_len = candidates.len();
            for (offset, record) in store.scan(None).await?.into_iter().enumerate() {
                let Some(embedding) = &record.embedding else {
                    continue;
                };
                if embedding.len() != self.dim {
                    continue;
                }
                let similarity = cosine_similarity(query_embedding, embedding)?;
                candidates.push((
                    ScoredRecord {
                        record,
                        similarity,
                        source: CandidateSource::Store,
                    },
                    memory_len + offset,
                ));
            }
        }

        // Dedup by id, keeping the highest similarity; equal-similarity
        // duplicates keep the more recently indexed copy.
        let mut best: HashMap<String, (ScoredRecord, usize)> = HashMap::new();
        for (candidate, recency) in candidates {
            match best.get(&candidate.record.id) {
                Some((kept, kept_recency))
                    if kept.similarity >= candidate.similarity
                        && (kept.similarity - candidate.similarity > RECENCY_TIE_BAND
                            || *kept_recency >= recency) => {}
                _ => {
                    best.insert(candidate.record.id.clone(), (candidate, recency));
                }
            }
        }

        // Pan filters and boosts
        let keyword_patterns = compile_keyword_patterns(&state.pan.keywords);
        let mut results: Vec<(ScoredRecord, usize)> = Vec::new();
        for (mut candidate, recency) in best.into_values() {
            if candidate.similarity < threshold {
                continue;
            }
            if !passes_domain_filter(&candidate.record, &state.pan) {
                continue;
            }
            if !options.relax_filters {
                if let Some(window) = &state.pan.temporal {
                    if !window.contains(candidate.record.created_at) {
                        continue;
                    }
                }
            }
            candidate.similarity +=
                keyword_boost(&candidate.record, &keyword_patterns) * options.keyword_boost_scale;
            candidate.similarity += entity_boost(&candidate.record, &state.pan.entities);
            results.push((candidate, recency));
        }

        // Primary order: similarity descending. Within the tie band the
        // more recently indexed candidate moves up (single adjacent pass,
        // documented approximation of the banded preference).
        results.sort_by(|a, b| {
            b.0.similarity
                .partial_cmp(&a.0.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        for i in 1..results.len() {
            let close = (results[i - 1].0.similarity - results[i].0.similarity).abs()
                < RECENCY_TIE_BAND;
            if close && results[i].1 > results[i - 1].1 {
                results.swap(i - 1, i);
            }
        }

        results.truncate(limit);
        debug!(
            results = results.len(),
            threshold,
            zoom = state.zoom.as_str(),
            "local index search"
        );
        Ok(results.into_iter().map(|(c, _)| c).collect())
    }
}

// ============================================================================
// FILTERS / BOOSTS
// ============================================================================

fn distance_to_similarity(metric: DistanceMetric, distance: f64) -> f64 {
    match metric {
        DistanceMetric::Cosine => 1.0 - distance,
        // L2-style distances map through a soft exponential
        DistanceMetric::Euclidean | DistanceMetric::Manhattan => (-distance / 2.0).exp(),
    }
}

/// Substring match of any pan domain against any record domain
fn passes_domain_filter(record: &Record, pan: &PanFilter) -> bool {
    if pan.domains.is_empty() {
        return true;
    }
    pan.domains
        .iter()
        .any(|wanted| record.domains.iter().any(|d| d.contains(wanted.as_str())))
}

fn compile_keyword_patterns(keywords: &[String]) -> Vec<Regex> {
    keywords
        .iter()
        .filter_map(|kw| Regex::new(&format!(r"(?i)\b{}\b", regex::escape(kw))).ok())
        .collect()
}

fn keyword_boost(record: &Record, patterns: &[Regex]) -> f64 {
    let haystack = format!("{} {}", record.label, record.content);
    patterns
        .iter()
        .filter(|p| p.is_match(&haystack))
        .count() as f64
        * KEYWORD_BOOST
}

fn entity_boost(record: &Record, entities: &[String]) -> f64 {
    let haystack = format!("{} {}", record.label, record.content).to_lowercase();
    if entities
        .iter()
        .any(|e| haystack.contains(&e.to_lowercase()))
    {
        ENTITY_BOOST
    } else {
        0.0
    }
}

// ============================================================================
// TESTS
// ============================================================================
