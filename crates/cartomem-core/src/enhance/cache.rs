//! Enhancement caches
//!
//! Two layers with different lifetimes:
//! - Per-source FIFO result caches keyed by a normalized query string,
//!   bounded at a fixed entry count.
//! - A cross-source semantic cache keyed by the normalized query embedding,
//!   matched by cosine similarity and expired by a TTL scaled with source
//!   reliability.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::enhance::source::{SourceKind, SourceResult};
use crate::vector::{cosine_similarity, normalized};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Entries per source before FIFO eviction
pub const SOURCE_CACHE_CAP: usize = 100;

/// Cross-source cache entry cap
pub const SEMANTIC_CACHE_CAP: usize = 256;

/// Cosine similarity at which a cached query counts as the same query
pub const SEMANTIC_MATCH_THRESHOLD: f64 = 0.8;

/// Base TTL before reliability scaling
pub const BASE_TTL_DAYS: i64 = 7;

/// Canonical cache key for a query string
pub fn normalize_query(query: &str) -> String {
    query
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// PER-SOURCE FIFO CACHE
// ============================================================================

/// Bounded FIFO cache of source results keyed by normalized query
#[derive(Debug)]
pub struct SourceResultCache {
    entries: VecDeque<(String, SourceResult)>,
    cap: usize,
}

impl SourceResultCache {
    pub fn new(cap: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            cap: cap.max(1),
        }
    }

    pub fn get(&self, query: &str) -> Option<&SourceResult> {
        let key = normalize_query(query);
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
    }

    pub fn insert(&mut self, query: &str, result: SourceResult) {
        let key = normalize_query(query);
        if let Some(pos) = self.entries.iter().position(|(k, _)| *k == key) {
            self.entries.remove(pos);
        }
        if self.entries.len() >= self.cap {
            self.entries.pop_front();
        }
        self.entries.push_back((key, result));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// SEMANTIC CACHE
// ============================================================================

/// A cached cross-source enhancement result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticCacheEntry {
    pub id: String,
    pub query: String,
    /// Unit-normalized query embedding used for matching
    pub query_embedding: Vec<f64>,
    pub content: String,
    pub sources: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub quality: f64,
}

/// A semantic cache hit
#[derive(Debug, Clone)]
pub struct SemanticCacheHit {
    pub entry: SemanticCacheEntry,
    pub similarity: f64,
}

/// Cross-source semantic cache, FIFO-bounded, TTL-filtered on read
#[derive(Debug)]
pub struct SemanticCache {
    entries: VecDeque<SemanticCacheEntry>,
    cap: usize,
    match_threshold: f64,
}

impl Default for SemanticCache {
    fn default() -> Self {
        Self::new(SEMANTIC_CACHE_CAP, SEMANTIC_MATCH_THRESHOLD)
    }
}

impl SemanticCache {
    pub fn new(cap: usize, match_threshold: f64) -> Self {
        Self {
            entries: VecDeque::new(),
            cap: cap.max(1),
            match_threshold,
        }
    }

    /// TTL for an entry whose dominant source has the given kind
    pub fn ttl_for(dominant: SourceKind) -> Duration {
        let base = Duration::days(BASE_TTL_DAYS);
        let secs = base.num_seconds() as f64 * dominant.reliability_factor();
        Duration::seconds(secs as i64)
    }

    /// Best unexpired entry matching the query embedding, if any clears the
    /// similarity threshold. Expired entries are dropped on the way.
    pub fn lookup(&mut self, query_embedding: &[f64], now: DateTime<Utc>) -> Option<SemanticCacheHit> {
        self.entries.retain(|e| e.expires_at > now);

        let query = normalized(query_embedding);
        let mut best: Option<SemanticCacheHit> = None;
        for entry in &self.entries {
            let Ok(similarity) = cosine_similarity(&query, &entry.query_embedding) else {
                continue;
            };
            if similarity < self.match_threshold {
                continue;
            }
            if best
                .as_ref()
                .map(|b| similarity > b.similarity)
                .unwrap_or(true)
            {
                best = Some(SemanticCacheHit {
                    entry: entry.clone(),
                    similarity,
                });
            }
        }
        best
    }

    /// Store a result under its query embedding
    pub fn store(
        &mut self,
        query: &str,
        query_embedding: &[f64],
        content: String,
        sources: Vec<String>,
        dominant: SourceKind,
        quality: f64,
        now: DateTime<Utc>,
    ) {
        if self.entries.len() >= self.cap {
            self.entries.pop_front();
        }
        self.entries.push_back(SemanticCacheEntry {
            id: Uuid::new_v4().to_string(),
            query: query.to_string(),
            query_embedding: normalized(query_embedding),
            content,
            sources,
            created_at: now,
            expires_at: now + Self::ttl_for(dominant),
            quality,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// TESTS
// ============================================================================
