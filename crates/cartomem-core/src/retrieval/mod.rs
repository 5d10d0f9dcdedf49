//! Adaptive Search
//!
//! Multi-pass local retrieval that widens scope until the quality target is
//! met. Pass 1 runs at the zoom-derived threshold and cap; each further pass
//! relaxes the threshold and widens the limit. Never errors on empty: an
//! empty result carries a reason instead.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::index::{LocalIndex, ScoredRecord, SearchOptions};
use crate::nav::NavigationState;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Hard floor on the relaxed similarity threshold
pub const THRESHOLD_FLOOR: f64 = 0.15;

/// Threshold shrink factor for the second pass
const PASS2_THRESHOLD_FACTOR: f64 = 0.7;

/// Limit widening factor for the second pass
const PASS2_LIMIT_FACTOR: usize = 2;

/// Keyword boost multiplier for widened passes
const WIDENED_KEYWORD_BOOST_SCALE: f64 = 2.0;

/// Adaptive search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdaptiveSearchConfig {
    /// Maximum number of passes
    pub max_passes: usize,
    /// Result count at which the search stops early
    pub target_results: usize,
}

impl Default for AdaptiveSearchConfig {
    fn default() -> Self {
        Self {
            max_passes: 3,
            target_results: 5,
        }
    }
}

// ============================================================================
// RESULT
// ============================================================================

/// Stats for one executed pass
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassStats {
    pub pass: usize,
    pub threshold: f64,
    pub limit: usize,
    pub results: usize,
}

/// Outcome of an adaptive search
#[derive(Debug, Clone)]
pub struct AdaptiveSearchResult {
    /// Final candidate set, best first
    pub contexts: Vec<ScoredRecord>,
    /// Number of passes executed
    pub passes: usize,
    /// Thresholds used, one per executed pass
    pub threshold_config: Vec<f64>,
    pub per_pass_stats: Vec<PassStats>,
    /// Present when the search came back empty
    pub reason: Option<String>,
}

// ============================================================================
// ADAPTIVE SEARCH
// ============================================================================

/// Multi-pass threshold-relaxing search over a [`LocalIndex`]
#[derive(Debug, Clone, Default)]
pub struct AdaptiveSearch {
    config: AdaptiveSearchConfig,
}

impl AdaptiveSearch {
    pub fn new(config: AdaptiveSearchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AdaptiveSearchConfig {
        &self.config
    }

    /// Run up to `max_passes` passes, stopping once the target count is
    /// reached.
    pub async fn run(
        &self,
        index: &LocalIndex,
        query_embedding: &[f64],
        state: &NavigationState,
    ) -> Result<AdaptiveSearchResult> {
        let base_threshold = state.zoom.base_threshold();
        let base_limit = state.zoom.result_cap();

        let mut contexts: Vec<ScoredRecord> = Vec::new();
        let mut threshold_config = Vec::new();
        let mut per_pass_stats = Vec::new();
        let mut passes = 0;

        for pass in 1..=self.config.max_passes.max(1) {
            let options = match pass {
                1 => SearchOptions {
                    limit: Some(base_limit),
                    threshold: base_threshold,
                    ..SearchOptions::default()
                },
                2 => SearchOptions {
                    limit: Some(base_limit * PASS2_LIMIT_FACTOR),
                    threshold: (base_threshold * PASS2_THRESHOLD_FACTOR).max(THRESHOLD_FLOOR),
                    keyword_boost_scale: WIDENED_KEYWORD_BOOST_SCALE,
                    relax_filters: false,
                },
                // Final pass: zoom floor, non-essential filters dropped
                _ => SearchOptions {
                    limit: Some(base_limit * PASS2_LIMIT_FACTOR),
                    threshold: THRESHOLD_FLOOR,
                    keyword_boost_scale: WIDENED_KEYWORD_BOOST_SCALE,
                    relax_filters: true,
                },
            };

            passes = pass;
            threshold_config.push(options.threshold);
            let results = index.search_with(query_embedding, state, &options).await?;
            per_pass_stats.push(PassStats {
                pass,
                threshold: options.threshold,
                limit: options.limit.unwrap_or(base_limit),
                results: results.len(),
            });
            debug!(
                pass,
                threshold = options.threshold,
                results = results.len(),
                "adaptive search pass"
            );
            contexts = results;

            if contexts.len() >= self.config.target_results {
                break;
            }
        }

        let reason = contexts
            .is_empty()
            .then(|| format!("no candidates above threshold floor {}", THRESHOLD_FLOOR));

        Ok(AdaptiveSearchResult {
            contexts,
            passes,
            threshold_config,
            per_pass_stats,
            reason,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
