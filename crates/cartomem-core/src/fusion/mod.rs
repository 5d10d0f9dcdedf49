//! Fusion Core
//!
//! The query entry point. Resolves the navigation state, runs the local
//! adaptive search and the external enhancement branch in true parallel
//! (each under its own timeout), scores the evidence, selects a fusion
//! strategy, computes branch weights, and assembles one merged context with
//! span-level attribution. A query always returns a structured envelope;
//! one branch's failure never kills the other.

use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::{timeout, Instant};
use tracing::{debug, info};

use crate::enhance::{EnhanceOptions, EnhancementBroker, EnhancementResult};
use crate::index::{LocalIndex, ScoredRecord};
use crate::nav::{NavigationState, Zoom};
use crate::relevance::{RelevanceEngine, UserContext};
use crate::retrieval::{AdaptiveSearch, AdaptiveSearchResult};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Default per-branch timeout
pub const DEFAULT_BRANCH_TIMEOUT_MS: u64 = 15_000;

/// Personal-relevance gate for `personal_primary`
const MIN_PERSONAL_RELEVANCE: f64 = 0.3;

/// Enhancement-quality gate for `enhancement_primary`
const MIN_ENHANCEMENT_QUALITY: f64 = 0.5;

/// Weight floor per non-zero branch
const WEIGHT_FLOOR: f64 = 0.05;

/// Factor weights: quality, zpt alignment, recency, coverage, confidence
const FACTOR_WEIGHTS: [f64; 5] = [0.40, 0.25, 0.15, 0.15, 0.05];

/// Personal spans merged into the context
const MERGE_TOP_PERSONAL: usize = 3;

/// Excerpt length in merged spans
const EXCERPT_LEN: usize = 200;

// ============================================================================
// REQUEST / RESPONSE ENVELOPES
// ============================================================================

/// A fusion query
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub query_embedding: Option<Vec<f64>>,
    #[serde(default = "default_true")]
    pub use_local: bool,
    /// External sources to consult; empty skips the enhancement branch
    #[serde(default)]
    pub use_external_sources: Vec<String>,
    #[serde(default)]
    pub state: Option<NavigationState>,
    #[serde(default)]
    pub deadline_ms: Option<u64>,
    #[serde(skip)]
    pub user: Option<UserContext>,
}

fn default_true() -> bool {
    true
}

impl QueryRequest {
    /// Minimal local-only query
    pub fn local(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            query_embedding: None,
            use_local: true,
            use_external_sources: Vec::new(),
            state: None,
            deadline_ms: None,
            user: None,
        }
    }
}

/// Discrete fusion outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionStrategy {
    NoContext,
    PersonalOnly,
    EnhancementOnly,
    PersonalPrimary,
    EnhancementPrimary,
    Balanced,
}

/// Final branch weights
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FusionWeights {
    pub personal: f64,
    pub external: f64,
    pub confidence: f64,
}

/// One attributed span of the merged context
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSpan {
    pub text: String,
    /// `personal` or `external:<name>`
    pub source: String,
    pub weight: f64,
}

/// The merged context block handed to a downstream generator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedContext {
    pub spans: Vec<ContextSpan>,
    pub summary_text: String,
}

/// One personal result row
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalResult {
    pub id: String,
    pub similarity: f64,
    pub domains: Vec<String>,
    pub excerpt: String,
}

/// One external result row
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalResult {
    pub source: String,
    pub summary: String,
    pub items: Vec<crate::enhance::SourceItem>,
}

/// Query diagnostics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    pub passes: usize,
    pub timings_ms: Timings,
    pub cache_hits: Vec<String>,
    pub failures: Vec<String>,
}

/// Branch and total timings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timings {
    pub local_ms: u64,
    pub external_ms: u64,
    pub total_ms: u64,
}

/// The full query answer envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub success: bool,
    pub strategy: FusionStrategy,
    pub merged_context: MergedContext,
    pub weights: FusionWeights,
    pub personal_results: Vec<PersonalResult>,
    pub external_results: Vec<ExternalResult>,
    pub diagnostics: Diagnostics,
}

// ============================================================================
// BRANCH OUTCOMES
// ============================================================================

enum LocalBranch {
    Ready(AdaptiveSearchResult),
    Skipped(String),
    Failed(String),
    TimedOut,
}

enum ExternalBranch {
    Ready(EnhancementResult),
    CacheHit { content: String, sources: Vec<String>, quality: f64 },
    Skipped,
    TimedOut,
}

// ============================================================================
// CONFIG
// ============================================================================

/// Fusion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FusionConfig {
    pub branch_timeout_ms: u64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            branch_timeout_ms: DEFAULT_BRANCH_TIMEOUT_MS,
        }
    }
}

// ============================================================================
// FUSION CORE
// ============================================================================

/// Orchestrates the two retrieval branches and fuses their evidence
pub struct FusionCore {
    index: Arc<LocalIndex>,
    broker: Arc<EnhancementBroker>,
    relevance: Arc<StdRwLock<RelevanceEngine>>,
    adaptive: AdaptiveSearch,
    config: FusionConfig,
}

impl FusionCore {
    pub fn new(
        index: Arc<LocalIndex>,
        broker: Arc<EnhancementBroker>,
        relevance: Arc<StdRwLock<RelevanceEngine>>,
        adaptive: AdaptiveSearch,
        config: FusionConfig,
    ) -> Self {
        Self {
            index,
            broker,
            relevance,
            adaptive,
            config,
        }
    }

    /// Run one query end to end. Always returns an envelope.
    pub async fn query(&self, request: QueryRequest) -> QueryResponse {
        let started = Instant::now();
        let now = Utc::now();
        let state = request
            .state
            .clone()
            .map(|s| s.normalized())
            .unwrap_or_else(NavigationState::defaults);

        let branch_timeout = Duration::from_millis(
            request
                .deadline_ms
                .map(|d| d.min(self.config.branch_timeout_ms))
                .unwrap_or(self.config.branch_timeout_ms),
        );

        // Resolve the query embedding: caller-provided, or embedded here
        let embedding = match &request.query_embedding {
            Some(e) => Some(e.clone()),
            None => self.broker.embed_query(&request.query).await.ok(),
        };

        // Consult the cross-source semantic cache before fanning out
        let cached_external = embedding.as_ref().and_then(|e| {
            self.broker
                .semantic_cache()
                .lock()
                .unwrap()
                .lookup(e, now)
                .map(|hit| ExternalBranch::CacheHit {
                    content: hit.entry.content,
                    sources: hit.entry.sources,
                    quality: hit.entry.quality,
                })
        });

        // ---- the two branches, in true parallel -----------------------
        let local_fut = async {
            let branch_started = Instant::now();
            let outcome = if !request.use_local {
                LocalBranch::Skipped("local search disabled".into())
            } else if let Some(embedding) = &embedding {
                match timeout(
                    branch_timeout,
                    self.adaptive.run(&self.index, embedding, &state),
                )
                .await
                {
                    Ok(Ok(result)) => LocalBranch::Ready(result),
                    Ok(Err(err)) => LocalBranch::Failed(err.to_string()),
                    Err(_) => LocalBranch::TimedOut,
                }
            } else {
                LocalBranch::Skipped("no query embedding available".into())
            };
            (outcome, branch_started.elapsed().as_millis() as u64)
        };

        let external_fut = async {
            let branch_started = Instant::now();
            let outcome = if let Some(hit) = cached_external {
                hit
            } else if request.use_external_sources.is_empty() {
                ExternalBranch::Skipped
            } else {
                let options = EnhanceOptions {
                    max_sources: Some(max_sources_for_zoom(state.zoom)),
                    source_names: request.use_external_sources.clone(),
                };
                match timeout(branch_timeout, self.broker.enhance(&request.query, &options)).await
                {
                    Ok(result) => ExternalBranch::Ready(result),
                    Err(_) => ExternalBranch::TimedOut,
                }
            };
            (outcome, branch_started.elapsed().as_millis() as u64)
        };

        let ((local, local_ms), (external, external_ms)) = tokio::join!(local_fut, external_fut);

        // ---- gather branch evidence -----------------------------------
        let mut failures = Vec::new();
        let mut cache_hits = Vec::new();
        let mut passes = 0;

        let personal: Vec<ScoredRecord> = match &local {
            LocalBranch::Ready(result) => {
                passes = result.passes;
                result.contexts.clone()
            }
            LocalBranch::Skipped(reason) => {
                debug!(reason = %reason, "local branch skipped");
                Vec::new()
            }
            LocalBranch::Failed(reason) => {
                failures.push(format!("local:{}", reason));
                Vec::new()
            }
            LocalBranch::TimedOut => {
                failures.push("local:timeout".into());
                Vec::new()
            }
        };

        let (external_results, external_answer, external_sources, live_result, external_quality_hint) =
            match &external {
                ExternalBranch::Ready(result) => {
                    for failure in &result.individual_results.failed {
                        failures.push(format!("{}:{}", failure.source, failure.reason));
                    }
                    cache_hits.extend(result.metadata.cache_hits.iter().cloned());
                    let rows = result
                        .individual_results
                        .successful
                        .iter()
                        .map(|s| ExternalResult {
                            source: s.source.clone(),
                            summary: s.result.summary.clone(),
                            items: s.result.items.clone(),
                        })
                        .collect();
                    (
                        rows,
                        result.answer.clone(),
                        result.sources.clone(),
                        Some(result.clone()),
                        None,
                    )
                }
                ExternalBranch::CacheHit {
                    content,
                    sources,
                    quality,
                } => {
                    cache_hits.push("semantic".into());
                    let rows = vec![ExternalResult {
                        source: format!("cache:{}", sources.join("+")),
                        summary: content.clone(),
                        items: Vec::new(),
                    }];
                    (rows, Some(content.clone()), sources.clone(), None, Some(*quality))
                }
                ExternalBranch::Skipped => (Vec::new(), None, Vec::new(), None, None),
                ExternalBranch::TimedOut => {
                    failures.push("external:timeout".into());
                    (Vec::new(), None, Vec::new(), None, None)
                }
            };

        // ---- relevance analysis (C7 over the personal branch) ---------
        let personal = self.rank_by_relevance(personal, &state, embedding.as_deref(), &request, now);
        let personal_present = !personal.is_empty();
        let external_present = external_answer.is_some();

        let personal_relevance = personal_relevance(&personal, &state);
        let enhancement_quality = external_quality_hint.unwrap_or_else(|| {
            live_result
                .as_ref()
                .map(enhancement_quality_of)
                .unwrap_or(0.0)
        });

        // ---- strategy and weights -------------------------------------
        let strategy = select_strategy(
            personal_present,
            external_present,
            state.zoom,
            personal_relevance,
            enhancement_quality,
        );

        let weights = compute_weights(
            strategy,
            &personal,
            personal_relevance,
            enhancement_quality,
            &external_sources,
            external_results.iter().map(|r| r.items.len()).sum(),
            matches!(external, ExternalBranch::CacheHit { .. }),
            state.zoom,
            now,
        );

        // ---- merge ----------------------------------------------------
        let merged_context = merge_context(
            &personal,
            &external_results,
            &external_answer,
            weights,
            strategy,
        );

        // Returned records count as retrieved
        let touched: Vec<String> = personal.iter().map(|r| r.record.id.clone()).collect();
        self.index.touch_all(&touched);

        // ---- cache the live enhancement under the query embedding -----
        if let (Some(result), Some(embedding)) = (&live_result, &embedding) {
            if result.success {
                self.broker
                    .cache_result(&request.query, embedding, result, enhancement_quality);
            }
        }

        let personal_results = personal
            .iter()
            .map(|r| PersonalResult {
                id: r.record.id.clone(),
                similarity: r.similarity,
                domains: r.record.domains.clone(),
                excerpt: excerpt(&r.record.content),
            })
            .collect();

        let both_branches_dead = !personal_present
            && !external_present
            && failures.iter().any(|f| f.starts_with("local:"))
            && (failures.iter().any(|f| !f.starts_with("local:"))
                || request.use_external_sources.is_empty());

        let response = QueryResponse {
            success: !both_branches_dead,
            strategy,
            merged_context,
            weights,
            personal_results,
            external_results,
            diagnostics: Diagnostics {
                passes,
                timings_ms: Timings {
                    local_ms,
                    external_ms,
                    total_ms: started.elapsed().as_millis() as u64,
                },
                cache_hits,
                failures,
            },
        };
        info!(
            strategy = ?response.strategy,
            personal = response.personal_results.len(),
            external = response.external_results.len(),
            "fusion query complete"
        );
        response
    }

    /// Re-rank the personal branch by multi-factor relevance, keeping raw
    /// similarity visible on each row
    fn rank_by_relevance(
        &self,
        mut personal: Vec<ScoredRecord>,
        state: &NavigationState,
        focus: Option<&[f64]>,
        request: &QueryRequest,
        now: DateTime<Utc>,
    ) -> Vec<ScoredRecord> {
        if personal.len() < 2 {
            return personal;
        }
        let records: Vec<_> = personal.iter().map(|r| r.record.clone()).collect();
        let scores = self.relevance.read().unwrap().score_batch(
            &records,
            state,
            focus,
            &request.query,
            request.user.as_ref(),
            now,
        );
        let mut paired: Vec<(ScoredRecord, f64)> = personal
            .drain(..)
            .zip(scores.into_iter().map(|s| s.score))
            .collect();
        // Blend retrieval similarity with contextual relevance
        paired.sort_by(|a, b| {
            let ka = a.0.similarity * 0.5 + a.1 * 0.5;
            let kb = b.0.similarity * 0.5 + b.1 * 0.5;
            kb.partial_cmp(&ka).unwrap_or(std::cmp::Ordering::Equal)
        });
        paired.into_iter().map(|(r, _)| r).collect()
    }
}

// ============================================================================
// ANALYSIS / STRATEGY / WEIGHTS
// ============================================================================

fn max_sources_for_zoom(zoom: Zoom) -> usize {
    match zoom {
        Zoom::Micro | Zoom::Entity => 1,
        Zoom::Unit | Zoom::Text => 2,
        Zoom::Community => 3,
        Zoom::Corpus => 4,
    }
}

/// Average similarity plus a pan-keyword bonus, capped at 1
fn personal_relevance(personal: &[ScoredRecord], state: &NavigationState) -> f64 {
    if personal.is_empty() {
        return 0.0;
    }
    let avg = personal.iter().map(|r| r.similarity).sum::<f64>() / personal.len() as f64;
    let matched = state
        .pan
        .keywords
        .iter()
        .filter(|kw| {
            let kw = kw.to_lowercase();
            personal
                .iter()
                .any(|r| r.record.content.to_lowercase().contains(&kw))
        })
        .count();
    (avg + matched as f64 * 0.05).min(1.0)
}

/// Base 0.5, +0.1 per successful source (max +0.3), plus length bonuses
fn enhancement_quality_of(result: &EnhancementResult) -> f64 {
    if !result.success {
        return 0.0;
    }
    let sources = result.individual_results.successful.len();
    let mut quality = 0.5 + 0.1 * sources.min(3) as f64;
    let content_len: usize = result
        .individual_results
        .successful
        .iter()
        .map(|s| s.result.content_len())
        .sum();
    if content_len >= 500 {
        quality += 0.1;
    }
    if content_len >= 2000 {
        quality += 0.1;
    }
    quality.min(1.0)
}

fn select_strategy(
    personal: bool,
    external: bool,
    zoom: Zoom,
    personal_relevance: f64,
    enhancement_quality: f64,
) -> FusionStrategy {
    match (personal, external) {
        (false, false) => FusionStrategy::NoContext,
        (true, false) => FusionStrategy::PersonalOnly,
        (false, true) => FusionStrategy::EnhancementOnly,
        (true, true) => match zoom {
            Zoom::Entity | Zoom::Micro if personal_relevance >= MIN_PERSONAL_RELEVANCE => {
                FusionStrategy::PersonalPrimary
            }
            Zoom::Corpus if enhancement_quality >= MIN_ENHANCEMENT_QUALITY => {
                FusionStrategy::EnhancementPrimary
            }
            _ => FusionStrategy::Balanced,
        },
    }
}

/// Personal-branch ZPT alignment; the enhancement branch gets the rest
fn personal_zpt_alignment(zoom: Zoom) -> f64 {
    match zoom {
        Zoom::Micro | Zoom::Entity => 1.0,
        Zoom::Unit => 0.6,
        Zoom::Text => 0.5,
        Zoom::Community => 0.35,
        Zoom::Corpus => 0.2,
    }
}

#[allow(clippy::too_many_arguments)]
fn compute_weights(
    strategy: FusionStrategy,
    personal: &[ScoredRecord],
    personal_relevance: f64,
    enhancement_quality: f64,
    external_sources: &[String],
    external_items: usize,
    external_from_cache: bool,
    zoom: Zoom,
    now: DateTime<Utc>,
) -> FusionWeights {
    match strategy {
        FusionStrategy::NoContext => {
            return FusionWeights {
                personal: 0.0,
                external: 0.0,
                confidence: 0.0,
            }
        }
        FusionStrategy::PersonalOnly => {
            return FusionWeights {
                personal: 1.0,
                external: 0.0,
                confidence: 1.0,
            }
        }
        FusionStrategy::EnhancementOnly => {
            return FusionWeights {
                personal: 0.0,
                external: 1.0,
                confidence: 1.0,
            }
        }
        _ => {}
    }

    // Five factors per branch: quality, zpt, recency, coverage, confidence
    let zpt_p = personal_zpt_alignment(zoom);
    let zpt_e = 1.0 - zpt_p;

    let recency_p = if personal.is_empty() {
        0.0
    } else {
        personal
            .iter()
            .map(|r| {
                let age_hours =
                    (now - r.record.last_accessed).num_milliseconds().max(0) as f64 / 3_600_000.0;
                (-age_hours / 24.0).exp()
            })
            .sum::<f64>()
            / personal.len() as f64
    };
    let recency_e = if external_from_cache { 0.7 } else { 1.0 };

    let coverage_p = (personal.len() as f64 / 5.0).min(1.0);
    let coverage_e = if external_items > 0 {
        (external_items as f64 / 5.0).min(1.0)
    } else {
        (external_sources.len() as f64 / 3.0).min(1.0)
    };

    let conf_p = (0.5 + (personal_relevance - enhancement_quality) / 2.0).clamp(0.0, 1.0);
    let conf_e = 1.0 - conf_p;

    let [wq, wz, wr, wc, wf] = FACTOR_WEIGHTS;
    let mut score_p = wq * personal_relevance + wz * zpt_p + wr * recency_p + wc * coverage_p
        + wf * conf_p;
    let mut score_e = wq * enhancement_quality + wz * zpt_e + wr * recency_e + wc * coverage_e
        + wf * conf_e;

    // Strategy bias
    match strategy {
        FusionStrategy::PersonalPrimary => {
            score_p += 0.2;
            score_e -= 0.1;
        }
        FusionStrategy::EnhancementPrimary => {
            score_e += 0.2;
            score_p -= 0.1;
        }
        _ => {}
    }
    score_p = score_p.max(0.0);
    score_e = score_e.max(0.0);

    // Normalize to sum 1 with a floor per branch
    let sum = score_p + score_e;
    let (mut personal_w, mut external_w) = if sum > 0.0 {
        (score_p / sum, score_e / sum)
    } else {
        (0.5, 0.5)
    };
    if personal_w < WEIGHT_FLOOR {
        personal_w = WEIGHT_FLOOR;
        external_w = 1.0 - WEIGHT_FLOOR;
    }
    if external_w < WEIGHT_FLOOR {
        external_w = WEIGHT_FLOOR;
        personal_w = 1.0 - WEIGHT_FLOOR;
    }

    FusionWeights {
        personal: personal_w,
        external: external_w,
        confidence: ((personal_w - external_w).abs() + 0.3).min(1.0),
    }
}

// ============================================================================
// MERGE
// ============================================================================

fn excerpt(content: &str) -> String {
    if content.len() <= EXCERPT_LEN {
        content.to_string()
    } else {
        let mut cut = EXCERPT_LEN;
        while !content.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}…", &content[..cut])
    }
}

/// Deterministic merge: personal spans first, then one span per external
/// source, each attributed and weighted
fn merge_context(
    personal: &[ScoredRecord],
    external: &[ExternalResult],
    external_answer: &Option<String>,
    weights: FusionWeights,
    strategy: FusionStrategy,
) -> MergedContext {
    let mut spans = Vec::new();

    for scored in personal.iter().take(MERGE_TOP_PERSONAL) {
        spans.push(ContextSpan {
            text: excerpt(&scored.record.content),
            source: "personal".into(),
            weight: weights.personal,
        });
    }
    for result in external {
        if result.summary.is_empty() {
            continue;
        }
        spans.push(ContextSpan {
            text: result.summary.clone(),
            source: format!("external:{}", result.source),
            weight: weights.external,
        });
    }

    let mut summary_parts = Vec::new();
    if let Some(top) = personal.first() {
        summary_parts.push(excerpt(&top.record.content));
    }
    if let Some(answer) = external_answer {
        summary_parts.push(excerpt(answer));
    }

    MergedContext {
        spans,
        summary_text: if summary_parts.is_empty() {
            match strategy {
                FusionStrategy::NoContext => "no relevant context found".into(),
                _ => String::new(),
            }
        } else {
            summary_parts.join("\n")
        },
    }
}

// ============================================================================
// TESTS
// ============================================================================
