//! Relevance Engine
//!
//! Multi-factor relevance scoring: domain alignment, temporal decay,
//! semantic similarity, and access frequency, combined under per-user or
//! per-context weights, boosted by domain type, and floored so no record is
//! ever permanently invisible.
//!
//! Scoring is pure: the adaptive-weights table is only mutated through
//! [`RelevanceEngine::update_adaptive_weights`], never during scoring.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::nav::{NavigationState, Tilt};
use crate::record::{dominant_domain_type, DomainTag, DomainType, Record};
use crate::vector::cosine_similarity;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Minimum relevance; guarantees recovery of "forgotten" records
pub const RELEVANCE_FLOOR: f64 = 1e-3;

/// Exponent applied to cosine similarity in the semantic factor
const SEMANTIC_EXPONENT: f64 = 0.8;

/// Recency bonus window
const RECENCY_WINDOW_SECS: f64 = 3600.0;

/// Half-lives in seconds, selected by dominant domain type
const HALF_LIFE_PERMANENT: f64 = 365.0 * 86_400.0;
const HALF_LIFE_PROJECT: f64 = 30.0 * 86_400.0;
const HALF_LIFE_SESSION: f64 = 3600.0;
const HALF_LIFE_DAILY: f64 = 86_400.0;

// ============================================================================
// WEIGHTS
// ============================================================================

/// Weights over the four factors; kept normalized to sum 1
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactorWeights {
    pub domain: f64,
    pub temporal: f64,
    pub semantic: f64,
    pub frequency: f64,
}

impl Default for FactorWeights {
    fn default() -> Self {
        Self {
            domain: 0.35,
            temporal: 0.20,
            semantic: 0.30,
            frequency: 0.15,
        }
    }
}

impl FactorWeights {
    /// Rescale so the four weights sum to 1
    pub fn normalized(mut self) -> Self {
        let sum = self.domain + self.temporal + self.semantic + self.frequency;
        if sum > 0.0 {
            self.domain /= sum;
            self.temporal /= sum;
            self.semantic /= sum;
            self.frequency /= sum;
        }
        self
    }

    /// Contextual override: tilt shifts the emphasis before normalization
    pub fn for_tilt(self, tilt: Tilt) -> Self {
        let mut w = self;
        match tilt {
            Tilt::Keywords => w.domain += 0.05,
            Tilt::Embedding => w.semantic += 0.15,
            Tilt::Graph => w.domain += 0.10,
            Tilt::Temporal => w.temporal += 0.15,
        }
        w.normalized()
    }
}

/// Observed engagement signals used to adapt a user's weights
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdaptiveSignals {
    pub domain_delta: f64,
    pub temporal_delta: f64,
    pub semantic_delta: f64,
    pub frequency_delta: f64,
}

// ============================================================================
// USER CONTEXT
// ============================================================================

/// Optional per-user scoring context
#[derive(Debug, Clone, Default)]
pub struct UserContext {
    pub user_id: Option<String>,
    /// Record ids the user touched recently
    pub recent_interactions: HashSet<String>,
    /// Active project domain tag (`"project:<id>"`)
    pub active_project: Option<String>,
    /// Flat bonus added to the frequency factor
    pub user_bonus: f64,
}

// ============================================================================
// SCORE
// ============================================================================

/// Per-factor values behind a final score
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelevanceBreakdown {
    pub domain: f64,
    pub temporal: f64,
    pub semantic: f64,
    pub frequency: f64,
    pub boost: f64,
}

/// A scored record reference
#[derive(Debug, Clone)]
pub struct RelevanceScore {
    pub record_id: String,
    pub score: f64,
    pub breakdown: RelevanceBreakdown,
}

// ============================================================================
// ENGINE
// ============================================================================

/// Multi-factor scorer with an adaptive per-user weight table
#[derive(Debug, Clone, Default)]
pub struct RelevanceEngine {
    base_weights: FactorWeights,
    adaptive: HashMap<String, FactorWeights>,
}

impl RelevanceEngine {
    pub fn new(base_weights: FactorWeights) -> Self {
        Self {
            base_weights: base_weights.normalized(),
            adaptive: HashMap::new(),
        }
    }

    /// Effective weights for a user and navigation state
    pub fn weights_for(&self, user: Option<&UserContext>, state: &NavigationState) -> FactorWeights {
        let base = user
            .and_then(|u| u.user_id.as_ref())
            .and_then(|id| self.adaptive.get(id))
            .copied()
            .unwrap_or(self.base_weights);
        base.for_tilt(state.tilt)
    }

    /// Shift a user's weights by the observed signals. The only mutation
    /// path into the adaptive table.
    pub fn update_adaptive_weights(&mut self, user_id: &str, signals: AdaptiveSignals) {
        let current = self
            .adaptive
            .get(user_id)
            .copied()
            .unwrap_or(self.base_weights);
        let updated = FactorWeights {
            domain: (current.domain + signals.domain_delta).max(0.01),
            temporal: (current.temporal + signals.temporal_delta).max(0.01),
            semantic: (current.semantic + signals.semantic_delta).max(0.01),
            frequency: (current.frequency + signals.frequency_delta).max(0.01),
        }
        .normalized();
        self.adaptive.insert(user_id.to_string(), updated);
    }

    /// Score one record against a navigation state
    pub fn score(
        &self,
        record: &Record,
        state: &NavigationState,
        focus_embedding: Option<&[f64]>,
        query_text: &str,
        user: Option<&UserContext>,
        now: DateTime<Utc>,
    ) -> RelevanceScore {
        let weights = self.weights_for(user, state);
        let pan_domains: HashSet<&str> = state.pan.domains.iter().map(|d| d.as_str()).collect();
        self.score_with(record, &weights, &pan_domains, focus_embedding, query_text, user, now)
    }

    /// Score a batch; shared inputs (time, focus embedding, pan domains,
    /// weights) are resolved once, the records scored in parallel.
    pub fn score_batch(
        &self,
        records: &[Record],
        state: &NavigationState,
        focus_embedding: Option<&[f64]>,
        query_text: &str,
        user: Option<&UserContext>,
        now: DateTime<Utc>,
    ) -> Vec<RelevanceScore> {
        let weights = self.weights_for(user, state);
        let pan_domains: HashSet<&str> = state.pan.domains.iter().map(|d| d.as_str()).collect();

        records
            .par_iter()
            .map(|record| {
                self.score_with(
                    record,
                    &weights,
                    &pan_domains,
                    focus_embedding,
                    query_text,
                    user,
                    now,
                )
            })
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn score_with(
        &self,
        record: &Record,
        weights: &FactorWeights,
        pan_domains: &HashSet<&str>,
        focus_embedding: Option<&[f64]>,
        query_text: &str,
        user: Option<&UserContext>,
        now: DateTime<Utc>,
    ) -> RelevanceScore {
        let domain = domain_factor(record, pan_domains);
        let temporal = temporal_factor(record, now);
        let semantic = semantic_factor(record, focus_embedding, query_text);
        let frequency = frequency_factor(record, user);

        let mut score = weights.domain * domain
            + weights.temporal * temporal
            + weights.semantic * semantic
            + weights.frequency * frequency;

        let boost = domain_boost(record) * contextual_modifier(record, user);
        score = (score * boost).clamp(RELEVANCE_FLOOR, 1.0);

        RelevanceScore {
            record_id: record.id.clone(),
            score,
            breakdown: RelevanceBreakdown {
                domain,
                temporal,
                semantic,
                frequency,
                boost,
            },
        }
    }
}

// ============================================================================
// FACTORS
// ============================================================================

/// Jaccard overlap of record and pan domains.
/// Both empty scores 1 (nothing to disagree on); exactly one empty scores
/// 0.1 (a filtered view mildly penalizes untagged records and vice versa).
fn domain_factor(record: &Record, pan_domains: &HashSet<&str>) -> f64 {
    let record_domains: HashSet<&str> = record.domains.iter().map(|d| d.as_str()).collect();
    match (record_domains.is_empty(), pan_domains.is_empty()) {
        (true, true) => 1.0,
        (true, false) | (false, true) => 0.1,
        (false, false) => {
            let intersection = record_domains.intersection(pan_domains).count();
            let union = record_domains.union(pan_domains).count();
            intersection as f64 / union as f64
        }
    }
}

/// Exponential decay by age, half-life selected by dominant domain type,
/// plus a recency bonus inside the last hour
fn temporal_factor(record: &Record, now: DateTime<Utc>) -> f64 {
    let age_secs = (now - record.last_accessed).num_milliseconds().max(0) as f64 / 1000.0;

    let half_life = match dominant_domain_type(&record.domains) {
        Some(DomainType::Instruction) | Some(DomainType::User) => HALF_LIFE_PERMANENT,
        Some(DomainType::Project) => HALF_LIFE_PROJECT,
        Some(DomainType::Session) => HALF_LIFE_SESSION,
        _ => HALF_LIFE_DAILY,
    };

    let mut value = (-age_secs / half_life).exp();
    if age_secs < RECENCY_WINDOW_SECS {
        value += 0.2 * (1.0 - age_secs / RECENCY_WINDOW_SECS);
    }
    value.min(1.0)
}

/// Cosine similarity of record and focus embedding raised to 0.8, or a
/// token-overlap fallback when either embedding is missing
fn semantic_factor(record: &Record, focus_embedding: Option<&[f64]>, query_text: &str) -> f64 {
    if let (Some(embedding), Some(focus)) = (&record.embedding, focus_embedding) {
        if let Ok(sim) = cosine_similarity(embedding, focus) {
            return sim.max(0.0).powf(SEMANTIC_EXPONENT);
        }
    }
    token_overlap(query_text, &format!("{} {}", record.label, record.content))
}

/// Jaccard over lowercase word tokens
fn token_overlap(a: &str, b: &str) -> f64 {
    let tokens = |s: &str| -> HashSet<String> {
        s.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_string())
            .collect()
    };
    let ta = tokens(a);
    let tb = tokens(b);
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let intersection = ta.intersection(&tb).count();
    let union = ta.union(&tb).count();
    intersection as f64 / union as f64
}

/// Log-scaled access count plus caller importance plus user bonus
fn frequency_factor(record: &Record, user: Option<&UserContext>) -> f64 {
    let access = 0.6 * ((1.0 + record.access_count as f64).ln() / 100.0_f64.ln());
    let bonus = user.map(|u| u.user_bonus).unwrap_or(0.0);
    (access + 0.4 * record.importance + bonus).clamp(0.0, 1.0)
}

/// Multiplicative boost per domain type present on the record, capped at
/// 1.0: type boosts can offset the penalty of low-priority tags but never
/// inflate the weighted sum on their own
fn domain_boost(record: &Record) -> f64 {
    let mut boost: f64 = 1.0;
    let mut seen = HashSet::new();
    for tag in &record.domains {
        let t = DomainTag::parse(tag).domain_type;
        if !seen.insert(t) {
            continue;
        }
        boost *= match t {
            DomainType::Instruction => 1.5,
            DomainType::User => 1.2,
            DomainType::Project => 1.0,
            DomainType::Session => 0.8,
            DomainType::Other => 1.0,
        };
    }
    boost.min(1.0)
}

/// Context bumps: recent interaction +30%, active-project match +20%,
/// instruction records +50%
fn contextual_modifier(record: &Record, user: Option<&UserContext>) -> f64 {
    let mut modifier = 1.0;
    if let Some(user) = user {
        if user.recent_interactions.contains(&record.id) {
            modifier *= 1.3;
        }
        if let Some(project) = &user.active_project {
            if record.domains.iter().any(|d| d == project) {
                modifier *= 1.2;
            }
        }
    }
    if record
        .domains
        .iter()
        .any(|d| DomainTag::parse(d).domain_type == DomainType::Instruction)
    {
        modifier *= 1.5;
    }
    modifier
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(id: &str) -> Record {
        let now = Utc::now();
        Record {
            id: id.to_string(),
            label: "semantic maps".into(),
            content: "self organizing maps cluster embeddings onto a grid".into(),
            embedding: Some(vec![1.0, 0.0, 0.0, 0.0]),
            created_at: now,
            last_accessed: now,
            access_count: 0,
            domains: vec![],
            importance: 0.5,
            metadata: serde_json::Value::Null,
        }
    }

    fn dim_state() -> NavigationState {
        NavigationState::defaults()
    }

    #[test]
    fn test_score_within_bounds_and_pure() {
        let engine = RelevanceEngine::default();
        let now = Utc::now();
        let r = record("r1");
        let focus = vec![1.0, 0.0, 0.0, 0.0];

        let a = engine.score(&r, &dim_state(), Some(&focus), "maps", None, now);
        let b = engine.score(&r, &dim_state(), Some(&focus), "maps", None, now);
        assert!((RELEVANCE_FLOOR..=1.0).contains(&a.score));
        assert_eq!(a.score, b.score);
    }

    #[test]
    fn test_floor_guarantees_recovery() {
        let engine = RelevanceEngine::default();
        let now = Utc::now();
        // Stale session record with nothing going for it
        let mut r = record("forgotten");
        r.domains = vec!["session:old".into()];
        r.last_accessed = now - Duration::days(30);
        r.embedding = None;
        r.importance = 0.0;
        r.content = "zzz".into();
        r.label = "zzz".into();

        let score = engine.score(&r, &dim_state(), None, "unrelated query", None, now);
        assert!(score.score >= RELEVANCE_FLOOR);
    }

    #[test]
    fn test_domain_factor_rules() {
        let none: HashSet<&str> = HashSet::new();
        let some: HashSet<&str> = ["project:a"].into_iter().collect();

        let untagged = record("r");
        assert_eq!(domain_factor(&untagged, &none), 1.0);
        assert_eq!(domain_factor(&untagged, &some), 0.1);

        let mut tagged = record("r");
        tagged.domains = vec!["project:a".into(), "user:u".into()];
        assert_eq!(domain_factor(&tagged, &none), 0.1);
        // Jaccard = 1 / 2
        assert!((domain_factor(&tagged, &some) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_temporal_half_life_selection() {
        let now = Utc::now();
        let age = Duration::hours(2);

        let mut session = record("s");
        session.domains = vec!["session:x".into()];
        session.last_accessed = now - age;

        let mut instruction = record("i");
        instruction.domains = vec!["instruction:x".into()];
        instruction.last_accessed = now - age;

        // Two hours is two session half-lives but negligible against a year
        assert!(temporal_factor(&session, now) < 0.3);
        assert!(temporal_factor(&instruction, now) > 0.99);
    }

    #[test]
    fn test_recency_bonus() {
        let now = Utc::now();
        let mut fresh = record("f");
        fresh.last_accessed = now - Duration::seconds(60);
        let mut old = record("o");
        old.last_accessed = now - Duration::hours(3);
        assert!(temporal_factor(&fresh, now) > temporal_factor(&old, now));
        assert!(temporal_factor(&fresh, now) <= 1.0);
    }

    #[test]
    fn test_semantic_fallback_to_tokens() {
        let mut r = record("r");
        r.embedding = None;
        let s = semantic_factor(&r, None, "self organizing maps");
        assert!(s > 0.0);
        let none = semantic_factor(&r, None, "unrelated terms entirely");
        assert!(none < s);
    }

    #[test]
    fn test_frequency_monotonic_in_access_count() {
        let mut a = record("a");
        let mut b = record("b");
        a.access_count = 1;
        b.access_count = 50;
        assert!(frequency_factor(&b, None) > frequency_factor(&a, None));
    }

    #[test]
    fn test_ranking_stable_under_access_scaling() {
        let engine = RelevanceEngine::default();
        let now = Utc::now();
        let state = dim_state();

        let mut records: Vec<Record> = (0..5)
            .map(|i| {
                let mut r = record(&format!("r{}", i));
                r.access_count = (i as u64 + 1) * 3;
                r
            })
            .collect();

        let rank = |records: &[Record]| -> Vec<String> {
            let mut scored = engine.score_batch(records, &state, None, "maps", None, now);
            scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
            scored.into_iter().map(|s| s.record_id).collect()
        };

        let before = rank(&records);
        for r in records.iter_mut() {
            r.access_count *= 7;
        }
        let after = rank(&records);
        assert_eq!(before, after);
    }

    #[test]
    fn test_instruction_records_boosted() {
        let engine = RelevanceEngine::default();
        let now = Utc::now();
        let state = dim_state();

        // Same factor inputs except the domain type
        let mut session = record("session");
        session.domains = vec!["session:x".into()];
        let mut instr = record("instr");
        instr.domains = vec!["instruction:rules".into()];

        let s = engine.score(&session, &state, None, "maps", None, now);
        let i = engine.score(&instr, &state, None, "maps", None, now);
        assert!(i.score > s.score, "instruction lost its boost");
        // Instruction: domain boost capped at 1.0, contextual x1.5
        assert!((i.breakdown.boost - 1.5).abs() < 1e-12);
        assert!((s.breakdown.boost - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_domain_boost_capped_across_types() {
        // Two boosting types would compound to 1.5 * 1.2 = 1.8 uncapped
        let mut multi = record("multi");
        multi.domains = vec!["instruction:rules".into(), "user:u1".into()];
        assert_eq!(domain_boost(&multi), 1.0);

        // A boost may offset a penalty but the product still caps at 1.0
        let mut offset = record("offset");
        offset.domains = vec!["session:x".into(), "instruction:rules".into()];
        assert_eq!(domain_boost(&offset), 1.0);

        // Below 1.0 the product is untouched
        let mut penalized = record("penalized");
        penalized.domains = vec!["session:x".into(), "user:u1".into()];
        let boost = domain_boost(&penalized);
        assert!(boost < 1.0);
        assert!((boost - 0.96).abs() < 1e-12);
    }

    #[test]
    fn test_adaptive_weights_update_only_via_api() {
        let mut engine = RelevanceEngine::default();
        let defaults = engine.weights_for(None, &dim_state());

        engine.update_adaptive_weights(
            "u1",
            AdaptiveSignals {
                semantic_delta: 0.2,
                ..AdaptiveSignals::default()
            },
        );

        let user = UserContext {
            user_id: Some("u1".into()),
            ..UserContext::default()
        };
        let adapted = engine.weights_for(Some(&user), &dim_state());
        assert!(adapted.semantic > defaults.semantic);

        // Weights stay normalized
        let sum = adapted.domain + adapted.temporal + adapted.semantic + adapted.frequency;
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_tilt_overrides() {
        let base = FactorWeights::default();
        let temporal = base.for_tilt(Tilt::Temporal);
        assert!(temporal.temporal > base.normalized().temporal);
        let embedding = base.for_tilt(Tilt::Embedding);
        assert!(embedding.semantic > base.normalized().semantic);
    }

    #[test]
    fn test_recent_interaction_modifier() {
        let engine = RelevanceEngine::default();
        let now = Utc::now();
        let r = record("seen");

        let user = UserContext {
            recent_interactions: ["seen".to_string()].into_iter().collect(),
            ..UserContext::default()
        };
        let with = engine.score(&r, &dim_state(), None, "maps", Some(&user), now);
        let without = engine.score(&r, &dim_state(), None, "maps", None, now);
        assert!(with.score >= without.score);
    }
}
