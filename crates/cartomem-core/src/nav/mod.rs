//! Navigation state - the Zoom/Pan/Tilt tuple
//!
//! Constrains both retrieval scope and fusion weights. Zoom picks the
//! candidate granularity and result cap, Pan filters the candidate set,
//! Tilt picks the ranking style. Unknown zoom/tilt names fall back to the
//! defaults with a warning instead of failing the query.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

// ============================================================================
// ZOOM
// ============================================================================

/// Candidate granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Zoom {
    Micro,
    #[default]
    Entity,
    Unit,
    Text,
    Community,
    Corpus,
}

impl Zoom {
    /// Parse a zoom name; unknown values fall back to `entity` with a warning
    pub fn parse_lenient(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "micro" => Zoom::Micro,
            "entity" => Zoom::Entity,
            "unit" => Zoom::Unit,
            "text" => Zoom::Text,
            "community" => Zoom::Community,
            "corpus" => Zoom::Corpus,
            other => {
                warn!(zoom = other, "unknown zoom level, falling back to entity");
                Zoom::Entity
            }
        }
    }

    /// Result cap applied after filtering
    pub fn result_cap(&self) -> usize {
        match self {
            Zoom::Entity => 3,
            Zoom::Unit => 5,
            Zoom::Text => 6,
            Zoom::Community => 8,
            Zoom::Corpus | Zoom::Micro => 10,
        }
    }

    /// First-pass similarity threshold for adaptive search.
    /// Micro shares the entity threshold: finest granularity, strictest cut.
    pub fn base_threshold(&self) -> f64 {
        match self {
            Zoom::Entity | Zoom::Micro => 0.45,
            Zoom::Unit => 0.35,
            Zoom::Text => 0.30,
            Zoom::Community => 0.25,
            Zoom::Corpus => 0.20,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Zoom::Micro => "micro",
            Zoom::Entity => "entity",
            Zoom::Unit => "unit",
            Zoom::Text => "text",
            Zoom::Community => "community",
            Zoom::Corpus => "corpus",
        }
    }
}

// ============================================================================
// TILT
// ============================================================================

/// Ranking style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tilt {
    #[default]
    Keywords,
    Embedding,
    Graph,
    Temporal,
}

impl Tilt {
    /// Parse a tilt name; unknown values fall back to `keywords` with a warning
    pub fn parse_lenient(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "keywords" => Tilt::Keywords,
            "embedding" => Tilt::Embedding,
            "graph" => Tilt::Graph,
            "temporal" => Tilt::Temporal,
            other => {
                warn!(tilt = other, "unknown tilt, falling back to keywords");
                Tilt::Keywords
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tilt::Keywords => "keywords",
            Tilt::Embedding => "embedding",
            Tilt::Graph => "graph",
            Tilt::Temporal => "temporal",
        }
    }
}

// ============================================================================
// PAN
// ============================================================================

/// Closed time window; bounds are normalized so `start <= end`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TemporalWindow {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

impl TemporalWindow {
    /// Whether a timestamp falls inside the window
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start.map(|s| at >= s).unwrap_or(true) && self.end.map(|e| at <= e).unwrap_or(true)
    }
}

/// Scope filters; any subset may be empty
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanFilter {
    #[serde(default, deserialize_with = "string_or_seq")]
    pub domains: Vec<String>,
    #[serde(default, deserialize_with = "string_or_seq")]
    pub keywords: Vec<String>,
    #[serde(default, deserialize_with = "string_or_seq")]
    pub entities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporal: Option<TemporalWindow>,
}

impl PanFilter {
    /// True when no filter dimension is set
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
            && self.keywords.is_empty()
            && self.entities.is_empty()
            && self.temporal.is_none()
    }

    /// Drop an inverted temporal window (`start > end`)
    fn normalize(&mut self) {
        if let Some(window) = &self.temporal {
            if let (Some(start), Some(end)) = (window.start, window.end) {
                if start > end {
                    warn!("inverted temporal window dropped");
                    self.temporal = None;
                }
            }
        }
    }
}

/// Accept a scalar string where a list is expected
fn string_or_seq<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

// ============================================================================
// NAVIGATION STATE
// ============================================================================

/// The full Zoom/Pan/Tilt tuple
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationState {
    #[serde(default)]
    pub zoom: Zoom,
    #[serde(default)]
    pub pan: PanFilter,
    #[serde(default)]
    pub tilt: Tilt,
}

impl NavigationState {
    /// `{entity, {}, keywords}`
    pub fn defaults() -> Self {
        Self::default()
    }

    /// Build a state from loose string inputs, coercing unknown enum values
    /// to defaults and normalizing the pan filter.
    pub fn from_parts(zoom: &str, mut pan: PanFilter, tilt: &str) -> Self {
        pan.normalize();
        Self {
            zoom: Zoom::parse_lenient(zoom),
            pan,
            tilt: Tilt::parse_lenient(tilt),
        }
    }

    /// Normalize a deserialized state in place
    pub fn normalized(mut self) -> Self {
        self.pan.normalize();
        self
    }
}

// ============================================================================
// TESTS
// ============================================================================
