//! Record model - the unit of stored memory
//!
//! Records are immutable once stored except for their access statistics,
//! which only move forward. Legacy field names (`prompt`, `response`,
//! `output`) are accepted at the ingestion edge only and normalized to the
//! canonical `label` + `content` schema before anything else sees them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

// ============================================================================
// DOMAIN TAGS
// ============================================================================

/// Structured prefix of a domain tag, used for priority and decay selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainType {
    User,
    Project,
    Session,
    Instruction,
    /// Unknown prefix; the tag is carried opaquely
    Other,
}

impl DomainType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainType::User => "user",
            DomainType::Project => "project",
            DomainType::Session => "session",
            DomainType::Instruction => "instruction",
            DomainType::Other => "other",
        }
    }
}

/// A parsed `"<type>:<identifier>"` domain tag
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DomainTag {
    pub domain_type: DomainType,
    pub identifier: String,
}

impl DomainTag {
    /// Parse a tag string. Tags without a recognized prefix keep the whole
    /// string as identifier under [`DomainType::Other`].
    pub fn parse(tag: &str) -> Self {
        match tag.split_once(':') {
            Some((prefix, identifier)) => {
                let domain_type = match prefix {
                    "user" => DomainType::User,
                    "project" => DomainType::Project,
                    "session" => DomainType::Session,
                    "instruction" => DomainType::Instruction,
                    _ => DomainType::Other,
                };
                Self {
                    domain_type,
                    identifier: identifier.to_string(),
                }
            }
            None => Self {
                domain_type: DomainType::Other,
                identifier: tag.to_string(),
            },
        }
    }
}

/// Dominant domain type of a tag list: the highest-priority recognized
/// prefix present (instruction > user > project > session).
pub fn dominant_domain_type(domains: &[String]) -> Option<DomainType> {
    let mut best: Option<DomainType> = None;
    for tag in domains {
        let t = DomainTag::parse(tag).domain_type;
        let rank = |t: DomainType| match t {
            DomainType::Instruction => 4,
            DomainType::User => 3,
            DomainType::Project => 2,
            DomainType::Session => 1,
            DomainType::Other => 0,
        };
        if best.map(|b| rank(t) > rank(b)).unwrap_or(true) && t != DomainType::Other {
            best = Some(t);
        }
    }
    best
}

// ============================================================================
// RECORD
// ============================================================================

/// A stored interaction or chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Unique identifier; identity of the record
    pub id: String,
    /// Short display label
    pub label: String,
    /// Full content
    pub content: String,
    /// Fixed-dimension embedding; absent when the embedding service was
    /// unavailable at ingest time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f64>>,
    /// Creation time (server-filled when absent at ingestion)
    pub created_at: DateTime<Utc>,
    /// Last retrieval time; monotonically advanced
    pub last_accessed: DateTime<Utc>,
    /// Retrieval count; monotonically increased
    pub access_count: u64,
    /// Domain tags (`"<type>:<identifier>"`)
    pub domains: Vec<String>,
    /// Caller-assigned importance in [0, 1]
    pub importance: f64,
    /// Free-form metadata
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Record {
    /// Record the access statistics for a retrieval. Timestamps never move
    /// backwards; the count only grows.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.access_count += 1;
        if now > self.last_accessed {
            self.last_accessed = now;
        }
    }

    /// Parsed domain tags
    pub fn domain_tags(&self) -> Vec<DomainTag> {
        self.domains.iter().map(|d| DomainTag::parse(d)).collect()
    }
}

// ============================================================================
// INGESTION DRAFT
// ============================================================================

/// Ingestion-side record shape. Accepts the legacy `prompt` / `response` /
/// `output` aliases; [`RecordDraft::into_record`] normalizes them away.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordDraft {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub embedding: Option<Vec<f64>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_accessed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub access_count: Option<u64>,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub importance: Option<f64>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,

    // Legacy aliases, ingestion only
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
}

impl RecordDraft {
    /// Normalize the draft into a canonical [`Record`], filling timestamps
    /// from `now` where the caller left them out.
    pub fn into_record(self, now: DateTime<Utc>) -> Result<Record> {
        if self.id.is_empty() {
            return Err(CoreError::BadInput("record id is required".into()));
        }

        let label = self
            .label
            .or(self.prompt)
            .unwrap_or_default();
        let content = self
            .content
            .or(self.response)
            .or(self.output)
            .unwrap_or_default();

        Ok(Record {
            id: self.id,
            label,
            content,
            embedding: self.embedding,
            created_at: self.created_at.unwrap_or(now),
            last_accessed: self.last_accessed.unwrap_or(now),
            access_count: self.access_count.unwrap_or(0),
            domains: self.domains,
            importance: self.importance.unwrap_or(0.5).clamp(0.0, 1.0),
            metadata: self.metadata.unwrap_or(serde_json::Value::Null),
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_tag_parse() {
        let tag = DomainTag::parse("project:cartomem");
        assert_eq!(tag.domain_type, DomainType::Project);
        assert_eq!(tag.identifier, "cartomem");

        let opaque = DomainTag::parse("weird-tag");
        assert_eq!(opaque.domain_type, DomainType::Other);
        assert_eq!(opaque.identifier, "weird-tag");

        let unknown_prefix = DomainTag::parse("team:alpha");
        assert_eq!(unknown_prefix.domain_type, DomainType::Other);
    }

    #[test]
    fn test_dominant_domain_type_priority() {
        let domains = vec![
            "session:s1".to_string(),
            "instruction:always".to_string(),
            "project:p".to_string(),
        ];
        assert_eq!(dominant_domain_type(&domains), Some(DomainType::Instruction));

        let none: Vec<String> = vec!["misc".into()];
        assert_eq!(dominant_domain_type(&none), None);
    }

    #[test]
    fn test_touch_is_monotonic() {
        let now = Utc::now();
        let mut record = RecordDraft {
            id: "r1".into(),
            ..RecordDraft::default()
        }
        .into_record(now)
        .unwrap();

        record.touch(now + chrono::Duration::seconds(10));
        assert_eq!(record.access_count, 1);
        let advanced = record.last_accessed;

        // A stale clock cannot rewind last_accessed
        record.touch(now - chrono::Duration::seconds(10));
        assert_eq!(record.access_count, 2);
        assert_eq!(record.last_accessed, advanced);
    }

    #[test]
    fn test_draft_normalizes_legacy_aliases() {
        let now = Utc::now();
        let draft = RecordDraft {
            id: "legacy".into(),
            prompt: Some("what is a map".into()),
            output: Some("a topology of memory".into()),
            ..RecordDraft::default()
        };
        let record = draft.into_record(now).unwrap();
        assert_eq!(record.label, "what is a map");
        assert_eq!(record.content, "a topology of memory");
        assert_eq!(record.created_at, now);

        // Canonical fields win over aliases
        let draft = RecordDraft {
            id: "canonical".into(),
            label: Some("label".into()),
            prompt: Some("ignored".into()),
            content: Some("content".into()),
            response: Some("ignored".into()),
            ..RecordDraft::default()
        };
        let record = draft.into_record(now).unwrap();
        assert_eq!(record.label, "label");
        assert_eq!(record.content, "content");
    }

    #[test]
    fn test_draft_requires_id() {
        let draft = RecordDraft::default();
        assert!(matches!(
            draft.into_record(Utc::now()),
            Err(CoreError::BadInput(_))
        ));
    }

    #[test]
    fn test_importance_clamped() {
        let now = Utc::now();
        let record = RecordDraft {
            id: "r".into(),
            importance: Some(7.5),
            ..RecordDraft::default()
        }
        .into_record(now)
        .unwrap();
        assert_eq!(record.importance, 1.0);
    }
}
