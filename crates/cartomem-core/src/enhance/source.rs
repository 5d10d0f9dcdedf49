//! External knowledge-source contracts
//!
//! Every external service is optional and pluggable; the broker sees one
//! uniform trait and one uniform failure envelope regardless of source.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

// ============================================================================
// SOURCE KINDS
// ============================================================================

/// Reliability class of a source; drives cache TTL scaling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Curated reference content (encyclopedias, structured knowledge bases)
    Encyclopedic,
    /// Open web / free-text search
    FreeText,
    /// Model-generated content
    Generated,
}

impl SourceKind {
    /// TTL multiplier applied to the base cache lifetime
    pub fn reliability_factor(&self) -> f64 {
        match self {
            SourceKind::Encyclopedic => 1.5,
            SourceKind::FreeText => 1.2,
            SourceKind::Generated => 0.8,
        }
    }
}

// ============================================================================
// RESULT SHAPES
// ============================================================================

/// One item returned by a source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceItem {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// A source's complete answer for one query
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceResult {
    pub items: Vec<SourceItem>,
    pub summary: String,
}

impl SourceResult {
    /// Total content length across summary and items
    pub fn content_len(&self) -> usize {
        self.summary.len()
            + self
                .items
                .iter()
                .map(|i| i.title.len() + i.description.len())
                .sum::<usize>()
    }
}

// ============================================================================
// CONTRACTS
// ============================================================================

/// The uniform external-source contract consumed by the broker
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    /// Stable source name used for caching, rate limiting, and attribution
    fn name(&self) -> &str;
    /// Reliability class
    fn kind(&self) -> SourceKind;
    /// Fetch results for a query
    async fn fetch(&self, query: &str) -> Result<SourceResult>;
}

/// Text-search service contract (`search(terms)`)
#[async_trait]
pub trait TextSearchService: Send + Sync {
    async fn search(&self, terms: &str) -> Result<Vec<SourceItem>>;
}

/// Structured-knowledge service contract
#[async_trait]
pub trait StructuredKnowledgeService: Send + Sync {
    async fn search_entities(&self, query: &str) -> Result<Vec<KnowledgeEntity>>;
    async fn entity_details(&self, ids: &[String]) -> Result<EntityDetails>;
}

/// Embedding service contract (`embed(text)`)
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f64>>;
}

/// An entity row from a structured-knowledge service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeEntity {
    pub id: String,
    pub label: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Expanded entity details with relationships
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDetails {
    pub entities: Vec<KnowledgeEntity>,
    pub relationships: Vec<(String, String, String)>,
}

// ============================================================================
// ADAPTERS
// ============================================================================

/// Adapts a [`TextSearchService`] to the uniform source contract
pub struct TextSearchSource<S> {
    name: String,
    kind: SourceKind,
    service: S,
}

impl<S: TextSearchService> TextSearchSource<S> {
    pub fn new(name: impl Into<String>, kind: SourceKind, service: S) -> Self {
        Self {
            name: name.into(),
            kind,
            service,
        }
    }
}

#[async_trait]
impl<S: TextSearchService> KnowledgeSource for TextSearchSource<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn fetch(&self, query: &str) -> Result<SourceResult> {
        let items = self.service.search(query).await?;
        let summary = items
            .iter()
            .take(3)
            .map(|i| i.description.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        Ok(SourceResult { items, summary })
    }
}

/// Adapts a [`StructuredKnowledgeService`] to the uniform source contract
pub struct StructuredKnowledgeSource<S> {
    name: String,
    service: S,
}

impl<S: StructuredKnowledgeService> StructuredKnowledgeSource<S> {
    pub fn new(name: impl Into<String>, service: S) -> Self {
        Self {
            name: name.into(),
            service,
        }
    }
}

#[async_trait]
impl<S: StructuredKnowledgeService> KnowledgeSource for StructuredKnowledgeSource<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Encyclopedic
    }

    async fn fetch(&self, query: &str) -> Result<SourceResult> {
        let entities = self.service.search_entities(query).await?;
        let ids: Vec<String> = entities.iter().map(|e| e.id.clone()).collect();
        let details = self.service.entity_details(&ids).await?;

        let items = details
            .entities
            .iter()
            .map(|e| SourceItem {
                title: e.label.clone(),
                url: e.url.clone(),
                description: e.description.clone(),
                score: None,
            })
            .collect::<Vec<_>>();
        let summary = details
            .entities
            .iter()
            .take(3)
            .map(|e| format!("{}: {}", e.label, e.description))
            .collect::<Vec<_>>()
            .join(" ");
        Ok(SourceResult { items, summary })
    }
}

// ============================================================================
// TESTS
// ============================================================================
