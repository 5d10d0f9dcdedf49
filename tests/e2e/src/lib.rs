//! Shared fixtures for the end-to-end tests

use async_trait::async_trait;
use chrono::Utc;

use cartomem_core::enhance::{
    EmbeddingService, KnowledgeSource, SourceItem, SourceKind, SourceResult,
};
use cartomem_core::{GaussianSampler, Record, Result};

/// A sample drawn from a Gaussian centered on one basis axis
pub fn basis_sample(dim: usize, axis: usize, sigma: f64, sampler: &mut GaussianSampler) -> Vec<f64> {
    let mut v = vec![0.0; dim];
    v[axis % dim] = 1.0;
    for x in v.iter_mut() {
        *x += sampler.next_gaussian() * sigma;
    }
    v
}

/// A vector whose cosine similarity to the first basis axis is `target`
pub fn vector_with_similarity(dim: usize, target: f64) -> Vec<f64> {
    let angle = target.clamp(-1.0, 1.0).acos();
    let mut v = vec![0.0; dim];
    v[0] = angle.cos();
    v[1] = angle.sin();
    v
}

/// A canonical record fixture
pub fn record(id: &str, label: &str, content: &str, embedding: Option<Vec<f64>>) -> Record {
    let now = Utc::now();
    Record {
        id: id.to_string(),
        label: label.to_string(),
        content: content.to_string(),
        embedding,
        created_at: now,
        last_accessed: now,
        access_count: 0,
        domains: vec![],
        importance: 0.5,
        metadata: serde_json::Value::Null,
    }
}

/// A knowledge source answering instantly with fixed content
pub struct StaticSource {
    pub name: String,
    pub kind: SourceKind,
    pub item_count: usize,
    pub item_len: usize,
}

#[async_trait]
impl KnowledgeSource for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn fetch(&self, query: &str) -> Result<SourceResult> {
        let items = (0..self.item_count)
            .map(|i| SourceItem {
                title: format!("{} item {}", self.name, i),
                url: Some(format!("https://{}.example/{}", self.name, i)),
                description: "y".repeat(self.item_len),
                score: Some(0.8),
            })
            .collect();
        Ok(SourceResult {
            items,
            summary: format!("{} reference material on {}", self.name, query),
        })
    }
}

/// A knowledge source that never answers inside any sane timeout
pub struct HangingSource {
    pub name: String,
}

#[async_trait]
impl KnowledgeSource for HangingSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::FreeText
    }

    async fn fetch(&self, _query: &str) -> Result<SourceResult> {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        unreachable!("the per-source timeout must fire first")
    }
}

/// Deterministic embedding service: hashes the text onto a unit vector
pub struct HashEmbedder {
    pub dim: usize,
}

#[async_trait]
impl EmbeddingService for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f64>> {
        let mut v = vec![0.0; self.dim];
        for (i, b) in text.bytes().enumerate() {
            v[(i + b as usize) % self.dim] += (b % 31) as f64 / 31.0;
        }
        Ok(cartomem_core::normalized(&v))
    }
}
