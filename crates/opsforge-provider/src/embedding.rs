//! Embedding providers for the memory engine's vector search.
//!
//! The engine treats embeddings as optional: with no provider configured it
//! degrades to keyword-only search. The shipped implementation speaks the
//! OpenAI-compatible `/v1/embeddings` endpoint; alternative backends plug in
//! through the same trait.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::provider::ProviderError;

/// Remote batches are capped to keep request bodies bounded.
pub const MAX_BATCH: usize = 256;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier stored alongside cached vectors.
    fn model(&self) -> &str;

    /// Output dimensionality.
    fn dimension(&self) -> usize;

    /// Embed a batch of texts. Returned vectors are L2-normalized and in
    /// input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;
}

/// OpenAI-compatible remote embedding provider (1536-dim default).
pub struct OpenAiEmbeddings {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dimension: usize,
}

impl OpenAiEmbeddings {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com".to_string()),
            model: "text-embedding-3-small".to_string(),
            dimension: 1536,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let mut out = Vec::with_capacity(texts.len());

        for batch in texts.chunks(MAX_BATCH) {
            debug!(batch = batch.len(), model = %self.model, "embedding batch");
            let resp = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&serde_json::json!({ "model": self.model, "input": batch }))
                .send()
                .await?;

            let status = resp.status().as_u16();
            if !resp.status().is_success() {
                let text = resp.text().await.unwrap_or_default();
                warn!(status, body = %text, "embeddings API error");
                return Err(ProviderError::Api {
                    status,
                    message: text,
                });
            }

            let api_resp: EmbeddingResponse = resp
                .json()
                .await
                .map_err(|e| ProviderError::Parse(e.to_string()))?;

            // The API returns rows with an index field; order defensively.
            let mut rows = api_resp.data;
            rows.sort_by_key(|r| r.index);
            for row in rows {
                out.push(l2_normalize(row.embedding));
            }
        }

        Ok(out)
    }
}

/// Scale a vector to unit length. Zero vectors are returned unchanged.
pub fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// Cosine distance between two vectors: `1 − dot / (|a||b|)`.
/// Returns 2.0 (max distance) when either vector is zero.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 2.0;
    }
    1.0 - dot / (na * nb)
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    index: usize,
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_produces_unit_vector() {
        let v = l2_normalize(vec![3.0, 4.0]);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
        assert!((v[0] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn normalize_zero_vector_is_noop() {
        assert_eq!(l2_normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn cosine_distance_bounds() {
        let a = [1.0, 0.0];
        let same = [2.0, 0.0];
        let opposite = [-1.0, 0.0];
        let orthogonal = [0.0, 1.0];
        assert!(cosine_distance(&a, &same).abs() < 1e-6);
        assert!((cosine_distance(&a, &opposite) - 2.0).abs() < 1e-6);
        assert!((cosine_distance(&a, &orthogonal) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_distance_zero_vector_is_max() {
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 2.0);
    }
}
