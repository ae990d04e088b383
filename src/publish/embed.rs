//! Embedding model: vectors for chunk texts.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::ModelError;

/// Characters of a single input the embedding endpoint will accept before
/// quality degrades or the request is rejected.
const MAX_INPUT_CHARS: usize = 8000;

/// Capability interface for text embedding.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError>;
}

/// Embeddings via an OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAiEmbeddings {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    request_timeout_secs: u64,
}

impl OpenAiEmbeddings {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: "https://api.openai.com/v1".to_string(),
            api_key: api_key.into(),
            model: "text-embedding-3-small".to_string(),
            request_timeout_secs: 60,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[async_trait]
impl EmbeddingModel for OpenAiEmbeddings {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError> {
        // Newlines hurt embedding quality on these models; oversized inputs
        // are rejected outright.
        let cleaned: Vec<String> = texts
            .iter()
            .map(|t| {
                t.replace('\n', " ")
                    .trim()
                    .chars()
                    .take(MAX_INPUT_CHARS)
                    .collect()
            })
            .collect();

        let response = self
            .client
            .post(format!("{}/embeddings", self.endpoint))
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(self.request_timeout_secs))
            .json(&json!({ "model": self.model, "input": cleaned }))
            .send()
            .await
            .map_err(|e| ModelError::Request(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ModelError::RateLimited);
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ModelError::Status {
                status: status.as_u16(),
                detail: detail.chars().take(300).collect(),
            });
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| ModelError::Malformed(e.to_string()))?;
        let data = value["data"]
            .as_array()
            .ok_or_else(|| ModelError::Malformed("no data array in response".into()))?;

        let mut embeddings = Vec::with_capacity(data.len());
        for item in data {
            let vector: Vec<f32> = item["embedding"]
                .as_array()
                .ok_or_else(|| ModelError::Malformed("missing embedding vector".into()))?
                .iter()
                .filter_map(|v| v.as_f64().map(|f| f as f32))
                .collect();
            embeddings.push(vector);
        }

        if embeddings.len() != texts.len() {
            return Err(ModelError::Malformed(format!(
                "asked for {} embeddings, got {}",
                texts.len(),
                embeddings.len()
            )));
        }
        Ok(embeddings)
    }
}
