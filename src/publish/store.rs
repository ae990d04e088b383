//! Vector store: upsert documents and chunks into an external search store.
//!
//! The store owns its own connection and auth lifecycle; the pipeline only
//! needs the two calls below. The REST implementation targets a
//! PostgREST-style API (as Supabase exposes): documents are deduplicated by
//! content hash, chunks are batch-inserted.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::model::RenderedDocument;

/// One chunk row ready for the store.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub chunk_index: usize,
    pub content: String,
    pub heading: Option<String>,
    /// Absent when embedding failed for this chunk; the text row is still
    /// stored so the failure is visible rather than silently dropped.
    pub embedding: Option<Vec<f32>>,
}

/// Capability interface for the vector-search store.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert the document record, or return the existing id when a
    /// document with the same content hash is already stored.
    async fn upsert_document(&self, document: &RenderedDocument) -> Result<String, StoreError>;

    /// Insert chunk rows for the document.
    async fn insert_chunks(
        &self,
        document_id: &str,
        chunks: &[ChunkRecord],
    ) -> Result<(), StoreError>;
}

/// Rows per insert request.
const INSERT_BATCH: usize = 100;

/// PostgREST-style HTTP implementation.
pub struct RestVectorStore {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl RestVectorStore {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let detail = response.text().await.unwrap_or_default();
        Err(StoreError::Status {
            status: status.as_u16(),
            detail: detail.chars().take(300).collect(),
        })
    }
}

#[async_trait]
impl VectorStore for RestVectorStore {
    async fn upsert_document(&self, document: &RenderedDocument) -> Result<String, StoreError> {
        // Dedup: a document with the same content hash is the same document.
        let existing = self
            .client
            .get(self.table_url("documents"))
            .query(&[
                ("select", "id"),
                ("file_hash", &format!("eq.{}", document.checksum)),
            ])
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;
        let existing: Value = Self::check(existing)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Malformed(e.to_string()))?;
        if let Some(id) = existing[0]["id"].as_str() {
            info!(id, "document already stored, reusing");
            return Ok(id.to_string());
        }

        let body = json!({
            "title": document.metadata.title,
            "author": document.metadata.author,
            "source_file": document.metadata.source_name,
            "page_count": document.metadata.page_count,
            "file_hash": document.checksum,
            "metadata": {
                "subject": document.metadata.subject,
                "toc": document.table_of_contents.iter().take(50).collect::<Vec<_>>(),
                "has_images": document.metadata.has_images,
                "is_scanned": document.metadata.is_scanned,
            },
        });

        let response = self
            .client
            .post(self.table_url("documents"))
            .header("apikey", &self.api_key)
            .header("Prefer", "return=representation")
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;
        let created: Value = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Malformed(e.to_string()))?;

        created[0]["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| StoreError::Malformed("insert returned no id".into()))
    }

    async fn insert_chunks(
        &self,
        document_id: &str,
        chunks: &[ChunkRecord],
    ) -> Result<(), StoreError> {
        for batch in chunks.chunks(INSERT_BATCH) {
            let rows: Vec<Value> = batch
                .iter()
                .map(|record| {
                    let mut row = json!({
                        "document_id": document_id,
                        "content": record.content,
                        "chunk_index": record.chunk_index,
                        "heading": record.heading,
                    });
                    if let Some(embedding) = &record.embedding {
                        row["embedding"] = json!(embedding);
                    }
                    row
                })
                .collect();

            let response = self
                .client
                .post(self.table_url("document_chunks"))
                .header("apikey", &self.api_key)
                .bearer_auth(&self.api_key)
                .json(&rows)
                .send()
                .await
                .map_err(|e| StoreError::Request(e.to_string()))?;
            Self::check(response).await?;
            debug!(rows = batch.len(), "chunk batch stored");
        }
        Ok(())
    }
}
