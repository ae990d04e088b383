//! Ingestion publishing: embed chunks and upsert them into the store.
//!
//! Publishing is deliberately tolerant at chunk granularity: a chunk whose
//! embedding cannot be produced after the retry schedule is recorded in the
//! [`PublishReport`] and stored without a vector, and ingestion moves on.
//! Partial success is reported, never silently dropped. Only two things
//! fail the whole operation: a missing capability handle, and the store
//! rejecting the document record itself (without it there is nothing to
//! attach chunks to).

pub mod chunk;
pub mod embed;
pub mod store;

pub use chunk::chunk_text;
pub use embed::{EmbeddingModel, OpenAiEmbeddings};
pub use store::{ChunkRecord, RestVectorStore, VectorStore};

use std::time::Duration;

use serde::Serialize;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::{ModelError, ProcessingError};
use crate::model::RenderedDocument;

/// A chunk that could not be embedded.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkFailure {
    pub chunk_index: usize,
    pub detail: String,
}

/// Outcome of a publish run.
#[derive(Debug, Clone, Serialize)]
pub struct PublishReport {
    /// Store-assigned document identifier.
    pub document_id: String,
    pub total_chunks: usize,
    /// Chunks stored with an embedding.
    pub published_chunks: usize,
    pub failed: Vec<ChunkFailure>,
}

/// Embed the document's chunks and upsert everything into the vector store.
pub async fn publish(
    document: &RenderedDocument,
    config: &PipelineConfig,
) -> Result<PublishReport, ProcessingError> {
    let embedder = config.embedder.as_ref().ok_or_else(|| {
        ProcessingError::InvalidConfig("publish requires an embedding model".into())
    })?;
    let store = config
        .store
        .as_ref()
        .ok_or_else(|| ProcessingError::InvalidConfig("publish requires a vector store".into()))?;

    let document_id = store
        .upsert_document(document)
        .await
        .map_err(|e| ProcessingError::StoreRejected(e.to_string()))?;

    let mut failed: Vec<ChunkFailure> = Vec::new();
    let mut records: Vec<ChunkRecord> = Vec::with_capacity(document.chunks.len());

    for batch in document.chunks.chunks(config.embed_batch_size) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        match embed_with_retry(embedder.as_ref(), &texts, config).await {
            Ok(vectors) => {
                for (chunk, vector) in batch.iter().zip(vectors) {
                    records.push(ChunkRecord {
                        chunk_index: chunk.index,
                        content: chunk.text.clone(),
                        heading: chunk.heading.clone(),
                        embedding: Some(vector),
                    });
                }
            }
            Err(e) => {
                warn!(error = %e, chunks = batch.len(), "embedding batch failed");
                for chunk in batch {
                    failed.push(ChunkFailure {
                        chunk_index: chunk.index,
                        detail: e.to_string(),
                    });
                    records.push(ChunkRecord {
                        chunk_index: chunk.index,
                        content: chunk.text.clone(),
                        heading: chunk.heading.clone(),
                        embedding: None,
                    });
                }
            }
        }
    }

    let embedded = records.iter().filter(|r| r.embedding.is_some()).count();

    if let Err(e) = store.insert_chunks(&document_id, &records).await {
        warn!(error = %e, "chunk insert failed");
        for record in &records {
            failed.push(ChunkFailure {
                chunk_index: record.chunk_index,
                detail: format!("store insert failed: {e}"),
            });
        }
        return Ok(PublishReport {
            document_id,
            total_chunks: document.chunks.len(),
            published_chunks: 0,
            failed,
        });
    }

    info!(
        document_id,
        total = document.chunks.len(),
        embedded,
        failed = failed.len(),
        "publish complete"
    );

    Ok(PublishReport {
        document_id,
        total_chunks: document.chunks.len(),
        published_chunks: embedded,
        failed,
    })
}

/// Run one embedding batch through the retry schedule.
async fn embed_with_retry(
    embedder: &dyn EmbeddingModel,
    texts: &[String],
    config: &PipelineConfig,
) -> Result<Vec<Vec<f32>>, ModelError> {
    let mut last_err = None;
    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let backoff = config.retry_backoff_ms * 2u64.pow(attempt - 1);
            warn!(attempt, backoff_ms = backoff, "embedding retry");
            sleep(Duration::from_millis(backoff)).await;
        }
        match embedder.embed(texts).await {
            Ok(vectors) => return Ok(vectors),
            Err(e) if e.is_retryable() => last_err = Some(e),
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or_else(|| ModelError::Request("no attempts made".into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Chunk, DocumentMetadata, ProcessingStats};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct StubEmbedder {
        fail_batches_containing: Option<usize>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingModel for StubEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(marker) = self.fail_batches_containing {
                if texts.iter().any(|t| t.contains(&format!("chunk-{marker}"))) {
                    return Err(ModelError::Status {
                        status: 400,
                        detail: "poison chunk".into(),
                    });
                }
            }
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    #[derive(Default)]
    struct StubStore {
        inserted: Mutex<Vec<ChunkRecord>>,
    }

    #[async_trait]
    impl VectorStore for StubStore {
        async fn upsert_document(&self, _: &RenderedDocument) -> Result<String, StoreError> {
            Ok("doc-1".to_string())
        }

        async fn insert_chunks(
            &self,
            _: &str,
            chunks: &[ChunkRecord],
        ) -> Result<(), StoreError> {
            self.inserted.lock().unwrap().extend_from_slice(chunks);
            Ok(())
        }
    }

    use crate::error::StoreError;

    fn doc(n_chunks: usize) -> RenderedDocument {
        let chunks = (0..n_chunks)
            .map(|i| Chunk {
                index: i,
                text: format!("chunk-{i} text"),
                start: i * 10,
                end: (i + 1) * 10,
                heading: None,
            })
            .collect();
        RenderedDocument {
            markdown: String::new(),
            chunks,
            metadata: DocumentMetadata::default(),
            checksum: "hash".into(),
            table_of_contents: Vec::new(),
            warnings: Vec::new(),
            stats: ProcessingStats::default(),
        }
    }

    fn config_with(
        embedder: Arc<dyn EmbeddingModel>,
        store: Arc<dyn VectorStore>,
    ) -> PipelineConfig {
        PipelineConfig::builder()
            .embedder(embedder)
            .store(store)
            .embed_batch_size(2)
            .max_retries(0)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn all_chunks_published_on_success() {
        let store = Arc::new(StubStore::default());
        let config = config_with(
            Arc::new(StubEmbedder {
                fail_batches_containing: None,
                calls: AtomicUsize::new(0),
            }),
            store.clone(),
        );
        let report = publish(&doc(5), &config).await.unwrap();
        assert_eq!(report.document_id, "doc-1");
        assert_eq!(report.total_chunks, 5);
        assert_eq!(report.published_chunks, 5);
        assert!(report.failed.is_empty());
        assert_eq!(store.inserted.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn failed_batch_is_reported_and_others_continue() {
        let store = Arc::new(StubStore::default());
        let config = config_with(
            Arc::new(StubEmbedder {
                fail_batches_containing: Some(2),
                calls: AtomicUsize::new(0),
            }),
            store.clone(),
        );
        let report = publish(&doc(6), &config).await.unwrap();
        // Batch [2,3] fails; batches [0,1] and [4,5] succeed.
        assert_eq!(report.published_chunks, 4);
        assert_eq!(report.failed.len(), 2);
        let failed_indices: Vec<usize> = report.failed.iter().map(|f| f.chunk_index).collect();
        assert_eq!(failed_indices, vec![2, 3]);
        // Failed chunks are still stored, without embeddings.
        let inserted = store.inserted.lock().unwrap();
        assert_eq!(inserted.len(), 6);
        assert!(inserted
            .iter()
            .filter(|r| r.chunk_index == 2 || r.chunk_index == 3)
            .all(|r| r.embedding.is_none()));
    }

    #[tokio::test]
    async fn missing_embedder_is_a_config_error() {
        let config = PipelineConfig::builder()
            .store(Arc::new(StubStore::default()) as Arc<dyn VectorStore>)
            .build()
            .unwrap();
        let err = publish(&doc(1), &config).await.unwrap_err();
        assert!(matches!(err, ProcessingError::InvalidConfig(_)));
    }
}
