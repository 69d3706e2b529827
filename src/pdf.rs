//! Upload pipeline: extract → chunk → embed → persist.
//!
//! [`PdfProcessor::process_pdf`] turns a PDF on disk into a session's
//! vector index. Embedding happens in batches of `embedding.batch_size`
//! so a long document never goes out as one oversized request.
//!
//! Failures leave whatever was already written (the uploaded file, a
//! partially created session directory) in place.

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::chunk::chunk_text;
use crate::config::Config;
use crate::embedding::Embedder;
use crate::extract::{extract_text, looks_like_pdf, ExtractError};
use crate::index::{IndexError, IndexStore, VectorIndex};
use crate::models::ProcessOutcome;
use crate::provider::ProviderError;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("PDF appears to be empty or unable to extract text")]
    EmptyText,

    #[error("No text chunks created from PDF")]
    NoChunks,

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("extraction task failed: {0}")]
    Join(String),
}

pub struct PdfProcessor {
    config: Arc<Config>,
    embedder: Arc<dyn Embedder>,
    store: IndexStore,
}

impl PdfProcessor {
    pub fn new(config: Arc<Config>, embedder: Arc<dyn Embedder>) -> Self {
        let store = IndexStore::new(config.index.root.clone());
        Self {
            config,
            embedder,
            store,
        }
    }

    /// Build and persist the vector index for `session_id` from the PDF at `path`.
    pub async fn process_pdf(
        &self,
        session_id: &str,
        path: &Path,
    ) -> Result<ProcessOutcome, ProcessError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| ProcessError::Io {
            path: path.display().to_string(),
            source,
        })?;
        if !looks_like_pdf(&bytes) {
            return Err(ExtractError::NotPdf.into());
        }

        let text = tokio::task::spawn_blocking(move || extract_text(&bytes))
            .await
            .map_err(|e| ProcessError::Join(e.to_string()))??;

        if text.trim().is_empty() {
            return Err(ProcessError::EmptyText);
        }

        let chunking = &self.config.chunking;
        let chunks = chunk_text(session_id, &text, chunking.chunk_size, chunking.chunk_overlap);
        if chunks.is_empty() {
            return Err(ProcessError::NoChunks);
        }

        let batch_size = self.config.embedding.batch_size.max(1);
        let mut vectors = Vec::with_capacity(chunks.len());
        for (i, batch) in chunks.chunks(batch_size).enumerate() {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            tracing::debug!(session_id, batch = i, size = texts.len(), "embedding batch");
            vectors.extend(self.embedder.embed_documents(&texts).await?);
        }

        let index = VectorIndex::build(session_id, self.embedder.model_name(), &chunks, vectors)?;
        let index_path = self.store.save(&index).await?;

        tracing::info!(
            session_id,
            chunks = index.len(),
            chars = text.chars().count(),
            path = %index_path.display(),
            "PDF indexed"
        );

        Ok(ProcessOutcome {
            status: "success".to_string(),
            chunks: chunks.len(),
            message: "PDF processed successfully".to_string(),
        })
    }

    /// The session's index, or `None` if no PDF was processed for it.
    pub async fn open_index(&self, session_id: &str) -> Result<Option<VectorIndex>, IndexError> {
        self.store.load(session_id).await
    }
}
