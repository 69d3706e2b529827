//! Retrieval-augmented question answering over one session's PDF.

use std::sync::Arc;

use thiserror::Error;

use crate::config::Config;
use crate::embedding::Embedder;
use crate::index::IndexError;
use crate::llm::ChatModel;
use crate::models::ChatAnswer;
use crate::pdf::PdfProcessor;
use crate::provider::ProviderError;

/// Returned verbatim when the session has no index yet.
pub const NO_INDEX_ANSWER: &str = "Please upload a PDF first before asking questions.";

pub const PROMPT_TEMPLATE: &str = "Use the following pieces of context to answer the question at the end. If you don't know the answer, just say that you don't know, don't try to make up an answer.

Context: {context}

Question: {question}

Answer:";

#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

pub struct ChatEngine {
    config: Arc<Config>,
    processor: Arc<PdfProcessor>,
    embedder: Arc<dyn Embedder>,
    chat_model: Arc<dyn ChatModel>,
}

impl ChatEngine {
    /// Indexes are opened through `processor`, which owns the index root.
    pub fn new(
        config: Arc<Config>,
        processor: Arc<PdfProcessor>,
        embedder: Arc<dyn Embedder>,
        chat_model: Arc<dyn ChatModel>,
    ) -> Self {
        Self {
            config,
            processor,
            embedder,
            chat_model,
        }
    }

    /// Answer `question` from the session's indexed PDF. Callers must have
    /// checked ownership already.
    pub async fn get_answer(
        &self,
        session_id: &str,
        question: &str,
    ) -> Result<ChatAnswer, ChatError> {
        let Some(index) = self.processor.open_index(session_id).await? else {
            tracing::debug!(session_id, "no index for session");
            return Ok(ChatAnswer {
                answer: NO_INDEX_ANSWER.to_string(),
                sources: Vec::new(),
            });
        };

        let query = self.embedder.embed_query(question).await?;
        if query.len() != index.dims() {
            return Err(IndexError::Mismatch(format!(
                "query embedding has {} dims but index built with {} has {}",
                query.len(),
                index.model(),
                index.dims()
            ))
            .into());
        }
        let hits = index.search(&query, self.config.retrieval.top_k);

        let context = hits
            .iter()
            .map(|h| h.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = render_prompt(&context, question);

        let answer = self.chat_model.generate(&prompt).await?;
        tracing::info!(
            session_id,
            retrieved = hits.len(),
            model = self.chat_model.model_name(),
            "answered question"
        );

        let limit = self.config.retrieval.source_excerpt_chars;
        let sources = hits.iter().map(|h| excerpt(&h.text, limit)).collect();

        Ok(ChatAnswer { answer, sources })
    }
}

pub fn render_prompt(context: &str, question: &str) -> String {
    PROMPT_TEMPLATE
        .replace("{context}", context)
        .replace("{question}", question)
}

/// First `limit` characters followed by `"..."`, always.
fn excerpt(text: &str, limit: usize) -> String {
    let mut out: String = text.chars().take(limit).collect();
    out.push_str("...");
    out
}
