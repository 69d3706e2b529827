//! Core data types shared by the processing pipeline and the HTTP layer.

use serde::{Deserialize, Serialize};

/// One uploaded PDF and its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    pub filename: String,
}

/// A chunk of extracted PDF text, the unit that gets embedded and retrieved.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub session_id: String,
    pub chunk_index: i64,
    pub text: String,
}

/// The caller identity resolved from a bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthUser {
    pub id: String,
    pub email: Option<String>,
}

/// Result of processing an uploaded PDF.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessOutcome {
    pub status: String,
    pub chunks: usize,
    pub message: String,
}

/// An answer plus the excerpts it was grounded on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatAnswer {
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub question: String,
    pub session_id: String,
}
