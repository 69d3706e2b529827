//! PDF text extraction.
//!
//! Pages are concatenated in document order. Extraction is CPU-bound and
//! synchronous; async callers should run it on the blocking pool.

use thiserror::Error;

/// Extraction never panics on bad input; it returns one of these.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("File is not a PDF")]
    NotPdf,

    #[error("PDF extraction failed: {0}")]
    Pdf(String),
}

/// Extract plain text from PDF bytes.
pub fn extract_text(bytes: &[u8]) -> Result<String, ExtractError> {
    // pdf-extract can panic on some malformed inputs instead of erroring.
    std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes))
        .map_err(|_| ExtractError::Pdf("parser panicked on malformed input".to_string()))?
        .map_err(|e| ExtractError::Pdf(e.to_string()))
}

/// Header sniff, checked before handing bytes to the parser.
pub fn looks_like_pdf(bytes: &[u8]) -> bool {
    bytes.starts_with(b"%PDF-")
}
