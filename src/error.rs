//! Error types for the pagemill library.
//!
//! Two distinct failure modes get two distinct treatments:
//!
//! * [`ProcessingError`] — **Fatal**: the document cannot be processed at
//!   all (not a PDF, corrupt cross-reference table, over the configured
//!   limits, cancelled). Returned as `Err` from the top-level operations;
//!   no partial artifact is produced.
//!
//! * Everything page- or region-scoped is **recovered**, not propagated: a
//!   corrupt page becomes an empty page with an inline marker, a missing
//!   OCR engine becomes a placeholder block, a failed image description
//!   renders the image without one, and a failed chunk embedding is listed
//!   in the [`crate::publish::PublishReport`]. Callers always receive either
//!   a complete [`crate::model::RenderedDocument`] or a single fatal error.
//!
//! The adapter-level errors ([`OcrError`], [`ModelError`], [`StoreError`])
//! exist so capability implementations can report *why* they failed; the
//! pipeline absorbs them into markers and warnings.

use thiserror::Error;

/// All fatal errors returned by the pagemill library.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// The input bytes do not start with the `%PDF` magic.
    #[error("input is not a valid PDF (first bytes: {magic:?})")]
    NotAPdf { magic: [u8; 4] },

    /// The PDF structure could not be parsed at all.
    #[error("PDF could not be parsed: {0}")]
    CorruptPdf(String),

    /// The input file was not found or could not be read.
    #[error("failed to read '{path}': {detail}")]
    ReadFailed { path: String, detail: String },

    /// Input exceeds the configured size limit.
    #[error("input is {size_mb} MB, exceeding the {limit_mb} MB limit")]
    TooLarge { size_mb: usize, limit_mb: usize },

    /// Document exceeds the configured page limit.
    #[error("document has {pages} pages, exceeding the {limit} page limit")]
    TooManyPages { pages: usize, limit: usize },

    /// The document-level cancellation signal fired. In-flight OCR and
    /// vision calls were aborted; no partial artifact is exposed.
    #[error("processing was cancelled")]
    Cancelled,

    /// Builder validation failed, or an operation requires a capability
    /// that was not configured.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The vector store rejected the document record, so nothing could be
    /// published.
    #[error("vector store rejected the document record: {0}")]
    StoreRejected(String),

    /// Unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Failure of an OCR engine invocation. Recovered: the page is rendered
/// with an explicit placeholder block instead.
#[derive(Debug, Error)]
pub enum OcrError {
    /// The engine binary is missing or could not be spawned.
    #[error("OCR engine unavailable: {0}")]
    Unavailable(String),

    /// The engine did not finish within the configured timeout.
    #[error("OCR timed out after {0}s")]
    Timeout(u64),

    /// The engine ran but its output could not be interpreted.
    #[error("OCR produced unreadable output: {0}")]
    Malformed(String),
}

/// Failure of an external model call (vision description or embedding).
#[derive(Debug, Error)]
pub enum ModelError {
    /// Transport-level failure (connection refused, DNS, timeout).
    #[error("API request failed: {0}")]
    Request(String),

    /// HTTP 429 — quota exceeded, retry after backing off.
    #[error("rate limited (HTTP 429)")]
    RateLimited,

    /// Any other non-success HTTP status.
    #[error("API returned HTTP {status}: {detail}")]
    Status { status: u16, detail: String },

    /// The response body did not have the expected shape.
    #[error("malformed API response: {0}")]
    Malformed(String),
}

impl ModelError {
    /// Whether a retry with backoff has a chance of succeeding.
    ///
    /// Rate limits, transport errors, and 5xx responses are transient;
    /// 4xx responses (bad key, bad request) and malformed bodies are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ModelError::RateLimited | ModelError::Request(_) => true,
            ModelError::Status { status, .. } => (500..=599).contains(status),
            ModelError::Malformed(_) => false,
        }
    }
}

/// Failure of a vector-store operation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Transport-level failure.
    #[error("vector store request failed: {0}")]
    Request(String),

    /// Non-success HTTP status from the store.
    #[error("vector store returned HTTP {status}: {detail}")]
    Status { status: u16, detail: String },

    /// The response body did not have the expected shape.
    #[error("malformed store response: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn too_large_display() {
        let e = ProcessingError::TooLarge {
            size_mb: 75,
            limit_mb: 50,
        };
        let msg = e.to_string();
        assert!(msg.contains("75 MB"), "got: {msg}");
        assert!(msg.contains("50 MB"), "got: {msg}");
    }

    #[test]
    fn not_a_pdf_display() {
        let e = ProcessingError::NotAPdf {
            magic: *b"PK\x03\x04",
        };
        assert!(e.to_string().contains("not a valid PDF"));
    }

    #[test]
    fn retryable_classification() {
        assert!(ModelError::RateLimited.is_retryable());
        assert!(ModelError::Request("reset".into()).is_retryable());
        assert!(ModelError::Status {
            status: 503,
            detail: "overloaded".into()
        }
        .is_retryable());
        assert!(!ModelError::Status {
            status: 401,
            detail: "bad key".into()
        }
        .is_retryable());
        assert!(!ModelError::Malformed("no choices".into()).is_retryable());
    }
}
