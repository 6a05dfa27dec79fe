//! # Error Handling Module
//!
//! ## Purpose
//! Centralized error handling for the case retrieval pipeline, covering the
//! transport layer, record resolution, case assembly, and persistence.
//!
//! ## Input/Output Specification
//! - **Input**: Error conditions from HTTP calls, JSON parsing, and file I/O
//! - **Output**: Structured error types with context for logging and recovery
//! - **Error Categories**: Transport, Resolution, Assembly, Persistence, Config
//!
//! ## Key Features
//! - Distinct variants for retryable vs terminal HTTP failures
//! - Per-record resolution failures that the pipeline can skip over
//! - Explicit timeout variant for the RECAP readiness poll
//! - Automatic conversion from common library error types

use thiserror::Error;

/// Result type used throughout the application
pub type Result<T> = std::result::Result<T, FetchError>;

/// Error types for the case retrieval pipeline
#[derive(Debug, Error)]
pub enum FetchError {
    /// Terminal HTTP status the caller did not tolerate (4xx other than 429)
    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    /// Rate limiting persisted past the retry budget
    #[error("rate limited by {url} after {attempts} attempts")]
    RateLimitExhausted { url: String, attempts: u32 },

    /// Server errors persisted past the retry budget
    #[error("server errors from {url} after {attempts} attempts (last status {last_status})")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        last_status: u16,
    },

    /// Connection-level failure before any status was received
    #[error("network error: {details}")]
    Network { details: String },

    /// Search record carried none of the known identifier keys
    #[error("record has no identifier (tried id, cluster_id, docket_id)")]
    MissingIdentifier,

    /// Search record carried no dereferenceable detail link
    #[error("record has no usable detail link")]
    MissingDetailLink,

    /// RECAP document never became ready within the poll deadline
    #[error("RECAP document not ready after {waited_secs}s")]
    PdfPollTimeout { waited_secs: u64 },

    /// Server reported the RECAP fetch request itself as failed
    #[error("RECAP fetch {fetch_id} failed")]
    RecapFetchFailed { fetch_id: u64 },

    /// Response body did not parse as the expected JSON shape
    #[error("failed to parse response from {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    /// Response parsed as JSON but lacked a field the protocol requires
    #[error("unexpected response shape from {context}")]
    UnexpectedResponse { context: String },

    /// Configuration errors
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Filesystem errors from the persistence layer
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    /// Check if the error is recoverable (can be retried later)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FetchError::RateLimitExhausted { .. }
                | FetchError::RetriesExhausted { .. }
                | FetchError::Network { .. }
                | FetchError::PdfPollTimeout { .. }
        )
    }

    /// Check if the error is local to one record and the batch should continue
    pub fn is_record_local(&self) -> bool {
        matches!(
            self,
            FetchError::MissingIdentifier | FetchError::MissingDetailLink
        )
    }

    /// Get error category for metrics and logging
    pub fn category(&self) -> &'static str {
        match self {
            FetchError::HttpStatus { .. }
            | FetchError::RateLimitExhausted { .. }
            | FetchError::RetriesExhausted { .. }
            | FetchError::Network { .. } => "transport",
            FetchError::MissingIdentifier | FetchError::MissingDetailLink => "resolution",
            FetchError::PdfPollTimeout { .. }
            | FetchError::RecapFetchFailed { .. }
            | FetchError::Json { .. }
            | FetchError::UnexpectedResponse { .. } => "assembly",
            FetchError::Io(_) => "persistence",
            FetchError::Config { .. } => "configuration",
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Network {
            details: err.to_string(),
        }
    }
}
