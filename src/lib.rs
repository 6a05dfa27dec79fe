//! # CourtListener Case Fetcher
//!
//! ## Overview
//! This library retrieves case-law records from the CourtListener REST API by
//! keyword, walks paginated search results, fetches per-case detail (metadata,
//! opinion texts, optionally PDFs), and persists each case to a local
//! directory, skipping cases already downloaded.
//!
//! ## Architecture
//! The system is composed of several key modules:
//! - `transport`: HTTP client with retry, rate-limit back-off, and metrics
//! - `resolve`: Identifier and detail-link derivation from loose records
//! - `search`: Lazy, cursor-based pagination over keyword search results
//! - `assemble`: Case metadata, opinion, and PDF fetch-and-merge
//! - `persist`: Existence-gated artifact writes with sanitized filenames
//! - `pipeline`: Sequential batch driver with progress events
//! - `config`: Configuration management and settings
//! - `errors`: Centralized error handling and types
//!
//! ## Usage
//! ```rust,no_run
//! use caselaw_fetch::{
//!     Config, ApiTransport, PersistenceGate, DownloadPipeline, SearchFilters,
//! };
//!
//! #[tokio::main]
//! async fn main() -> caselaw_fetch::Result<()> {
//!     let config = Config::load()?;
//!     let transport = ApiTransport::new(&config)?;
//!     let gate = PersistenceGate::new("cases").await?;
//!     let pipeline = DownloadPipeline::new(&transport, gate, &config);
//!     let summary = pipeline
//!         .run(&["habeas corpus".to_string()], &SearchFilters::default())
//!         .await?;
//!     println!("downloaded {} cases", summary.downloaded);
//!     Ok(())
//! }
//! ```

// Core modules
pub mod assemble;
pub mod config;
pub mod errors;
pub mod persist;
pub mod pipeline;
pub mod resolve;
pub mod search;
pub mod transport;

// Re-exports for convenience
pub use assemble::{CaseArtifact, CaseAssembler, Opinion};
pub use config::Config;
pub use errors::{FetchError, Result};
pub use persist::{sanitize_filename, PersistOutcome, PersistenceGate};
pub use pipeline::{CaseOutcome, DownloadPipeline, ProgressEvent, RunSummary};
pub use resolve::{resolve_detail_link, resolve_identifier};
pub use search::{CaseSearcher, SearchCursor, SearchFilters};
pub use transport::{ApiTransport, ClientMetrics, HttpBackend, RawResponse};

/// One search result as the API returns it: an open key-value record whose
/// field names vary across API revisions
pub type CaseRecord = serde_json::Map<String, serde_json::Value>;
