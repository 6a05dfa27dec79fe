//! # Download Pipeline Module
//!
//! ## Purpose
//! Drives the whole retrieval run: for each keyword, walks the search cursor,
//! resolves each record, skips cases already on disk, assembles the rest, and
//! persists them. One sequential worker; one HTTP call in flight at a time.
//!
//! ## Input/Output Specification
//! - **Input**: Keyword list, search filters, output directory
//! - **Output**: Persisted case artifacts plus a [`RunSummary`] of the run
//! - **Ordering**: Keywords in the order supplied; records in server order
//!
//! ## Key Features
//! - Per-case error boundary: a broken record is reported and skipped, the
//!   batch continues
//! - Fixed inter-case delay throttling request rate below server limits
//! - Progress reported to the presentation layer purely through a channel of
//!   [`ProgressEvent`] values; the worker never touches UI state
//! - Optional keyword substring post-filter over case names

use crate::assemble::CaseAssembler;
use crate::config::Config;
use crate::errors::Result;
use crate::persist::{PersistOutcome, PersistenceGate};
use crate::resolve::resolve_identifier;
use crate::search::{CaseSearcher, SearchFilters};
use crate::transport::ApiTransport;
use crate::CaseRecord;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::sleep;
use tracing::{info, warn};

/// Worker-to-presentation messages; the only channel out of the pipeline
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// A keyword search began
    KeywordStarted { keyword: String },
    /// One case finished, successfully or not
    CaseFinished {
        name: String,
        identifier: String,
        outcome: CaseOutcome,
    },
    /// The whole run finished
    RunFinished { summary: RunSummary },
}

/// Terminal state of one case within a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaseOutcome {
    /// Artifact written to disk
    Downloaded,
    /// Already materialized; no network calls were made
    Skipped,
    /// Case-local failure; the batch continued
    Failed { reason: String },
}

/// End-of-run accounting
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Records seen across all keywords
    pub cases_seen: u64,
    /// Cases downloaded this run
    pub downloaded: u64,
    /// Cases skipped because they were already on disk
    pub skipped: u64,
    /// Cases that failed locally
    pub failed: u64,
    /// Total HTTP requests attempted, retries included
    pub api_calls: u64,
    /// Total response bytes received
    pub total_bytes: u64,
    /// Cumulative wall time spent in HTTP requests
    pub request_time: Duration,
}

/// Sequential keyword-to-disk download driver
pub struct DownloadPipeline<'a> {
    transport: &'a ApiTransport,
    searcher: CaseSearcher<'a>,
    assembler: CaseAssembler<'a>,
    gate: PersistenceGate,
    inter_case_delay: Duration,
    require_keyword_match: bool,
    events: Option<UnboundedSender<ProgressEvent>>,
}

impl<'a> DownloadPipeline<'a> {
    /// Build a pipeline over one transport and one output directory
    pub fn new(transport: &'a ApiTransport, gate: PersistenceGate, config: &Config) -> Self {
        Self {
            transport,
            searcher: CaseSearcher::new(transport, config.api.page_size),
            assembler: CaseAssembler::new(transport, config),
            gate,
            inter_case_delay: config.inter_case_delay(),
            require_keyword_match: false,
            events: None,
        }
    }

    /// Send progress events to the given channel
    pub fn with_events(mut self, events: UnboundedSender<ProgressEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Drop records whose case name does not contain the keyword. Off by
    /// default; the server already ranks by relevance.
    pub fn with_keyword_match(mut self, require: bool) -> Self {
        self.require_keyword_match = require;
        self
    }

    /// Run the pipeline over all keywords in order
    pub async fn run(&self, keywords: &[String], filters: &SearchFilters) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        for keyword in keywords {
            info!(%keyword, "searching cases");
            self.emit(ProgressEvent::KeywordStarted {
                keyword: keyword.clone(),
            });

            let mut cursor = self.searcher.search(keyword, filters);
            loop {
                let record = match cursor.next_record().await {
                    Ok(Some(record)) => record,
                    Ok(None) => break,
                    Err(e) => {
                        // A dead cursor ends this keyword, not the run
                        warn!(%keyword, error = %e, "search failed, moving to next keyword");
                        summary.failed += 1;
                        break;
                    }
                };

                if self.require_keyword_match && !name_contains(&record, keyword) {
                    continue;
                }

                summary.cases_seen += 1;
                let (name, identifier, outcome) = self.process_case(&record).await;
                match &outcome {
                    CaseOutcome::Downloaded => summary.downloaded += 1,
                    CaseOutcome::Skipped => summary.skipped += 1,
                    CaseOutcome::Failed { reason } => {
                        warn!(%name, %identifier, %reason, "case failed");
                        summary.failed += 1;
                    }
                }
                self.emit(ProgressEvent::CaseFinished {
                    name,
                    identifier,
                    outcome,
                });

                sleep(self.inter_case_delay).await;
            }
        }

        let metrics = self.transport.metrics().await;
        summary.api_calls = metrics.call_count;
        summary.total_bytes = metrics.total_bytes;
        summary.request_time = metrics.total_time;
        info!(
            cases = summary.cases_seen,
            downloaded = summary.downloaded,
            skipped = summary.skipped,
            failed = summary.failed,
            api_calls = summary.api_calls,
            "run complete"
        );
        self.emit(ProgressEvent::RunFinished {
            summary: summary.clone(),
        });
        Ok(summary)
    }

    /// Per-case boundary: every failure is folded into the outcome
    async fn process_case(&self, record: &CaseRecord) -> (String, String, CaseOutcome) {
        let identifier = match resolve_identifier(record) {
            Ok(identifier) => identifier,
            Err(e) => {
                return (
                    display_name(record, "?"),
                    String::new(),
                    CaseOutcome::Failed {
                        reason: e.to_string(),
                    },
                )
            }
        };
        let name = display_name(record, &identifier);

        if self.gate.exists(&identifier, &name) {
            return (name, identifier, CaseOutcome::Skipped);
        }

        tracing::debug!(%name, %identifier, "downloading case");
        let outcome = match self.assembler.assemble(record).await {
            Ok(artifact) => match self.gate.persist(&artifact, &identifier, &name).await {
                Ok(PersistOutcome::Written) => CaseOutcome::Downloaded,
                Ok(PersistOutcome::Skipped) => CaseOutcome::Skipped,
                Err(e) => CaseOutcome::Failed {
                    reason: e.to_string(),
                },
            },
            Err(e) => CaseOutcome::Failed {
                reason: e.to_string(),
            },
        };
        (name, identifier, outcome)
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(events) = &self.events {
            // A closed receiver just means nobody is watching
            let _ = events.send(event);
        }
    }
}

/// Case display name; falls back to a synthetic one like the API's consumers
fn display_name(record: &CaseRecord, identifier: &str) -> String {
    record
        .get("name")
        .or_else(|| record.get("caseName"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("case_{}", identifier))
}

fn name_contains(record: &CaseRecord, keyword: &str) -> bool {
    display_name(record, "")
        .to_lowercase()
        .contains(&keyword.to_lowercase())
}
