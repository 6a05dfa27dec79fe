//! # Case Assembly Module
//!
//! ## Purpose
//! Turns one search record into a complete case artifact: full metadata from
//! the detail endpoint, the cluster's opinions with their sub-opinions, and
//! the case PDF when one is reachable.
//!
//! ## Input/Output Specification
//! - **Input**: A raw search record with a resolvable detail link
//! - **Output**: [`CaseArtifact`] holding metadata, opinions, and PDF bytes
//! - **Degradation**: Opinion or PDF failures never void the metadata; the
//!   artifact is returned with what could be fetched
//!
//! ## Key Features
//! - Cluster identifier read from the fetched metadata, not the search record
//! - Recursive sub-opinion fetch, attached in link order
//! - PDF via the metadata download link, else the first docket entry that
//!   exposes a file
//! - RECAP fetch-then-poll retrieval for PACER documents with a bounded poll
//!
//! The persisted artifact carries only the fetched metadata; the search
//! snippet is discarded once the detail fetch succeeds.

use crate::config::Config;
use crate::errors::{FetchError, Result};
use crate::resolve::resolve_detail_link;
use crate::transport::ApiTransport;
use crate::CaseRecord;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Opinions endpoint path
const OPINIONS_PATH: &str = "/opinions/";

/// RECAP fetch endpoint path
const RECAP_FETCH_PATH: &str = "/recap-fetch/";

/// RECAP request type for a PDF document
const RECAP_REQUEST_TYPE_PDF: &str = "2";

/// RECAP fetch status: document ready
const RECAP_STATUS_SUCCESS: u64 = 2;

/// RECAP fetch status: server gave up
const RECAP_STATUS_FAILED: u64 = 3;

/// One opinion with its textual representations and sub-opinions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opinion {
    /// Opinion identifier
    pub id: Option<i64>,
    /// Opinion type tag (lead, concurrence, dissent, ...)
    #[serde(rename = "type")]
    pub opinion_type: Option<String>,
    /// Plain text body
    pub plain_text: Option<String>,
    /// Formatted HTML body
    pub html: Option<String>,
    /// Structured XML body
    pub xml_harvard: Option<String>,
    /// External PDF link
    pub download_url: Option<String>,
    /// Sub-opinions, in the order their links appeared
    #[serde(default)]
    pub sub_opinions: Vec<Opinion>,
}

impl Opinion {
    /// Extract the fixed field set from a raw opinion object
    fn from_value(value: &Value) -> Self {
        let text = |key: &str| {
            value
                .get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Self {
            id: value.get("id").and_then(Value::as_i64),
            opinion_type: text("type"),
            plain_text: text("plain_text"),
            html: text("html"),
            xml_harvard: text("xml_harvard"),
            download_url: text("download_url"),
            sub_opinions: Vec::new(),
        }
    }
}

/// The merged unit persisted to storage for one case
#[derive(Debug, Clone)]
pub struct CaseArtifact {
    /// Full metadata fetched from the detail link
    pub metadata: Value,
    /// Cluster opinions; empty when none exist or the fetch failed
    pub opinions: Vec<Opinion>,
    /// Raw PDF bytes when a source resolved
    pub pdf: Option<Vec<u8>>,
}

/// Listing response shared by the opinions and docket endpoints
#[derive(Debug, Deserialize)]
struct Listing {
    #[serde(default)]
    results: Vec<Value>,
}

/// Fetches and merges full case detail, opinions, and PDFs
pub struct CaseAssembler<'a> {
    transport: &'a ApiTransport,
    recap_poll_interval: Duration,
    recap_poll_timeout: Duration,
}

impl<'a> CaseAssembler<'a> {
    /// Create an assembler over the given transport
    pub fn new(transport: &'a ApiTransport, config: &Config) -> Self {
        Self {
            transport,
            recap_poll_interval: Duration::from_secs(config.recap.poll_interval_secs),
            recap_poll_timeout: Duration::from_secs(config.recap.poll_timeout_secs),
        }
    }

    /// Assemble the full artifact for one search record.
    ///
    /// Metadata failures propagate; opinion and PDF failures degrade to an
    /// empty opinions list and a missing PDF so a single broken subsystem
    /// never discards the case.
    pub async fn assemble(&self, record: &CaseRecord) -> Result<CaseArtifact> {
        let link = resolve_detail_link(record)?;
        let metadata: Value = self.transport.get(&link, &[]).await?.json("case detail")?;

        let opinions = match self.fetch_opinions(&metadata).await {
            Ok(opinions) => opinions,
            Err(e) => {
                warn!(error = %e, detail_link = %link, "opinion fetch failed, keeping metadata");
                Vec::new()
            }
        };

        let pdf = match self.fetch_pdf(&metadata).await {
            Ok(pdf) => pdf,
            Err(e) => {
                warn!(error = %e, detail_link = %link, "pdf fetch failed, continuing without it");
                None
            }
        };

        Ok(CaseArtifact {
            metadata,
            opinions,
            pdf,
        })
    }

    /// Fetch all opinions for the cluster named in the full metadata
    async fn fetch_opinions(&self, metadata: &Value) -> Result<Vec<Opinion>> {
        let cluster_id = match metadata.get("cluster_id").filter(|v| !v.is_null()) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => {
                debug!("metadata carries no cluster_id, no opinions to fetch");
                return Ok(Vec::new());
            }
        };

        let query = vec![("cluster".to_string(), cluster_id.clone())];
        let listing: Listing = self
            .transport
            .get(OPINIONS_PATH, &query)
            .await?
            .json("opinion listing")?;
        debug!(%cluster_id, count = listing.results.len(), "opinion listing fetched");

        let mut opinions = Vec::with_capacity(listing.results.len());
        for raw in listing.results {
            opinions.push(self.build_opinion(raw).await?);
        }
        Ok(opinions)
    }

    /// Build one opinion, fetching its sub-opinions individually in link order
    fn build_opinion(&self, raw: Value) -> BoxFuture<'_, Result<Opinion>> {
        async move {
            let mut opinion = Opinion::from_value(&raw);
            if let Some(links) = raw.get("sub_opinions").and_then(Value::as_array) {
                for link in links.iter().filter_map(Value::as_str) {
                    let sub: Value = self.transport.get(link, &[]).await?.json("sub-opinion")?;
                    opinion.sub_opinions.push(self.build_opinion(sub).await?);
                }
            }
            Ok(opinion)
        }
        .boxed()
    }

    /// Fetch the case PDF: the metadata download link first, then the first
    /// docket entry exposing a file. No source at all is not an error.
    async fn fetch_pdf(&self, metadata: &Value) -> Result<Option<Vec<u8>>> {
        if let Some(url) = nonempty_str(metadata, "download_url") {
            let response = self.transport.get(url, &[]).await?;
            return Ok(Some(response.body));
        }

        for entry in self.docket_entries(metadata).await? {
            if let Some(path) = nonempty_str(&entry, "filepath_local") {
                let response = self.transport.get(path, &[]).await?;
                return Ok(Some(response.body));
            }
        }
        Ok(None)
    }

    /// Docket entries, either inline in the metadata or behind a docket link
    async fn docket_entries(&self, metadata: &Value) -> Result<Vec<Value>> {
        if let Some(entries) = metadata.get("docket_entries").and_then(Value::as_array) {
            return Ok(entries.clone());
        }
        if let Some(docket_url) = nonempty_str(metadata, "docket") {
            let docket: Value = self.transport.get(docket_url, &[]).await?.json("docket")?;
            if let Some(entries) = docket.get("docket_entries").and_then(Value::as_array) {
                return Ok(entries.clone());
            }
        }
        Ok(Vec::new())
    }

    /// Retrieve a PACER document through the RECAP fetch-then-poll protocol.
    ///
    /// Posts a fetch request, then polls its status at a fixed interval until
    /// the document is ready, the server reports failure, or the overall
    /// deadline passes with a distinct [`FetchError::PdfPollTimeout`].
    pub async fn fetch_recap_document(&self, recap_document_id: &str) -> Result<Vec<u8>> {
        let form = vec![
            ("request_type".to_string(), RECAP_REQUEST_TYPE_PDF.to_string()),
            ("recap_document".to_string(), recap_document_id.to_string()),
        ];
        let created: Value = self
            .transport
            .post(RECAP_FETCH_PATH, &form)
            .await?
            .json("recap fetch request")?;
        let fetch_id = created
            .get("id")
            .and_then(Value::as_u64)
            .ok_or_else(|| FetchError::UnexpectedResponse {
                context: "recap fetch request".to_string(),
            })?;
        let status_path = format!("{}{}/", RECAP_FETCH_PATH, fetch_id);

        let started = std::time::Instant::now();
        loop {
            let status: Value = self
                .transport
                .get(&status_path, &[])
                .await?
                .json("recap fetch status")?;
            match status.get("status").and_then(Value::as_u64) {
                Some(RECAP_STATUS_SUCCESS) => {
                    let path = nonempty_str(&status, "filepath_local").ok_or_else(|| {
                        FetchError::UnexpectedResponse {
                            context: "recap fetch status".to_string(),
                        }
                    })?;
                    let response = self.transport.get(path, &[]).await?;
                    return Ok(response.body);
                }
                Some(RECAP_STATUS_FAILED) => {
                    return Err(FetchError::RecapFetchFailed { fetch_id });
                }
                _ => {}
            }
            if started.elapsed() + self.recap_poll_interval > self.recap_poll_timeout {
                return Err(FetchError::PdfPollTimeout {
                    waited_secs: started.elapsed().as_secs(),
                });
            }
            sleep(self.recap_poll_interval).await;
        }
    }
}

fn nonempty_str<'v>(value: &'v Value, key: &str) -> Option<&'v str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::ScriptedBackend;
    use serde_json::json;
    use std::sync::Arc;

    fn record(value: Value) -> CaseRecord {
        value.as_object().unwrap().clone()
    }

    fn setup(backend: &Arc<ScriptedBackend>) -> (ApiTransport, Config) {
        let config = Config::default();
        let transport = ApiTransport::with_backend(&config, backend.clone());
        (transport, config)
    }

    #[tokio::test]
    async fn assembles_metadata_and_opinions() {
        let backend = Arc::new(ScriptedBackend::new());
        // Detail fetch
        backend.push_json(
            200,
            json!({"cluster_id": 42, "case_name": "Foo v. Bar"}),
        );
        // Opinion listing
        backend.push_json(
            200,
            json!({"results": [
                {"id": 1, "type": "lead", "plain_text": "text one"},
                {"id": 2, "type": "dissent", "plain_text": "text two"}
            ]}),
        );
        let (transport, config) = setup(&backend);
        let assembler = CaseAssembler::new(&transport, &config);

        let rec = record(json!({"id": 42, "url": "/clusters/42/"}));
        let artifact = assembler.assemble(&rec).await.unwrap();
        assert_eq!(artifact.metadata.get("case_name"), Some(&json!("Foo v. Bar")));
        assert_eq!(artifact.opinions.len(), 2);
        assert_eq!(artifact.opinions[0].opinion_type.as_deref(), Some("lead"));
        assert!(artifact.pdf.is_none());

        let calls = backend.calls();
        assert_eq!(calls[1].query, vec![("cluster".to_string(), "42".to_string())]);
    }

    #[tokio::test]
    async fn sub_opinions_fetched_in_link_order() {
        let backend = Arc::new(ScriptedBackend::new());
        // Detail fetch
        backend.push_json(200, json!({"cluster_id": 7}));
        // Opinion listing: one parent with two sub-opinion links
        backend.push_json(
            200,
            json!({"results": [{
                "id": 10,
                "type": "lead",
                "sub_opinions": ["/opinions/11/", "/opinions/12/"]
            }]}),
        );
        backend.push_json(200, json!({"id": 11, "type": "concurrence"}));
        backend.push_json(200, json!({"id": 12, "type": "dissent"}));
        let (transport, config) = setup(&backend);
        let assembler = CaseAssembler::new(&transport, &config);

        let rec = record(json!({"id": 7, "url": "/clusters/7/"}));
        let artifact = assembler.assemble(&rec).await.unwrap();
        assert_eq!(artifact.opinions.len(), 1);
        let parent = &artifact.opinions[0];
        assert_eq!(parent.sub_opinions.len(), 2);
        assert_eq!(parent.sub_opinions[0].id, Some(11));
        assert_eq!(parent.sub_opinions[1].id, Some(12));

        // Detail + listing + two sub-opinion fetches; opinion resolution
        // itself cost three calls.
        assert_eq!(backend.call_count(), 4);
    }

    #[tokio::test]
    async fn missing_cluster_id_means_no_opinion_calls() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_json(200, json!({"case_name": "No Cluster"}));
        let (transport, config) = setup(&backend);
        let assembler = CaseAssembler::new(&transport, &config);

        let rec = record(json!({"id": 1, "url": "/dockets/1/"}));
        let artifact = assembler.assemble(&rec).await.unwrap();
        assert!(artifact.opinions.is_empty());
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn opinion_failure_degrades_to_empty_list() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_json(200, json!({"cluster_id": 9}));
        // Opinion listing fails terminally
        backend.push_status(404, None);
        let (transport, config) = setup(&backend);
        let assembler = CaseAssembler::new(&transport, &config);

        let rec = record(json!({"id": 9, "url": "/clusters/9/"}));
        let artifact = assembler.assemble(&rec).await.unwrap();
        assert!(artifact.opinions.is_empty());
        assert_eq!(artifact.metadata.get("cluster_id"), Some(&json!(9)));
    }

    #[tokio::test]
    async fn pdf_from_download_url() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_json(
            200,
            json!({"download_url": "https://files.test/case.pdf"}),
        );
        backend.push_bytes(200, b"%PDF-1.4".to_vec());
        let (transport, config) = setup(&backend);
        let assembler = CaseAssembler::new(&transport, &config);

        let rec = record(json!({"id": 3, "url": "/clusters/3/"}));
        let artifact = assembler.assemble(&rec).await.unwrap();
        assert_eq!(artifact.pdf.as_deref(), Some(b"%PDF-1.4".as_ref()));
    }

    #[tokio::test]
    async fn pdf_falls_back_to_first_docket_entry_with_file() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_json(
            200,
            json!({
                "docket_entries": [
                    {"description": "minute order"},
                    {"filepath_local": "/recap/doc.pdf"},
                    {"filepath_local": "/recap/later.pdf"}
                ]
            }),
        );
        backend.push_bytes(200, b"%PDF-docket".to_vec());
        let (transport, config) = setup(&backend);
        let assembler = CaseAssembler::new(&transport, &config);

        let rec = record(json!({"id": 4, "url": "/dockets/4/"}));
        let artifact = assembler.assemble(&rec).await.unwrap();
        assert_eq!(artifact.pdf.as_deref(), Some(b"%PDF-docket".as_ref()));

        let calls = backend.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].url.ends_with("/recap/doc.pdf"));
    }

    #[tokio::test]
    async fn recap_poll_succeeds_when_ready() {
        let backend = Arc::new(ScriptedBackend::new());
        // Fetch request accepted
        backend.push_json(200, json!({"id": 55, "status": 1}));
        // First poll: ready
        backend.push_json(
            200,
            json!({"id": 55, "status": 2, "filepath_local": "/recap/55.pdf"}),
        );
        backend.push_bytes(200, b"%PDF-recap".to_vec());
        let (transport, config) = setup(&backend);
        let assembler = CaseAssembler::new(&transport, &config);

        let pdf = assembler.fetch_recap_document("901").await.unwrap();
        assert_eq!(pdf, b"%PDF-recap".to_vec());
        assert_eq!(backend.calls()[0].method, "POST");
    }

    #[tokio::test]
    async fn recap_poll_times_out_distinctly() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_json(200, json!({"id": 56, "status": 1}));
        backend.push_json(200, json!({"id": 56, "status": 1}));
        let mut config = Config::default();
        config.recap.poll_interval_secs = 1;
        config.recap.poll_timeout_secs = 0;
        let transport = ApiTransport::with_backend(&config, backend.clone());
        let assembler = CaseAssembler::new(&transport, &config);

        let err = assembler.fetch_recap_document("902").await.unwrap_err();
        assert!(matches!(err, FetchError::PdfPollTimeout { .. }));
    }

    #[tokio::test]
    async fn recap_server_failure_is_reported() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_json(200, json!({"id": 57, "status": 1}));
        backend.push_json(200, json!({"id": 57, "status": 3}));
        let (transport, config) = setup(&backend);
        let assembler = CaseAssembler::new(&transport, &config);

        let err = assembler.fetch_recap_document("903").await.unwrap_err();
        assert!(matches!(err, FetchError::RecapFetchFailed { fetch_id: 57 }));
    }
}
