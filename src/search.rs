//! # Search Cursor Module
//!
//! ## Purpose
//! Queries the case-law search endpoint by keyword and walks the result pages
//! lazily. Each page is fetched only when the previous one is drained, so
//! unbounded result sets are never buffered whole.
//!
//! ## Input/Output Specification
//! - **Input**: Free-text keyword plus optional court and filed-date filters
//! - **Output**: A forward-only sequence of raw case records, in server order
//! - **Pagination**: Server `next` links are followed verbatim; the server
//!   embeds the original filters in them
//!
//! ## Key Features
//! - One network request per page, driven by consumption
//! - Court filters joined by comma, date filters in ISO format
//! - Cursor ends when a page carries no `next` link
//! - Stream adapter for use with `futures` combinators

use crate::errors::Result;
use crate::transport::ApiTransport;
use crate::CaseRecord;
use chrono::NaiveDate;
use futures::stream::Stream;
use serde::Deserialize;
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Search endpoint path
const SEARCH_PATH: &str = "/search/";

/// Result-type filter selecting case-law opinions
const RESULT_TYPE_OPINION: &str = "o";

/// Optional filters narrowing a keyword search
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    /// Court identifiers; joined by comma in the query
    pub courts: Vec<String>,
    /// Only cases filed on or after this date
    pub filed_after: Option<NaiveDate>,
    /// Only cases filed on or before this date
    pub filed_before: Option<NaiveDate>,
}

/// One page of the search response
#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    results: Vec<serde_json::Value>,
    #[serde(default)]
    next: Option<String>,
}

/// Issues keyword searches against the case-law search endpoint
pub struct CaseSearcher<'a> {
    transport: &'a ApiTransport,
    page_size: usize,
}

impl<'a> CaseSearcher<'a> {
    /// Create a searcher over the given transport
    pub fn new(transport: &'a ApiTransport, page_size: usize) -> Self {
        Self {
            transport,
            page_size,
        }
    }

    /// Start a lazy, single-pass cursor over all results for a keyword.
    /// Reading from the start again requires calling `search` again.
    pub fn search(&self, keyword: &str, filters: &SearchFilters) -> SearchCursor<'a> {
        let mut params = vec![
            ("q".to_string(), keyword.to_string()),
            ("type".to_string(), RESULT_TYPE_OPINION.to_string()),
            ("page_size".to_string(), self.page_size.to_string()),
        ];
        if !filters.courts.is_empty() {
            params.push(("court".to_string(), filters.courts.join(",")));
        }
        if let Some(after) = filters.filed_after {
            params.push(("filed_after".to_string(), after.format("%Y-%m-%d").to_string()));
        }
        if let Some(before) = filters.filed_before {
            params.push((
                "filed_before".to_string(),
                before.format("%Y-%m-%d").to_string(),
            ));
        }

        SearchCursor {
            transport: self.transport,
            pending: Some(PageTarget::First { params }),
            buffer: VecDeque::new(),
        }
    }
}

/// Where the next page comes from
enum PageTarget {
    /// Initial request against the search endpoint with full parameters
    First { params: Vec<(String, String)> },
    /// Server-supplied pagination link, followed verbatim
    Next(String),
}

/// Lazy cursor over search results; one transport call per page
pub struct SearchCursor<'a> {
    transport: &'a ApiTransport,
    pending: Option<PageTarget>,
    buffer: VecDeque<CaseRecord>,
}

impl<'a> SearchCursor<'a> {
    /// Fetch the next record, requesting a new page only when the current one
    /// is drained. Returns `Ok(None)` when the last page has no `next` link.
    pub async fn next_record(&mut self) -> Result<Option<CaseRecord>> {
        loop {
            if let Some(record) = self.buffer.pop_front() {
                return Ok(Some(record));
            }
            let target = match self.pending.take() {
                Some(target) => target,
                None => return Ok(None),
            };

            let response = match target {
                PageTarget::First { params } => {
                    self.transport.get(SEARCH_PATH, &params).await?
                }
                PageTarget::Next(url) => self.transport.get(&url, &[]).await?,
            };
            let page: SearchPage = response.json("search page")?;
            debug!(results = page.results.len(), has_next = page.next.is_some(), "search page");

            for result in page.results {
                match result {
                    serde_json::Value::Object(record) => self.buffer.push_back(record),
                    other => warn!(?other, "skipping non-object search result"),
                }
            }
            self.pending = page
                .next
                .filter(|next| !next.is_empty())
                .map(PageTarget::Next);
        }
    }

    /// Adapt the cursor into a `futures` stream of records
    pub fn into_stream(self) -> impl Stream<Item = Result<CaseRecord>> + 'a {
        futures::stream::try_unfold(self, |mut cursor| async move {
            Ok(cursor.next_record().await?.map(|record| (record, cursor)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::transport::testing::ScriptedBackend;
    use futures::TryStreamExt;
    use serde_json::json;
    use std::sync::Arc;

    fn transport(backend: Arc<ScriptedBackend>) -> ApiTransport {
        ApiTransport::with_backend(&Config::default(), backend)
    }

    #[tokio::test]
    async fn two_page_search_yields_records_in_page_order() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_json(
            200,
            json!({
                "results": [{"id": 1, "url": "/clusters/1/", "name": "First Case"}],
                "next": "/search/?page=2"
            }),
        );
        backend.push_json(
            200,
            json!({
                "results": [{"id": 2, "url": "/clusters/2/", "name": "Second Case"}],
                "next": null
            }),
        );
        let transport = transport(backend.clone());
        let searcher = CaseSearcher::new(&transport, 100);

        let mut cursor = searcher.search("habeas", &SearchFilters::default());
        let first = cursor.next_record().await.unwrap().unwrap();
        let second = cursor.next_record().await.unwrap().unwrap();
        assert_eq!(first.get("id"), Some(&json!(1)));
        assert_eq!(second.get("id"), Some(&json!(2)));
        assert!(cursor.next_record().await.unwrap().is_none());
        assert_eq!(backend.call_count(), 2);
    }

    #[tokio::test]
    async fn next_links_are_followed_verbatim() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_json(
            200,
            json!({
                "results": [],
                "next": "https://elsewhere.test/api/search/?page=2"
            }),
        );
        backend.push_json(200, json!({"results": [], "next": null}));
        let transport = transport(backend.clone());
        let searcher = CaseSearcher::new(&transport, 100);

        let mut cursor = searcher.search("habeas", &SearchFilters::default());
        assert!(cursor.next_record().await.unwrap().is_none());

        let calls = backend.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].url, "https://elsewhere.test/api/search/?page=2");
        assert!(calls[1].query.is_empty());
    }

    #[tokio::test]
    async fn first_request_carries_query_and_filters() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_json(200, json!({"results": [], "next": null}));
        let transport = transport(backend.clone());
        let searcher = CaseSearcher::new(&transport, 50);

        let filters = SearchFilters {
            courts: vec!["colo".to_string(), "coloctapp".to_string()],
            filed_after: NaiveDate::from_ymd_opt(2020, 1, 1),
            filed_before: NaiveDate::from_ymd_opt(2021, 6, 30),
        };
        let mut cursor = searcher.search("water rights", &filters);
        assert!(cursor.next_record().await.unwrap().is_none());

        let query = backend.calls()[0].query.clone();
        assert!(query.contains(&("q".to_string(), "water rights".to_string())));
        assert!(query.contains(&("type".to_string(), "o".to_string())));
        assert!(query.contains(&("page_size".to_string(), "50".to_string())));
        assert!(query.contains(&("court".to_string(), "colo,coloctapp".to_string())));
        assert!(query.contains(&("filed_after".to_string(), "2020-01-01".to_string())));
        assert!(query.contains(&("filed_before".to_string(), "2021-06-30".to_string())));
    }

    #[tokio::test]
    async fn empty_next_ends_the_cursor() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_json(
            200,
            json!({"results": [{"id": 1}], "next": ""}),
        );
        let transport = transport(backend.clone());
        let searcher = CaseSearcher::new(&transport, 100);

        let mut cursor = searcher.search("habeas", &SearchFilters::default());
        assert!(cursor.next_record().await.unwrap().is_some());
        assert!(cursor.next_record().await.unwrap().is_none());
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn stream_adapter_collects_all_records() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_json(
            200,
            json!({
                "results": [{"id": 1}, {"id": 2}],
                "next": null
            }),
        );
        let transport = transport(backend.clone());
        let searcher = CaseSearcher::new(&transport, 100);

        let records: Vec<CaseRecord> = searcher
            .search("habeas", &SearchFilters::default())
            .into_stream()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
    }
}
