//! # Record Resolution Module
//!
//! ## Purpose
//! Derives a stable case identifier and a dereferenceable detail link from the
//! loosely structured records the search API returns. Field names have shifted
//! across API revisions, so both functions probe known keys in a fixed
//! priority order instead of assuming a schema.

use crate::errors::{FetchError, Result};
use crate::CaseRecord;
use serde_json::Value;

/// Identifier keys in priority order; the first present wins
const IDENTIFIER_KEYS: [&str; 3] = ["id", "cluster_id", "docket_id"];

/// Derive the stable identifier for a search record.
///
/// Probes `id`, `cluster_id`, then `docket_id`; null values are treated as
/// absent. Fails with [`FetchError::MissingIdentifier`] when no key matches.
pub fn resolve_identifier(record: &CaseRecord) -> Result<String> {
    for key in IDENTIFIER_KEYS {
        if let Some(value) = record.get(key).filter(|v| !v.is_null()) {
            return Ok(scalar_to_string(value));
        }
    }
    Err(FetchError::MissingIdentifier)
}

/// Derive the detail-fetch link for a search record.
///
/// Rules in order: `url`, `resource_uri`, a synthesized `/clusters/{id}/` when
/// `cluster_id` is present, and finally `absolute_url` but only when it points
/// into the API namespace. Cluster links outrank `absolute_url` because they
/// dereference to full cluster detail rather than a rendered web page.
pub fn resolve_detail_link(record: &CaseRecord) -> Result<String> {
    if let Some(url) = string_field(record, "url") {
        return Ok(url);
    }
    if let Some(uri) = string_field(record, "resource_uri") {
        return Ok(uri);
    }
    if let Some(cluster_id) = record.get("cluster_id").filter(|v| !v.is_null()) {
        return Ok(format!("/clusters/{}/", scalar_to_string(cluster_id)));
    }
    if let Some(absolute) = string_field(record, "absolute_url") {
        if points_into_api(&absolute) {
            return Ok(absolute);
        }
    }
    Err(FetchError::MissingDetailLink)
}

/// Whether a link targets the API namespace rather than a web page
fn points_into_api(url: &str) -> bool {
    if url.starts_with("http://") || url.starts_with("https://") {
        url.contains("/api/")
    } else {
        url.starts_with("/api/")
    }
}

fn string_field(record: &CaseRecord, key: &str) -> Option<String> {
    record
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Render an identifier value as a string without JSON quoting
fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
