//! # Persistence Module
//!
//! ## Purpose
//! Writes assembled case artifacts to the output directory and decides, by
//! file presence alone, whether a case was already downloaded. Reruns resume
//! from the first case whose metadata file is missing.
//!
//! ## Filesystem Layout (per case)
//! - `{out_dir}/{sanitized_name}_{identifier}.json` — metadata, the
//!   resumability marker
//! - `{out_dir}/{sanitized_name}_{identifier}_opinions.json` — when opinions
//!   were fetched
//! - `{out_dir}/{sanitized_name}_{identifier}.pdf` — when a PDF resolved

use crate::assemble::CaseArtifact;
use crate::errors::Result;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Return a filesystem-safe version of the given name. Alphanumerics, spaces,
/// underscores, and hyphens pass through; everything else becomes `_`. Names
/// differing only in punctuation may collide.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == ' ' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Outcome of one persistence attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// Artifact files were written
    Written,
    /// Metadata file already existed; nothing was touched
    Skipped,
}

/// Existence-gated writer for case artifacts
pub struct PersistenceGate {
    out_dir: PathBuf,
}

impl PersistenceGate {
    /// Create the gate, ensuring the output directory exists
    pub async fn new<P: AsRef<Path>>(out_dir: P) -> Result<Self> {
        let out_dir = out_dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&out_dir).await?;
        Ok(Self { out_dir })
    }

    /// Whether the case's metadata file is already materialized
    pub fn exists(&self, identifier: &str, name: &str) -> bool {
        self.metadata_path(identifier, name).exists()
    }

    /// Write the artifact unless its metadata file already exists
    pub async fn persist(
        &self,
        artifact: &CaseArtifact,
        identifier: &str,
        name: &str,
    ) -> Result<PersistOutcome> {
        let metadata_path = self.metadata_path(identifier, name);
        if metadata_path.exists() {
            debug!(path = %metadata_path.display(), "already materialized, skipping");
            return Ok(PersistOutcome::Skipped);
        }

        let base = self.base_name(identifier, name);

        if !artifact.opinions.is_empty() {
            let opinions_path = self.out_dir.join(format!("{}_opinions.json", base));
            let body = serde_json::to_vec_pretty(&artifact.opinions)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            tokio::fs::write(&opinions_path, body).await?;
        }

        if let Some(pdf) = &artifact.pdf {
            let pdf_path = self.out_dir.join(format!("{}.pdf", base));
            if !pdf_path.exists() {
                tokio::fs::write(&pdf_path, pdf).await?;
            }
        }

        // Metadata last: its presence marks the case complete
        let body = serde_json::to_vec_pretty(&artifact.metadata)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        tokio::fs::write(&metadata_path, body).await?;
        info!(path = %metadata_path.display(), "case persisted");
        Ok(PersistOutcome::Written)
    }

    fn base_name(&self, identifier: &str, name: &str) -> String {
        format!("{}_{}", sanitize_filename(name), identifier)
    }

    fn metadata_path(&self, identifier: &str, name: &str) -> PathBuf {
        self.out_dir
            .join(format!("{}.json", self.base_name(identifier, name)))
    }
}
