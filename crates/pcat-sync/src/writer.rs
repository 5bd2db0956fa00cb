//! Catalog writer: deterministic JSON rendering + atomic replace.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use pcat_core::{MatchStrength, ProductRecord};
use pcat_storage::{write_atomic, WriteOutcome};
use serde::{Deserialize, Serialize};

/// Per-source load status recorded in the catalog header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceStatus {
    pub source_id: String,
    pub status: String,
    pub loaded: usize,
    pub skipped: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogMetadata {
    /// Newest input modification time, so unchanged inputs keep the same header.
    pub generated_at: DateTime<Utc>,
    pub input_fingerprint: String,
    pub total_products: usize,
    pub stages: Vec<String>,
    pub sources: Vec<SourceStatus>,
    pub match_counts: BTreeMap<MatchStrength, usize>,
    pub orphaned_records: usize,
    pub duplicate_ids: usize,
    pub pdf_links_removed: usize,
    pub violations: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogDocument {
    pub metadata: CatalogMetadata,
    pub products: Vec<ProductRecord>,
}

/// Pretty JSON with a trailing newline. Struct fields serialize in
/// declaration order and every map is a `BTreeMap`, so equal catalogs
/// render to equal bytes.
pub fn render_catalog(document: &CatalogDocument) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(document).context("serializing catalog")?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Header fields of a catalog already on disk.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviousHeader {
    pub generated_at: DateTime<Utc>,
    pub input_fingerprint: String,
}

#[derive(Deserialize)]
struct HeaderOnly {
    metadata: PreviousHeader,
}

/// `None` when the file is missing or not a catalog.
pub fn read_previous_header(path: &Path) -> Option<PreviousHeader> {
    let bytes = std::fs::read(path).ok()?;
    serde_json::from_slice::<HeaderOnly>(&bytes).ok().map(|h| h.metadata)
}

pub async fn write_catalog(path: &Path, document: &CatalogDocument) -> Result<WriteOutcome> {
    let bytes = render_catalog(document)?;
    write_atomic(path, &bytes)
        .await
        .with_context(|| format!("writing catalog {}", path.display()))
}
