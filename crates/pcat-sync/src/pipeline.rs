//! Full-rebuild pipeline: load → match → merge → enrich → validate → write.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use pcat_adapters::{
    list_image_dir, list_pdf_dir, load_record_source, DirectoryListing, LoadError, LoadedSource, SkippedRecord,
};
use pcat_core::{AuditEntry, ProductRecord, SourceKind, SourceRecord};
use pcat_storage::{download_all, sha256_hex, DownloadJob, DownloadReport, HttpFetcher, WriteOutcome};
use thiserror::Error;
use tracing::{info, warn};

use crate::classify::{ClassificationTable, Classifier};
use crate::config::{PipelineConfig, ResolverTables, RunOptions, SourceRegistry};
use crate::documents::{candidates_from_listing, resolve_document};
use crate::images::{resolve_image, resolve_product_image};
use crate::matcher::{DuplicateAuthoritative, MatchOutcome, OrphanedSourceRecord, RecordMatcher};
use crate::merge::{apply_field_overrides, merge_match};
use crate::normalize::catalog_id;
use crate::overrides::OverrideTable;
use crate::validate::{Severity, ValidationReport, Validator};
use crate::writer::{read_previous_header, write_catalog, CatalogDocument, CatalogMetadata, SourceStatus};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("authoritative source could not be loaded: {0}")]
    AuthoritativeSourceFailed(#[source] LoadError),
    #[error("pipeline.yaml has no enabled curated source")]
    NoAuthoritativeSource,
}

/// Outcome of one `run`.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub output_path: PathBuf,
    /// `None` on a dry run.
    pub write_outcome: Option<WriteOutcome>,
    pub products_written: usize,
    pub products_rejected: usize,
    pub report: ValidationReport,
    pub orphans: Vec<OrphanedSourceRecord>,
    pub duplicates: Vec<DuplicateAuthoritative>,
    pub skipped_records: Vec<SkippedRecord>,
    pub degraded_sources: Vec<String>,
    pub metadata: CatalogMetadata,
}

impl RunSummary {
    /// 2 when any record was rejected by a hard violation, otherwise 0.
    pub fn exit_code(&self) -> i32 {
        if self.report.hard_count() > 0 {
            2
        } else {
            0
        }
    }
}

/// Everything read from disk for one run. Immutable once built.
struct Inputs {
    registry: SourceRegistry,
    overrides: OverrideTable,
    table: ClassificationTable,
    tables: ResolverTables,
    authoritative: LoadedSource,
    secondary: Vec<LoadedSource>,
    images: Option<DirectoryListing>,
    pdfs: Option<DirectoryListing>,
    statuses: Vec<SourceStatus>,
    degraded: Vec<String>,
    rule_hashes: Vec<(String, String)>,
    newest_input: Option<DateTime<Utc>>,
}

pub struct CatalogPipeline {
    config: PipelineConfig,
}

impl CatalogPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn run(&self, options: RunOptions) -> Result<RunSummary> {
        let inputs = self.load_inputs(options)?;
        let output_path = self.output_path(&inputs.registry);
        let input_fingerprint = fingerprint(&inputs, &options);
        // Same input content keeps the previous timestamp even when mtimes moved.
        let generated_at = read_previous_header(&output_path)
            .filter(|previous| previous.input_fingerprint == input_fingerprint)
            .map(|previous| previous.generated_at)
            .or(inputs.newest_input)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

        let matcher = RecordMatcher::new(&inputs.overrides);
        let secondary: Vec<SourceRecord> = inputs.secondary.iter().flat_map(|s| s.records.iter().cloned()).collect();
        let outcome = matcher.link(inputs.authoritative.records.clone(), secondary);
        log_match(&outcome);

        let classifier = Classifier::new(&inputs.table, &inputs.overrides);
        let mut products = Vec::with_capacity(outcome.results.len());
        let mut pdf_links_removed = 0usize;
        let mut stage_counts: BTreeMap<&'static str, usize> = BTreeMap::new();

        for result in &outcome.results {
            let mut product = merge_match(result);
            let sources = std::iter::once(result.authoritative.source_id.clone())
                .chain(result.linked.iter().map(|l| format!("{}:{}", l.record.source_id, l.strength.as_str())))
                .collect::<Vec<_>>()
                .join(", ");
            product.record_change(AuditEntry::new("merge", generated_at).with_note(format!("sources: {sources}")));
            for note in &inputs.degraded {
                product.record_change(AuditEntry::new("load", generated_at).with_note(note.clone()));
            }

            let product_override = inputs.overrides.for_product(&product.id);
            if let Some(o) = product_override {
                let touched = apply_field_overrides(&mut product, o);
                if !touched.is_empty() {
                    product.record_change(AuditEntry::new("override", generated_at).with_note(touched.join(", ")));
                    *stage_counts.entry("override").or_insert(0) += 1;
                }
            }

            let classification = if options.classification {
                classifier.classify(&product)
            } else {
                classifier.passthrough(&product)
            };
            let defaulted_industry = classifier.apply(&mut product, &classification);
            if options.classification {
                product.record_change(AuditEntry::new("classify", generated_at).with_note(classification.describe()));
                *stage_counts.entry("classify").or_insert(0) += 1;
            }
            if defaulted_industry {
                product.record_change(AuditEntry::new("industry", generated_at).with_note("no source industry; defaulted"));
            }

            if options.images {
                if let Some(listing) = &inputs.images {
                    let resolution = resolve_product_image(&product, &listing.entries, &inputs.tables);
                    if resolution.path != product.image_url {
                        *stage_counts.entry("images").or_insert(0) += 1;
                    }
                    product.image_url = resolution.path;
                    product.record_change(
                        AuditEntry::new("images", generated_at).with_note(resolution.rule.as_str()),
                    );
                }
            }

            if options.documents {
                let pinned = product_override.and_then(|o| o.standard_tds_link.as_ref()).is_some();
                if let Some(removed) = self.resolve_documents(&mut product, &inputs, pinned, generated_at) {
                    pdf_links_removed += removed;
                    *stage_counts.entry("documents").or_insert(0) += 1;
                }
            }

            products.push(product);
        }
        for (stage, updated) in &stage_counts {
            info!(stage, processed = products.len(), updated, "stage complete");
        }

        let validator = Validator::new(&inputs.table, &inputs.tables);
        let match_counts = outcome.counts();
        let report = validator.validate(&products, &match_counts);
        for violation in &report.violations {
            match violation.severity {
                Severity::Hard => warn!(product_id = %violation.product_id, rule = %violation.rule, "{}", violation.message),
                Severity::Soft => info!(product_id = %violation.product_id, rule = %violation.rule, "{}", violation.message),
            }
        }
        let checked = products.len();
        let accepted = report.accepted(products);
        info!(
            stage = "validate",
            processed = checked,
            accepted = accepted.len(),
            hard = report.hard_count(),
            soft = report.soft_count(),
            fuzzy_match_ratio = report.fuzzy_match_ratio,
            "validation complete"
        );

        let metadata = CatalogMetadata {
            generated_at,
            input_fingerprint,
            total_products: accepted.len(),
            stages: options.stage_names(),
            sources: inputs.statuses.clone(),
            match_counts,
            orphaned_records: outcome.orphans.len(),
            duplicate_ids: outcome.duplicates.len(),
            pdf_links_removed,
            violations: report.counts_by_rule(),
        };

        let products_written = accepted.len();
        let document = CatalogDocument {
            metadata: metadata.clone(),
            products: accepted,
        };

        let write_outcome = if options.dry_run {
            info!(output = %output_path.display(), "dry run; catalog not written");
            None
        } else {
            let outcome = write_catalog(&output_path, &document).await?;
            info!(output = %output_path.display(), ?outcome, products = products_written, "catalog written");
            Some(outcome)
        };

        Ok(RunSummary {
            output_path,
            write_outcome,
            products_written,
            products_rejected: checked - products_written,
            report,
            orphans: outcome.orphans,
            duplicates: outcome.duplicates,
            skipped_records: std::iter::once(&inputs.authoritative)
                .chain(inputs.secondary.iter())
                .flat_map(|s| s.skipped.iter().cloned())
                .collect(),
            degraded_sources: inputs.degraded,
            metadata,
        })
    }

    /// Download remote images for products that only resolve to a placeholder.
    pub async fn fetch_images(&self) -> Result<DownloadReport> {
        let inputs = self.load_inputs(RunOptions::default())?;
        let image_source = inputs
            .registry
            .first_of_kind(SourceKind::ImageDir)
            .context("pipeline.yaml has no enabled image_dir source")?;
        let image_dir = self.config.resolve(&image_source.path);
        let available = inputs.images.as_ref().map(|l| l.entries.clone()).unwrap_or_default();

        let secondary: Vec<SourceRecord> = inputs.secondary.iter().flat_map(|s| s.records.iter().cloned()).collect();
        let outcome = RecordMatcher::new(&inputs.overrides).link(inputs.authoritative.records.clone(), secondary);

        let mut jobs = Vec::new();
        for result in &outcome.results {
            let product_id = catalog_id(&result.authoritative.raw_id);
            let remote = std::iter::once(&result.authoritative)
                .chain(result.linked.iter().map(|l| &l.record))
                .find_map(|r| r.remote_image_url.clone());
            let Some(url) = remote else {
                continue;
            };
            let resolved = resolve_image(&product_id, "", &available, &inputs.tables);
            if resolved.rule.is_fallback() {
                jobs.push(DownloadJob::for_product(&image_dir, &product_id, &url));
            }
        }
        info!(jobs = jobs.len(), dir = %image_dir.display(), "starting image downloads");

        let fetcher = Arc::new(HttpFetcher::new(self.config.http_client_config())?);
        let report = download_all(fetcher, jobs).await;
        info!(
            downloaded = report.downloaded.len(),
            skipped = report.skipped_existing.len(),
            failed = report.failed.len(),
            "image downloads complete"
        );
        Ok(report)
    }

    fn output_path(&self, registry: &SourceRegistry) -> PathBuf {
        let path = self.config.output.clone().unwrap_or_else(|| registry.output.clone());
        self.config.resolve(&path)
    }

    fn resolve_documents(
        &self,
        product: &mut ProductRecord,
        inputs: &Inputs,
        pinned: bool,
        at: DateTime<Utc>,
    ) -> Option<usize> {
        if pinned {
            let link = product.standard_tds_link.clone()?;
            let removed = product.pdf_links.len().saturating_sub(1);
            product.pdf_links = vec![link];
            product.record_change(AuditEntry::new("documents", at).with_note("override"));
            return Some(removed);
        }

        let mut candidates = product.pdf_links.clone();
        if let Some(listing) = &inputs.pdfs {
            for link in candidates_from_listing(&product.id, &listing.entries, &inputs.tables) {
                if !candidates.contains(link) {
                    candidates.push(link.clone());
                }
            }
        }
        let industry = product.industry.first().cloned().unwrap_or_default();
        let resolution = resolve_document(&product.id, &industry, &candidates, &inputs.tables)?;
        product.pdf_links = vec![resolution.link.clone()];
        product.standard_tds_link = Some(resolution.link);
        product.record_change(AuditEntry::new("documents", at).with_note(format!(
            "{}, {} removed",
            resolution.rule.as_str(),
            resolution.links_removed
        )));
        Some(resolution.links_removed)
    }

    fn load_inputs(&self, options: RunOptions) -> Result<Inputs> {
        let root = &self.config.workspace_root;
        let registry = SourceRegistry::load(root)?;
        let overrides_path = root.join("rules").join("overrides.yaml");
        let overrides = OverrideTable::load(&overrides_path)?;
        let table = ClassificationTable::load(root)?;
        let image_prefix = self
            .config
            .image_url_prefix
            .clone()
            .unwrap_or_else(|| registry.image_url_prefix.clone());
        let tables = ResolverTables::new(&image_prefix);

        let mut statuses = Vec::new();
        let mut degraded = Vec::new();
        let mut newest: Option<DateTime<Utc>> = None;

        let auth_config = registry.authoritative().ok_or(PipelineError::NoAuthoritativeSource)?;
        let authoritative = load_record_source(&registry.descriptor(auth_config, &self.config))
            .map_err(PipelineError::AuthoritativeSourceFailed)?;
        info!(
            stage = "load",
            source_id = %authoritative.descriptor.source_id,
            processed = authoritative.records.len() + authoritative.skipped.len(),
            loaded = authoritative.records.len(),
            skipped = authoritative.skipped.len(),
            "authoritative source loaded"
        );
        newest = newest.max(authoritative.modified_at);
        statuses.push(loaded_status(&authoritative));

        let mut secondary = Vec::new();
        for source in registry.secondary_record_sources() {
            match load_record_source(&registry.descriptor(source, &self.config)) {
                Ok(loaded) => {
                    info!(
                        stage = "load",
                        source_id = %source.source_id,
                        loaded = loaded.records.len(),
                        skipped = loaded.skipped.len(),
                        warnings = loaded.warnings.len(),
                        "source loaded"
                    );
                    newest = newest.max(loaded.modified_at);
                    statuses.push(loaded_status(&loaded));
                    secondary.push(loaded);
                }
                Err(err) => {
                    warn!(source_id = %source.source_id, error = %err, "secondary source unavailable; continuing without it");
                    degraded.push(format!("{} degraded: {err}", source.source_id));
                    statuses.push(failed_status(&source.source_id, &err));
                }
            }
        }

        let images = match registry.first_of_kind(SourceKind::ImageDir) {
            Some(source) if options.images => {
                let result = list_image_dir(&registry.descriptor(source, &self.config));
                self.directory_result(result, &source.source_id, &mut statuses, &mut degraded, &mut newest)
            }
            _ => None,
        };
        let pdfs = match registry.first_of_kind(SourceKind::PdfDir) {
            Some(source) if options.documents => {
                let result = list_pdf_dir(&registry.descriptor(source, &self.config), &registry.pdf_url_prefix);
                self.directory_result(result, &source.source_id, &mut statuses, &mut degraded, &mut newest)
            }
            _ => None,
        };

        let mut rule_hashes = Vec::new();
        for path in [overrides_path, root.join("rules").join("classification.yaml"), root.join("pipeline.yaml")] {
            if let Ok(bytes) = std::fs::read(&path) {
                newest = newest.max(modified_time(&path));
                rule_hashes.push((display_name(root, &path), sha256_hex(&bytes)));
            }
        }

        Ok(Inputs {
            registry,
            overrides,
            table,
            tables,
            authoritative,
            secondary,
            images,
            pdfs,
            statuses,
            degraded,
            rule_hashes,
            newest_input: newest,
        })
    }

    fn directory_result(
        &self,
        result: std::result::Result<DirectoryListing, LoadError>,
        source_id: &str,
        statuses: &mut Vec<SourceStatus>,
        degraded: &mut Vec<String>,
        newest: &mut Option<DateTime<Utc>>,
    ) -> Option<DirectoryListing> {
        match result {
            Ok(listing) => {
                info!(stage = "load", source_id, entries = listing.entries.len(), "directory listed");
                *newest = (*newest).max(listing.modified_at);
                statuses.push(SourceStatus {
                    source_id: source_id.to_string(),
                    status: "ok".to_string(),
                    loaded: listing.entries.len(),
                    skipped: 0,
                    content_hash: Some(listing.content_hash.clone()),
                    note: None,
                });
                Some(listing)
            }
            Err(err) => {
                warn!(source_id, error = %err, "directory source unavailable; its enrichment stage is skipped");
                degraded.push(format!("{source_id} degraded: {err}"));
                statuses.push(failed_status(source_id, &err));
                None
            }
        }
    }
}

fn log_match(outcome: &MatchOutcome) {
    for orphan in &outcome.orphans {
        warn!(source_id = %orphan.source_id, raw_id = %orphan.raw_id, reason = %orphan.reason, "orphaned source record");
    }
    for dup in &outcome.duplicates {
        warn!(raw_id = %dup.raw_id, kept = %dup.kept_id, "duplicate authoritative id collapsed");
    }
    let linked: usize = outcome.results.iter().map(|r| r.linked.len()).sum();
    info!(
        stage = "match",
        processed = outcome.results.len(),
        linked,
        skipped = outcome.orphans.len() + outcome.duplicates.len(),
        fuzzy_ratio = outcome.fuzzy_ratio(),
        "matching complete"
    );
}

fn loaded_status(source: &LoadedSource) -> SourceStatus {
    SourceStatus {
        source_id: source.descriptor.source_id.clone(),
        status: "ok".to_string(),
        loaded: source.records.len(),
        skipped: source.skipped.len(),
        content_hash: Some(source.content_hash.clone()),
        note: (!source.warnings.is_empty()).then(|| format!("{} coerced fields", source.warnings.len())),
    }
}

fn failed_status(source_id: &str, err: &LoadError) -> SourceStatus {
    let status = match err {
        LoadError::SourceUnavailable { .. } => "unavailable",
        LoadError::SourceMalformed { .. } => "malformed",
    };
    SourceStatus {
        source_id: source_id.to_string(),
        status: status.to_string(),
        loaded: 0,
        skipped: 0,
        content_hash: None,
        note: Some(err.to_string()),
    }
}

fn fingerprint(inputs: &Inputs, options: &RunOptions) -> String {
    let mut lines: Vec<String> = inputs
        .statuses
        .iter()
        .map(|s| format!("{}:{}:{}", s.source_id, s.status, s.content_hash.as_deref().unwrap_or("-")))
        .collect();
    lines.extend(inputs.rule_hashes.iter().map(|(name, hash)| format!("{name}:{hash}")));
    lines.push(format!("stages:{}", options.stage_names().join(",")));
    sha256_hex(lines.join("\n").as_bytes())
}

fn modified_time(path: &Path) -> Option<DateTime<Utc>> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

fn display_name(root: &Path, path: &Path) -> String {
    path.strip_prefix(root).unwrap_or(path).display().to_string()
}
