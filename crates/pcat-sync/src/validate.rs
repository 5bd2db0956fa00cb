//! Validator: structural checks over the merged catalog. Never fails; every
//! finding becomes a violation in the report.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use pcat_core::{Confidence, MatchStrength, ProductLine, ProductRecord, TAPE_CHEMISTRY, UNKNOWN_CHEMISTRY};
use serde::Serialize;
use strsim::jaro_winkler;

use crate::classify::ClassificationTable;
use crate::config::ResolverTables;

/// Image stems scoring below this against the product id are flagged.
pub const IMAGE_SIMILARITY_THRESHOLD: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// The record is left out of the written catalog.
    Hard,
    /// Reported only.
    Soft,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationViolation {
    pub product_id: String,
    pub rule: String,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub checked: usize,
    pub violations: Vec<ValidationViolation>,
    pub fuzzy_match_ratio: f64,
    /// Positions (in the checked catalog) of records with a hard violation.
    #[serde(skip)]
    pub rejected: BTreeSet<usize>,
}

impl ValidationReport {
    pub fn hard_count(&self) -> usize {
        self.violations.iter().filter(|v| v.severity == Severity::Hard).count()
    }

    pub fn soft_count(&self) -> usize {
        self.violations.iter().filter(|v| v.severity == Severity::Soft).count()
    }

    pub fn counts_by_rule(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for v in &self.violations {
            *counts.entry(v.rule.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Records without hard violations, in catalog order.
    pub fn accepted(&self, catalog: Vec<ProductRecord>) -> Vec<ProductRecord> {
        catalog
            .into_iter()
            .enumerate()
            .filter(|(i, _)| !self.rejected.contains(i))
            .map(|(_, p)| p)
            .collect()
    }

    pub fn push(&mut self, position: Option<usize>, product_id: &str, rule: &str, severity: Severity, message: impl Into<String>) {
        if severity == Severity::Hard {
            if let Some(position) = position {
                self.rejected.insert(position);
            }
        }
        self.violations.push(ValidationViolation {
            product_id: product_id.to_string(),
            rule: rule.to_string(),
            severity,
            message: message.into(),
        });
    }
}

pub struct Validator<'a> {
    table: &'a ClassificationTable,
    tables: &'a ResolverTables,
}

impl<'a> Validator<'a> {
    pub fn new(table: &'a ClassificationTable, tables: &'a ResolverTables) -> Self {
        Self { table, tables }
    }

    pub fn validate(&self, catalog: &[ProductRecord], match_counts: &BTreeMap<MatchStrength, usize>) -> ValidationReport {
        let mut report = ValidationReport {
            checked: catalog.len(),
            fuzzy_match_ratio: fuzzy_ratio(match_counts),
            ..Default::default()
        };
        let mut seen: HashSet<&str> = HashSet::new();

        for (position, product) in catalog.iter().enumerate() {
            let at = Some(position);
            let id = product.id.as_str();

            if id.trim().is_empty() {
                report.push(at, id, "missing-id", Severity::Hard, "record has no id");
            } else if id != id.to_lowercase() {
                report.push(at, id, "id-case", Severity::Hard, "id must be lower-case");
            } else if !seen.insert(id) {
                report.push(at, id, "duplicate-id", Severity::Hard, "id already used by an earlier record");
            }

            match product.category {
                None => report.push(at, id, "invalid-category", Severity::Hard, "category is not one of BOND, SEAL, TAPE"),
                Some(ProductLine::Tape) if product.chemistry != TAPE_CHEMISTRY => report.push(
                    at,
                    id,
                    "tape-chemistry",
                    Severity::Hard,
                    format!("TAPE product has chemistry {:?}", product.chemistry),
                ),
                Some(_) => {}
            }

            if product.industry.is_empty() || product.industry.iter().any(|t| t.trim().is_empty()) {
                report.push(at, id, "industry-shape", Severity::Hard, "industry must be a non-empty list of tags");
            }

            if product.name.trim().is_empty() {
                report.push(at, id, "missing-name", Severity::Soft, "name is empty");
            }

            let unknown = product.chemistry == UNKNOWN_CHEMISTRY;
            if unknown != (product.chemistry_confidence == Confidence::None) {
                report.push(
                    at,
                    id,
                    "confidence-mismatch",
                    Severity::Soft,
                    format!("chemistry {:?} with confidence {}", product.chemistry, product.chemistry_confidence),
                );
            }
            if !self.table.is_in_vocabulary(&product.chemistry) {
                report.push(at, id, "chemistry-vocabulary", Severity::Soft, format!("{:?} is not a known chemistry", product.chemistry));
            }

            self.check_image(&mut report, at, product);

            if product.standard_tds_link.is_none() {
                report.push(at, id, "missing-tds", Severity::Soft, "no technical data sheet link");
            } else if product.pdf_links.len() > 1 {
                report.push(at, id, "multiple-pdf-links", Severity::Soft, format!("{} pdf links kept", product.pdf_links.len()));
            }
        }
        report
    }

    fn check_image(&self, report: &mut ValidationReport, at: Option<usize>, product: &ProductRecord) {
        if product.image_url.trim().is_empty() {
            report.push(at, &product.id, "missing-image", Severity::Soft, "no image assigned");
            return;
        }
        if self.tables.is_fallback_image(&product.image_url) {
            return;
        }
        let stem = image_stem(&product.image_url);
        let score = jaro_winkler(&product.id, &stem);
        if score < IMAGE_SIMILARITY_THRESHOLD {
            report.push(
                at,
                &product.id,
                "image-similarity",
                Severity::Soft,
                format!("image {:?} matches id at {:.2}", product.image_url, score),
            );
        }
    }
}

fn image_stem(url: &str) -> String {
    let file = url.rsplit('/').next().unwrap_or(url);
    let stem = file.rsplit_once('.').map(|(s, _)| s).unwrap_or(file);
    stem.to_lowercase()
}

/// Fuzzy links over all links; products with no link are not counted.
pub fn fuzzy_ratio(counts: &BTreeMap<MatchStrength, usize>) -> f64 {
    let linked: usize = counts
        .iter()
        .filter(|(s, _)| **s != MatchStrength::Unmatched)
        .map(|(_, n)| *n)
        .sum();
    if linked == 0 {
        return 0.0;
    }
    counts.get(&MatchStrength::Fuzzy).copied().unwrap_or(0) as f64 / linked as f64
}
