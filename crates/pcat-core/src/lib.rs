//! Core catalog model and provenance types shared by the PCAT crates.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "pcat-core";

/// Chemistry family every tape product belongs to.
pub const TAPE_CHEMISTRY: &str = "Acrylic (incl. PSA)";

/// Chemistry label used when no rule produced a classification.
pub const UNKNOWN_CHEMISTRY: &str = "Unknown";

/// Industry tag assigned when no source supplies one.
pub const DEFAULT_INDUSTRY: &str = "industrial";

/// Top-level product line of the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProductLine {
    Bond,
    Seal,
    Tape,
}

impl ProductLine {
    pub const ALL: [ProductLine; 3] = [ProductLine::Bond, ProductLine::Seal, ProductLine::Tape];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProductLine::Bond => "BOND",
            ProductLine::Seal => "SEAL",
            ProductLine::Tape => "TAPE",
        }
    }

    /// Accepts the spellings found across sources ("bond", "Adhesive", "sealant",
    /// "TAPE") and the RuggedRed brand, which only sells tape.
    pub fn parse_loose(raw: &str) -> Option<Self> {
        let lower = raw.trim().to_ascii_lowercase();
        if lower.is_empty() {
            return None;
        }
        if lower == "bond" || lower.contains("adhesive") || lower.starts_with("bond") {
            Some(ProductLine::Bond)
        } else if lower.contains("seal") {
            Some(ProductLine::Seal)
        } else if lower.contains("tape") || lower.contains("ruggedred") {
            Some(ProductLine::Tape)
        } else {
            None
        }
    }
}

impl fmt::Display for ProductLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a chemistry label was derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum Confidence {
    High,
    Medium,
    Low,
    #[default]
    None,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "High",
            Confidence::Medium => "Medium",
            Confidence::Low => "Low",
            Confidence::None => "None",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "high" => Some(Confidence::High),
            "medium" => Some(Confidence::Medium),
            "low" => Some(Confidence::Low),
            "none" => Some(Confidence::None),
            _ => None,
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strength of a cross-source identity link, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStrength {
    Exact,
    Normalized,
    Fuzzy,
    Unmatched,
}

impl MatchStrength {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStrength::Exact => "exact",
            MatchStrength::Normalized => "normalized",
            MatchStrength::Fuzzy => "fuzzy",
            MatchStrength::Unmatched => "unmatched",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Curated,
    Scraped,
    LegacyTds,
    ImageDir,
    PdfDir,
}

impl SourceKind {
    pub fn is_record_source(&self) -> bool {
        matches!(self, SourceKind::Curated | SourceKind::Scraped | SourceKind::LegacyTds)
    }
}

/// One step of a record's audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub stage: String,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl AuditEntry {
    pub fn new(stage: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            stage: stage.into(),
            at,
            note: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RecordMetadata {
    #[serde(default)]
    pub changes: Vec<AuditEntry>,
}

/// Raw classification inputs carried from the merge into the classifier.
/// Never serialized; the catalog only stores resolved values.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClassificationHints {
    pub declared_category: Option<String>,
    pub category_hint: Option<String>,
    /// Every meaningful chemistry the sources declared, in merge precedence order.
    pub declared_chemistries: Vec<DeclaredChemistry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredChemistry {
    pub source_id: String,
    pub value: String,
    pub confidence: Option<Confidence>,
}

/// Canonical merged catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRecord {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: Option<ProductLine>,
    pub industry: Vec<String>,
    pub chemistry: String,
    pub chemistry_confidence: Confidence,
    pub image_url: String,
    pub pdf_links: Vec<String>,
    pub standard_tds_link: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sizes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub benefits: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub applications: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub how_to_use: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub technical_data: BTreeMap<String, String>,
    #[serde(default)]
    pub metadata: RecordMetadata,
    #[serde(skip)]
    pub hints: ClassificationHints,
}

impl ProductRecord {
    /// Empty record for `id`; every field starts absent.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            description: String::new(),
            category: None,
            industry: Vec::new(),
            chemistry: UNKNOWN_CHEMISTRY.to_string(),
            chemistry_confidence: Confidence::None,
            image_url: String::new(),
            pdf_links: Vec::new(),
            standard_tds_link: None,
            sizes: Vec::new(),
            benefits: Vec::new(),
            applications: Vec::new(),
            how_to_use: None,
            technical_data: BTreeMap::new(),
            metadata: RecordMetadata::default(),
            hints: ClassificationHints::default(),
        }
    }

    pub fn record_change(&mut self, entry: AuditEntry) {
        self.metadata.changes.push(entry);
    }
}

/// A product as one upstream source describes it. Every field may be absent
/// (`None` / empty collection) and `raw_id` follows the source's own convention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub source_id: String,
    pub kind: SourceKind,
    /// Position within the source file; drives stable output ordering.
    pub index: usize,
    pub raw_id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub category_hint: Option<String>,
    pub industry: Vec<String>,
    pub chemistry: Option<String>,
    pub chemistry_confidence: Option<Confidence>,
    pub image_url: Option<String>,
    pub remote_image_url: Option<String>,
    pub pdf_links: Vec<String>,
    pub standard_tds_link: Option<String>,
    pub sizes: Vec<String>,
    pub benefits: Vec<String>,
    pub applications: Vec<String>,
    pub how_to_use: Option<String>,
    pub technical_data: BTreeMap<String, String>,
}

impl SourceRecord {
    pub fn new(source_id: impl Into<String>, kind: SourceKind, index: usize, raw_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            kind,
            index,
            raw_id: raw_id.into(),
            name: None,
            description: None,
            category: None,
            category_hint: None,
            industry: Vec::new(),
            chemistry: None,
            chemistry_confidence: None,
            image_url: None,
            remote_image_url: None,
            pdf_links: Vec::new(),
            standard_tds_link: None,
            sizes: Vec::new(),
            benefits: Vec::new(),
            applications: Vec::new(),
            how_to_use: None,
            technical_data: BTreeMap::new(),
        }
    }
}

/// A secondary record linked to an authoritative id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedRecord {
    pub strength: MatchStrength,
    pub record: SourceRecord,
}

/// Pairing of one authoritative id with the secondary records that describe it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub canonical_key: String,
    pub authoritative: SourceRecord,
    pub linked: Vec<LinkedRecord>,
}

impl MatchResult {
    /// Weakest link strength, or `Unmatched` when nothing linked.
    pub fn match_strength(&self) -> MatchStrength {
        self.linked
            .iter()
            .map(|l| l.strength)
            .max()
            .unwrap_or(MatchStrength::Unmatched)
    }

    pub fn linked_from<'a>(&'a self, source_id: &'a str) -> impl Iterator<Item = &'a LinkedRecord> + 'a {
        self.linked.iter().filter(move |l| l.record.source_id == source_id)
    }
}

/// True for values that carry no information ("", "Unknown", "undefined", "N/A", ...).
pub fn is_blank_or_placeholder(value: &str) -> bool {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return true;
    }
    matches!(
        trimmed.to_ascii_lowercase().as_str(),
        "unknown" | "undefined" | "null" | "none" | "n/a" | "na" | "tbd" | "-"
    )
}

/// Strip bullet markers and collapse whitespace in one list entry.
pub fn clean_list_item(raw: &str) -> String {
    raw.trim()
        .trim_start_matches(['•', '·', '-', '*', '–'])
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// `Some(trimmed)` unless the value is blank or a placeholder.
pub fn meaningful(value: Option<&str>) -> Option<String> {
    value
        .filter(|v| !is_blank_or_placeholder(v))
        .map(|v| v.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_line_parses_source_spellings() {
        assert_eq!(ProductLine::parse_loose("BOND"), Some(ProductLine::Bond));
        assert_eq!(ProductLine::parse_loose("Adhesives"), Some(ProductLine::Bond));
        assert_eq!(ProductLine::parse_loose("sealant"), Some(ProductLine::Seal));
        assert_eq!(ProductLine::parse_loose(" tape "), Some(ProductLine::Tape));
        assert_eq!(ProductLine::parse_loose("RuggedRed"), Some(ProductLine::Tape));
        assert_eq!(ProductLine::parse_loose("GLUE"), None);
        assert_eq!(ProductLine::parse_loose(""), None);
    }

    #[test]
    fn product_line_serializes_upper_case() {
        let json = serde_json::to_string(&ProductLine::Tape).unwrap();
        assert_eq!(json, "\"TAPE\"");
    }

    #[test]
    fn weakest_link_defines_match_strength() {
        let auth = SourceRecord::new("curated", SourceKind::Curated, 0, "c331");
        let mut result = MatchResult {
            canonical_key: "c331".into(),
            authoritative: auth.clone(),
            linked: vec![],
        };
        assert_eq!(result.match_strength(), MatchStrength::Unmatched);
        result.linked.push(LinkedRecord { strength: MatchStrength::Exact, record: auth.clone() });
        result.linked.push(LinkedRecord { strength: MatchStrength::Fuzzy, record: auth });
        assert_eq!(result.match_strength(), MatchStrength::Fuzzy);
    }

    #[test]
    fn placeholders_are_not_meaningful() {
        assert!(is_blank_or_placeholder("  "));
        assert!(is_blank_or_placeholder("Unknown"));
        assert!(is_blank_or_placeholder("undefined"));
        assert!(!is_blank_or_placeholder("Fast cure"));
        assert_eq!(meaningful(Some(" Epoxy ")), Some("Epoxy".to_string()));
        assert_eq!(meaningful(Some("N/A")), None);
    }

    #[test]
    fn list_items_lose_bullets_and_extra_spaces() {
        assert_eq!(clean_list_item("  •  Fast   cure "), "Fast cure");
        assert_eq!(clean_list_item("- Low VOC"), "Low VOC");
        assert_eq!(clean_list_item("Non-sag"), "Non-sag");
    }
}
