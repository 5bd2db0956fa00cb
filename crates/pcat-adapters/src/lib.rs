//! Source Loader: adapters that turn each raw upstream source into `SourceRecord`s
//! or directory listings, enforcing one schema at the load boundary.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use globwalk::GlobWalkerBuilder;
use once_cell::sync::Lazy;
use pcat_core::{clean_list_item, meaningful, Confidence, SourceKind, SourceRecord};
use regex::Regex;
use scraper::Html;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;
use tracing::warn;

pub const CRATE_NAME: &str = "pcat-adapters";

/// Where a source lives and how to read it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub source_id: String,
    pub kind: SourceKind,
    pub path: PathBuf,
}

impl SourceDescriptor {
    pub fn new(source_id: impl Into<String>, kind: SourceKind, path: impl Into<PathBuf>) -> Self {
        Self {
            source_id: source_id.into(),
            kind,
            path: path.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("source {source_id} unavailable: {path} not found")]
    SourceUnavailable { source_id: String, path: PathBuf },
    #[error("source {source_id} malformed ({path}): {reason}")]
    SourceMalformed {
        source_id: String,
        path: PathBuf,
        reason: String,
    },
}

impl LoadError {
    pub fn source_id(&self) -> &str {
        match self {
            LoadError::SourceUnavailable { source_id, .. } => source_id,
            LoadError::SourceMalformed { source_id, .. } => source_id,
        }
    }
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("record is not a JSON object")]
    NotAnObject,
    #[error("missing identifier (looked for {0})")]
    MissingId(String),
    #[error("{0}")]
    Message(String),
}

/// A single record that could not be read; the rest of the source still loads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRecord {
    pub source_id: String,
    pub index: usize,
    pub reason: String,
}

/// A record source after loading.
#[derive(Debug, Clone)]
pub struct LoadedSource {
    pub descriptor: SourceDescriptor,
    pub records: Vec<SourceRecord>,
    pub skipped: Vec<SkippedRecord>,
    /// Recoverable oddities (coerced fields) worth reporting.
    pub warnings: Vec<String>,
    pub content_hash: String,
    pub modified_at: Option<DateTime<Utc>>,
}

/// A directory source after listing. `entries` are file names for image
/// directories and web paths (`<url_prefix>/<relative path>`) for PDF trees.
#[derive(Debug, Clone)]
pub struct DirectoryListing {
    pub descriptor: SourceDescriptor,
    pub entries: BTreeSet<String>,
    pub content_hash: String,
    pub modified_at: Option<DateTime<Utc>>,
}

/// Per-kind record parser. The loader owns I/O and the top-level shape;
/// adapters only see one JSON object at a time.
pub trait RecordAdapter: Send + Sync {
    fn kind(&self) -> SourceKind;

    fn parse_record(
        &self,
        source_id: &str,
        index: usize,
        object: &Map<String, JsonValue>,
        warnings: &mut Vec<String>,
    ) -> Result<SourceRecord, AdapterError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CuratedAdapter;

#[derive(Debug, Clone, Copy, Default)]
pub struct ScrapedAdapter;

#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyTdsAdapter;

pub fn adapter_for_kind(kind: SourceKind) -> Option<Box<dyn RecordAdapter>> {
    match kind {
        SourceKind::Curated => Some(Box::new(CuratedAdapter)),
        SourceKind::Scraped => Some(Box::new(ScrapedAdapter)),
        SourceKind::LegacyTds => Some(Box::new(LegacyTdsAdapter)),
        SourceKind::ImageDir | SourceKind::PdfDir => None,
    }
}

/// Load a JSON record source. The file must hold an array of objects, or an
/// object whose `products` field is such an array.
pub fn load_record_source(descriptor: &SourceDescriptor) -> Result<LoadedSource, LoadError> {
    let adapter = adapter_for_kind(descriptor.kind).ok_or_else(|| LoadError::SourceMalformed {
        source_id: descriptor.source_id.clone(),
        path: descriptor.path.clone(),
        reason: format!("{:?} is not a record source", descriptor.kind),
    })?;

    let bytes = read_source_bytes(descriptor)?;
    let modified_at = modified_time(&descriptor.path);
    let value: JsonValue = serde_json::from_slice(&bytes).map_err(|e| malformed(descriptor, format!("invalid JSON: {e}")))?;

    let items = match &value {
        JsonValue::Array(items) => items,
        JsonValue::Object(obj) => match obj.get("products") {
            Some(JsonValue::Array(items)) => items,
            Some(_) => return Err(malformed(descriptor, "`products` is not an array")),
            None => return Err(malformed(descriptor, "expected an array of records or an object with `products`")),
        },
        _ => return Err(malformed(descriptor, "expected an array of records")),
    };

    let mut records = Vec::with_capacity(items.len());
    let mut skipped = Vec::new();
    let mut warnings = Vec::new();

    for (index, item) in items.iter().enumerate() {
        let parsed = match item.as_object() {
            Some(object) => adapter.parse_record(&descriptor.source_id, index, object, &mut warnings),
            None => Err(AdapterError::NotAnObject),
        };
        match parsed {
            Ok(record) => records.push(record),
            Err(err) => {
                warn!(source_id = %descriptor.source_id, index, error = %err, "skipping malformed record");
                skipped.push(SkippedRecord {
                    source_id: descriptor.source_id.clone(),
                    index,
                    reason: err.to_string(),
                });
            }
        }
    }

    Ok(LoadedSource {
        descriptor: descriptor.clone(),
        records,
        skipped,
        warnings,
        content_hash: pcat_storage::sha256_hex(&bytes),
        modified_at,
    })
}

/// List image files (png/jpg/jpeg/webp) directly inside the image directory.
pub fn list_image_dir(descriptor: &SourceDescriptor) -> Result<DirectoryListing, LoadError> {
    let dir = &descriptor.path;
    if !dir.is_dir() {
        return Err(LoadError::SourceUnavailable {
            source_id: descriptor.source_id.clone(),
            path: dir.clone(),
        });
    }
    let read = fs::read_dir(dir).map_err(|e| malformed(descriptor, format!("reading directory: {e}")))?;

    let mut entries = BTreeSet::new();
    let mut newest: Option<DateTime<Utc>> = None;
    for entry in read.filter_map(|e| e.ok()) {
        let path = entry.path();
        if !path.is_file() || !is_image_file(&path) {
            continue;
        }
        newest = newest.max(modified_time(&path));
        entries.insert(entry.file_name().to_string_lossy().to_string());
    }

    Ok(DirectoryListing {
        descriptor: descriptor.clone(),
        content_hash: listing_hash(&entries),
        entries,
        modified_at: newest,
    })
}

/// Recursively list PDFs under the document tree as web paths.
pub fn list_pdf_dir(descriptor: &SourceDescriptor, url_prefix: &str) -> Result<DirectoryListing, LoadError> {
    let root = &descriptor.path;
    if !root.is_dir() {
        return Err(LoadError::SourceUnavailable {
            source_id: descriptor.source_id.clone(),
            path: root.clone(),
        });
    }
    let walker = GlobWalkerBuilder::from_patterns(root, &["**/*.pdf"])
        .case_insensitive(true)
        .follow_links(false)
        .build()
        .map_err(|e| malformed(descriptor, format!("walking document tree: {e}")))?;

    let prefix = url_prefix.trim_end_matches('/');
    let mut entries = BTreeSet::new();
    let mut newest: Option<DateTime<Utc>> = None;
    for entry in walker.filter_map(|e| e.ok()) {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect::<Vec<_>>()
            .join("/");
        newest = newest.max(modified_time(path));
        entries.insert(format!("{prefix}/{relative}"));
    }

    Ok(DirectoryListing {
        descriptor: descriptor.clone(),
        content_hash: listing_hash(&entries),
        entries,
        modified_at: newest,
    })
}

fn read_source_bytes(descriptor: &SourceDescriptor) -> Result<Vec<u8>, LoadError> {
    match fs::read(&descriptor.path) {
        Ok(bytes) => Ok(bytes),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(LoadError::SourceUnavailable {
            source_id: descriptor.source_id.clone(),
            path: descriptor.path.clone(),
        }),
        Err(err) => Err(malformed(descriptor, format!("reading file: {err}"))),
    }
}

fn malformed(descriptor: &SourceDescriptor, reason: impl Into<String>) -> LoadError {
    LoadError::SourceMalformed {
        source_id: descriptor.source_id.clone(),
        path: descriptor.path.clone(),
        reason: reason.into(),
    }
}

fn modified_time(path: &Path) -> Option<DateTime<Utc>> {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

fn listing_hash(entries: &BTreeSet<String>) -> String {
    let joined = entries.iter().map(String::as_str).collect::<Vec<_>>().join("\n");
    pcat_storage::sha256_hex(joined.as_bytes())
}

pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg" | "webp"))
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// JSON field coercion
// ---------------------------------------------------------------------------

fn first_value<'a>(object: &'a Map<String, JsonValue>, keys: &[&str]) -> Option<&'a JsonValue> {
    keys.iter().find_map(|k| object.get(*k)).filter(|v| !v.is_null())
}

fn scalar_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn text_field(object: &Map<String, JsonValue>, keys: &[&str]) -> Option<String> {
    first_value(object, keys)
        .and_then(scalar_text)
        .and_then(|s| meaningful(Some(&s)))
}

/// Lists arrive as arrays, bullet/newline strings, or a single scalar.
fn list_field(object: &Map<String, JsonValue>, keys: &[&str]) -> Vec<String> {
    match first_value(object, keys) {
        Some(JsonValue::Array(items)) => items
            .iter()
            .filter_map(scalar_text)
            .map(|s| clean_list_item(&s))
            .filter(|s| !s.is_empty())
            .collect(),
        Some(other) => scalar_text(other).map(|s| split_bullets(&s)).unwrap_or_default(),
        None => Vec::new(),
    }
}

/// Industry is a list of lower-case tags; a bare string is split on `,`/`;`.
fn industry_field(object: &Map<String, JsonValue>, keys: &[&str], warnings: &mut Vec<String>, context: &str) -> Vec<String> {
    let raw: Vec<String> = match first_value(object, keys) {
        Some(JsonValue::Array(items)) => items.iter().filter_map(scalar_text).collect(),
        Some(JsonValue::String(s)) => {
            warnings.push(format!("{context}: industry given as a bare string, coerced to a list"));
            s.split([',', ';']).map(ToString::to_string).collect()
        }
        Some(_) => {
            warnings.push(format!("{context}: industry has an unsupported shape, ignored"));
            Vec::new()
        }
        None => Vec::new(),
    };
    let mut out: Vec<String> = Vec::new();
    for tag in raw {
        let tag = tag.trim().to_ascii_lowercase();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

fn confidence_field(object: &Map<String, JsonValue>, keys: &[&str], warnings: &mut Vec<String>, context: &str) -> Option<Confidence> {
    let raw = first_value(object, keys).and_then(scalar_text)?;
    match Confidence::parse(&raw) {
        Some(c) => Some(c),
        None => {
            warnings.push(format!("{context}: confidence {raw:?} outside High/Medium/Low/None, dropped"));
            None
        }
    }
}

fn technical_field(object: &Map<String, JsonValue>, keys: &[&str]) -> BTreeMap<String, String> {
    let Some(JsonValue::Object(map)) = first_value(object, keys) else {
        return BTreeMap::new();
    };
    map.iter()
        .filter_map(|(k, v)| scalar_text(v).and_then(|s| meaningful(Some(&s))).map(|s| (k.clone(), s)))
        .collect()
}

/// Split a bullet/newline string into cleaned entries.
pub fn split_bullets(text: &str) -> Vec<String> {
    text.split(['\n', '\r'])
        .flat_map(|line| line.split('•'))
        .map(clean_list_item)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Visible text of an HTML fragment, whitespace collapsed.
pub fn html_to_text(input: &str) -> String {
    if !input.contains('<') {
        return input.split_whitespace().collect::<Vec<_>>().join(" ");
    }
    let fragment = Html::parse_fragment(input);
    fragment
        .root_element()
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_remote(url: &str) -> bool {
    let lower = url.trim().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn last_path_segment(url: &str) -> Option<String> {
    url.split(['?', '#'])
        .next()?
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty() && !s.contains(':'))
        .map(ToString::to_string)
}

/// Product line named by a URL path segment such as `/products/seal/os24/`.
fn category_from_url(url: &str) -> Option<String> {
    let lower = url.to_ascii_lowercase();
    ["bond", "seal", "tape"]
        .into_iter()
        .find(|line| lower.contains(&format!("/{line}/")))
        .map(|line| line.to_ascii_uppercase())
}

// ---------------------------------------------------------------------------
// Adapters
// ---------------------------------------------------------------------------

impl RecordAdapter for CuratedAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Curated
    }

    fn parse_record(
        &self,
        source_id: &str,
        index: usize,
        object: &Map<String, JsonValue>,
        warnings: &mut Vec<String>,
    ) -> Result<SourceRecord, AdapterError> {
        let raw_id = text_field(object, &["id"]).ok_or_else(|| AdapterError::MissingId("id".into()))?;
        let context = format!("{source_id}[{index}] {raw_id}");

        let mut record = SourceRecord::new(source_id, SourceKind::Curated, index, raw_id);
        record.name = text_field(object, &["name", "title"]);
        record.description = text_field(object, &["description"]);
        record.category = text_field(object, &["category", "productLine"]);
        record.industry = industry_field(object, &["industry", "industries"], warnings, &context);
        record.chemistry = text_field(object, &["chemistry"]);
        record.chemistry_confidence = confidence_field(object, &["chemistryConfidence"], warnings, &context);
        match text_field(object, &["imageUrl", "image", "mainImage"]) {
            Some(url) if is_remote(&url) => record.remote_image_url = Some(url),
            other => record.image_url = other,
        }
        record.pdf_links = list_field(object, &["pdfLinks"]);
        record.standard_tds_link = text_field(object, &["standardTdsLink", "tdsFile"]);
        record.sizes = list_field(object, &["sizes", "sizing"]);
        record.benefits = list_field(object, &["benefits"]);
        record.applications = list_field(object, &["applications"]);
        record.how_to_use = text_field(object, &["howToUse"]);
        record.technical_data = technical_field(object, &["technicalData"]);
        Ok(record)
    }
}

impl RecordAdapter for ScrapedAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Scraped
    }

    fn parse_record(
        &self,
        source_id: &str,
        index: usize,
        object: &Map<String, JsonValue>,
        warnings: &mut Vec<String>,
    ) -> Result<SourceRecord, AdapterError> {
        let url = text_field(object, &["url", "link"]);
        let raw_id = text_field(object, &["id", "slug"])
            .or_else(|| url.as_deref().and_then(last_path_segment))
            .ok_or_else(|| AdapterError::MissingId("id, slug, url".into()))?;
        let context = format!("{source_id}[{index}] {raw_id}");

        let mut record = SourceRecord::new(source_id, SourceKind::Scraped, index, raw_id);
        record.name = text_field(object, &["title", "name"]).map(|t| html_to_text(&t));
        record.description = text_field(object, &["description", "content"])
            .map(|d| html_to_text(&d))
            .filter(|d| !d.is_empty());
        record.category_hint = text_field(object, &["productLine", "category", "breadcrumb"])
            .or_else(|| url.as_deref().and_then(category_from_url));
        record.industry = industry_field(object, &["industry", "industries"], warnings, &context);

        let image = text_field(object, &["mainImage", "imageUrl", "image"]).or_else(|| {
            match first_value(object, &["images"]) {
                Some(JsonValue::Array(items)) => items.iter().find_map(scalar_text),
                _ => None,
            }
        });
        match image {
            Some(url) if is_remote(&url) => record.remote_image_url = Some(url),
            other => record.image_url = other,
        }

        record.pdf_links = list_field(object, &["pdfLinks", "tdsLinks"]);
        record.sizes = list_field(object, &["sizes"]);
        record.benefits = list_field(object, &["benefits"]);
        record.applications = list_field(object, &["applications"]);
        record.technical_data = technical_field(object, &["technicalData"]);
        Ok(record)
    }
}

impl RecordAdapter for LegacyTdsAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::LegacyTds
    }

    fn parse_record(
        &self,
        source_id: &str,
        index: usize,
        object: &Map<String, JsonValue>,
        warnings: &mut Vec<String>,
    ) -> Result<SourceRecord, AdapterError> {
        let raw_id = text_field(object, &["product_code", "code", "id"])
            .ok_or_else(|| AdapterError::MissingId("product_code, code, id".into()))?;
        let context = format!("{source_id}[{index}] {raw_id}");

        // Older exports nest the descriptive fields under `details`.
        let details = match object.get("details") {
            Some(JsonValue::Object(inner)) => inner,
            Some(JsonValue::Null) | None => object,
            Some(_) => return Err(AdapterError::Message("`details` is not an object".into())),
        };

        let mut record = SourceRecord::new(source_id, SourceKind::LegacyTds, index, raw_id);
        record.name = text_field(object, &["product_name", "name", "title"]);
        record.description = text_field(details, &["description"]);
        record.chemistry = text_field(object, &["chemistry"]);
        record.chemistry_confidence = confidence_field(object, &["chemistry_confidence", "chemistryConfidence"], warnings, &context);
        record.industry = industry_field(object, &["industry"], warnings, &context);
        record.benefits = list_field(details, &["benefits"]);
        record.applications = list_field(details, &["applications"]);
        record.sizes = list_field(details, &["sizing", "sizes"]);
        record.how_to_use = text_field(details, &["how_to_use", "howToUse"]);
        record.pdf_links = list_field(object, &["pdf_links", "pdfLinks", "tds_link"]);

        let mut technical = extract_technical_data(&format!(
            "{} {}",
            record.description.as_deref().unwrap_or_default(),
            record.benefits.join(" ")
        ));
        // Explicit values beat extracted ones.
        technical.extend(technical_field(details, &["technical_data", "technicalData"]));
        technical.extend(technical_field(object, &["technical_data", "technicalData"]));
        record.technical_data = technical;
        Ok(record)
    }
}

// ---------------------------------------------------------------------------
// Legacy technical-data extraction
// ---------------------------------------------------------------------------

static SHELF_LIFE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s*(months?|years?)").expect("shelf life regex"));
static SOLIDS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+(?:-\d+)?%)").expect("solids regex"));
static APPEARANCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(amber|clear|white|black)\b").expect("appearance regex"));

/// Pull well-known technical properties out of free text.
pub fn extract_technical_data(text: &str) -> BTreeMap<String, String> {
    let lower = text.to_ascii_lowercase();
    let mut out = BTreeMap::new();

    if let Some(m) = APPEARANCE.captures(&lower).and_then(|c| c.get(1)) {
        let word = m.as_str();
        let mut chars = word.chars();
        let capitalized = match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
            None => String::new(),
        };
        out.insert("appearance".to_string(), capitalized);
    }
    if let Some(c) = SHELF_LIFE.captures(&lower) {
        out.insert("shelfLife".to_string(), format!("{} {}", &c[1], &c[2]));
    }
    if lower.contains("non-flammable") || lower.contains("nonflammable") {
        out.insert("solvent".to_string(), "Non-Flammable".to_string());
    } else if lower.contains("flammable") {
        out.insert("solvent".to_string(), "Flammable".to_string());
    }
    if lower.contains("voc free") || lower.contains("0 g/l") {
        out.insert("voc".to_string(), "0 g/L".to_string());
    }
    if let Some(c) = SOLIDS.captures(&lower) {
        out.insert("solids".to_string(), c[1].to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn workspace_root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .canonicalize()
            .expect("workspace root")
    }

    fn fixture(name: &str) -> PathBuf {
        workspace_root().join("fixtures").join("sample").join(name)
    }

    fn object(value: JsonValue) -> Map<String, JsonValue> {
        value.as_object().cloned().expect("object")
    }

    #[test]
    fn curated_fixture_loads_and_skips_bad_records() {
        let desc = SourceDescriptor::new("curated", SourceKind::Curated, fixture("curated.json"));
        let loaded = load_record_source(&desc).unwrap();
        assert!(loaded.records.iter().any(|r| r.raw_id == "c331"));
        assert!(loaded.records.iter().all(|r| r.kind == SourceKind::Curated));
        assert_eq!(loaded.skipped.len(), 1, "fixture carries one record without an id");
        assert_eq!(loaded.content_hash.len(), 64);
    }

    #[test]
    fn scraped_and_legacy_fixtures_load() {
        let scraped = load_record_source(&SourceDescriptor::new("scraped", SourceKind::Scraped, fixture("scraped.json"))).unwrap();
        assert!(!scraped.records.is_empty());
        assert!(scraped.skipped.is_empty());
        let legacy = load_record_source(&SourceDescriptor::new("legacy", SourceKind::LegacyTds, fixture("legacy_tds.json"))).unwrap();
        let c331 = legacy.records.iter().find(|r| r.raw_id == "C-331").expect("C-331 in legacy fixture");
        assert!(!c331.benefits.is_empty());
    }

    #[test]
    fn missing_file_is_unavailable() {
        let desc = SourceDescriptor::new("scraped", SourceKind::Scraped, "/definitely/not/here.json");
        let err = load_record_source(&desc).unwrap_err();
        assert!(matches!(err, LoadError::SourceUnavailable { .. }));
        assert_eq!(err.source_id(), "scraped");
    }

    #[test]
    fn scalar_top_level_is_malformed_not_a_syntax_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("curated.json");
        fs::write(&path, r#"{"products": "c331"}"#).unwrap();
        let err = load_record_source(&SourceDescriptor::new("curated", SourceKind::Curated, &path)).unwrap_err();
        match err {
            LoadError::SourceMalformed { reason, .. } => assert!(reason.contains("not an array")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn products_wrapper_object_is_accepted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("curated.json");
        fs::write(&path, r#"{"metadata": {}, "products": [{"id": "t461", "industry": "marine"}, 42]}"#).unwrap();
        let loaded = load_record_source(&SourceDescriptor::new("curated", SourceKind::Curated, &path)).unwrap();
        assert_eq!(loaded.records.len(), 1);
        assert_eq!(loaded.records[0].industry, vec!["marine".to_string()]);
        assert_eq!(loaded.skipped.len(), 1);
        assert!(loaded.warnings.iter().any(|w| w.contains("bare string")));
    }

    #[test]
    fn curated_record_coerces_shapes_and_placeholders() {
        let mut warnings = Vec::new();
        let record = CuratedAdapter
            .parse_record(
                "curated",
                3,
                &object(json!({
                    "id": "OS24",
                    "name": "OS24 Sealant",
                    "description": "undefined",
                    "industry": ["Marine", "marine", "Construction"],
                    "chemistryConfidence": "Very High",
                    "imageUrl": "https://cdn.example.com/os24.png",
                    "benefits": "• Paintable\n• Low VOC",
                    "technicalData": {"shelfLife": "12 months", "viscosity": ""}
                })),
                &mut warnings,
            )
            .unwrap();
        assert_eq!(record.index, 3);
        assert_eq!(record.description, None);
        assert_eq!(record.industry, vec!["marine".to_string(), "construction".to_string()]);
        assert_eq!(record.chemistry_confidence, None);
        assert_eq!(record.image_url, None);
        assert_eq!(record.remote_image_url.as_deref(), Some("https://cdn.example.com/os24.png"));
        assert_eq!(record.benefits, vec!["Paintable".to_string(), "Low VOC".to_string()]);
        assert_eq!(record.technical_data.len(), 1);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn scraped_record_derives_id_and_hint_from_url_and_strips_html() {
        let mut warnings = Vec::new();
        let record = ScrapedAdapter
            .parse_record(
                "scraped",
                0,
                &object(json!({
                    "url": "https://example.com/products/seal/os-24/",
                    "title": "OS24",
                    "description": "<p>High <strong>strength</strong> sealant</p>",
                    "images": ["https://example.com/os24.jpg"]
                })),
                &mut warnings,
            )
            .unwrap();
        assert_eq!(record.raw_id, "os-24");
        assert_eq!(record.category_hint.as_deref(), Some("SEAL"));
        assert_eq!(record.description.as_deref(), Some("High strength sealant"));
        assert_eq!(record.remote_image_url.as_deref(), Some("https://example.com/os24.jpg"));
    }

    #[test]
    fn legacy_record_reads_nested_details_and_extracts_technical_data() {
        let mut warnings = Vec::new();
        let record = LegacyTdsAdapter
            .parse_record(
                "legacy",
                0,
                &object(json!({
                    "product_code": "C-331",
                    "details": {
                        "description": "Clear, non-flammable contact adhesive. VOC free. Shelf life 12 months, 45% solids.",
                        "benefits": "• Fast cure\n- Fast cure\n* High strength",
                        "sizing": "• 1 gal\n• 5 gal",
                        "how_to_use": "Spray both surfaces."
                    },
                    "technical_data": {"appearance": "Amber"}
                })),
                &mut warnings,
            )
            .unwrap();
        assert_eq!(record.raw_id, "C-331");
        assert_eq!(record.sizes, vec!["1 gal".to_string(), "5 gal".to_string()]);
        assert_eq!(record.benefits.len(), 3, "dedup happens in the merge, not the loader");
        assert_eq!(record.how_to_use.as_deref(), Some("Spray both surfaces."));
        assert_eq!(record.technical_data.get("appearance").map(String::as_str), Some("Amber"));
        assert_eq!(record.technical_data.get("solvent").map(String::as_str), Some("Non-Flammable"));
        assert_eq!(record.technical_data.get("voc").map(String::as_str), Some("0 g/L"));
        assert_eq!(record.technical_data.get("shelfLife").map(String::as_str), Some("12 months"));
        assert_eq!(record.technical_data.get("solids").map(String::as_str), Some("45%"));
    }

    #[test]
    fn record_without_id_is_rejected() {
        let mut warnings = Vec::new();
        let err = LegacyTdsAdapter
            .parse_record("legacy", 0, &object(json!({"description": "orphan"})), &mut warnings)
            .unwrap_err();
        assert!(matches!(err, AdapterError::MissingId(_)));
    }

    #[test]
    fn directory_listings_are_sorted_and_filtered() {
        let dir = tempdir().unwrap();
        let images = dir.path().join("product-images");
        fs::create_dir_all(&images).unwrap();
        for name in ["os24.png", "c331.JPG", "notes.txt"] {
            fs::write(images.join(name), b"x").unwrap();
        }
        let listing = list_image_dir(&SourceDescriptor::new("images", SourceKind::ImageDir, &images)).unwrap();
        assert_eq!(listing.entries.iter().cloned().collect::<Vec<_>>(), vec!["c331.JPG", "os24.png"]);

        let tds = dir.path().join("TDS");
        let folder = tds.join("1. Industrial").join("C-331").join("TDS");
        fs::create_dir_all(&folder).unwrap();
        fs::write(folder.join("C-331 FOR EMAIL.pdf"), b"%PDF").unwrap();
        fs::write(folder.join("C-331.PDF"), b"%PDF").unwrap();
        let pdfs = list_pdf_dir(&SourceDescriptor::new("tds", SourceKind::PdfDir, &tds), "/TDS/").unwrap();
        assert!(pdfs.entries.contains("/TDS/1. Industrial/C-331/TDS/C-331 FOR EMAIL.pdf"));
        assert_eq!(pdfs.entries.len(), 2);
    }

    #[test]
    fn missing_directory_is_unavailable() {
        let desc = SourceDescriptor::new("images", SourceKind::ImageDir, "/no/such/images");
        assert!(matches!(list_image_dir(&desc), Err(LoadError::SourceUnavailable { .. })));
    }
}
