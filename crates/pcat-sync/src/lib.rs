//! Catalog reconciliation pipeline: identity normalization, record matching,
//! field merge, enrichment, validation and the catalog writer.

pub mod classify;
pub mod config;
pub mod documents;
pub mod images;
pub mod matcher;
pub mod merge;
pub mod normalize;
pub mod overrides;
pub mod pipeline;
pub mod validate;
pub mod writer;

pub use classify::{Classification, ClassificationTable, Classifier, TAPE_CHEMISTRY_RULE};
pub use config::{PipelineConfig, ResolverTables, RunOptions, SourceRegistry};
pub use documents::{resolve_document, DocumentResolution, DocumentRule};
pub use images::{resolve_image, resolve_product_image, ImageResolution, ImageRule};
pub use matcher::{MatchOutcome, OrphanReason, OrphanedSourceRecord, RecordMatcher};
pub use merge::merge;
pub use normalize::{normalize, normalize_with_prefix_variants};
pub use overrides::OverrideTable;
pub use pipeline::{CatalogPipeline, PipelineError, RunSummary};
pub use validate::{Severity, ValidationReport, ValidationViolation, Validator};
pub use writer::{render_catalog, CatalogDocument, CatalogMetadata};

pub const CRATE_NAME: &str = "pcat-sync";
