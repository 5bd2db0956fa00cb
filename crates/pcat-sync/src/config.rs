//! Environment + `pipeline.yaml` configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use pcat_adapters::SourceDescriptor;
use pcat_core::SourceKind;
use pcat_storage::HttpClientConfig;
use serde::Deserialize;

use crate::normalize::NOISE_PREFIXES;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub workspace_root: PathBuf,
    /// Catalog output path; relative paths resolve against the workspace root.
    pub output: Option<PathBuf>,
    pub image_url_prefix: Option<String>,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub download_concurrency: usize,
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        Self {
            workspace_root: std::env::var("PCAT_WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".")),
            output: std::env::var("PCAT_OUTPUT").ok().map(PathBuf::from),
            image_url_prefix: std::env::var("PCAT_IMAGE_URL_PREFIX").ok(),
            user_agent: std::env::var("PCAT_USER_AGENT")
                .unwrap_or_else(|_| "pcat-bot/0.1".to_string()),
            http_timeout_secs: std::env::var("PCAT_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            download_concurrency: std::env::var("PCAT_DOWNLOAD_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(4),
        }
    }

    pub fn for_workspace(root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: root.into(),
            output: None,
            image_url_prefix: None,
            user_agent: "pcat-bot/0.1".to_string(),
            http_timeout_secs: 20,
            download_concurrency: 4,
        }
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            concurrency: self.download_concurrency,
            ..Default::default()
        }
    }

    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace_root.join(path)
        }
    }
}

/// Contents of `pipeline.yaml`.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceRegistry {
    #[serde(default = "default_output")]
    pub output: PathBuf,
    #[serde(default = "default_image_url_prefix")]
    pub image_url_prefix: String,
    #[serde(default = "default_pdf_url_prefix")]
    pub pdf_url_prefix: String,
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub source_id: String,
    pub kind: SourceKind,
    pub path: PathBuf,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Merge precedence among record sources; lower comes first.
    #[serde(default)]
    pub priority: u32,
}

fn default_output() -> PathBuf {
    PathBuf::from("public/productsCatalog.json")
}

fn default_image_url_prefix() -> String {
    "/product-images".to_string()
}

fn default_pdf_url_prefix() -> String {
    "/TDS".to_string()
}

fn default_enabled() -> bool {
    true
}

impl Default for SourceRegistry {
    fn default() -> Self {
        let source = |id: &str, kind, path: &str, priority| SourceConfig {
            source_id: id.to_string(),
            kind,
            path: PathBuf::from(path),
            enabled: true,
            priority,
        };
        Self {
            output: default_output(),
            image_url_prefix: default_image_url_prefix(),
            pdf_url_prefix: default_pdf_url_prefix(),
            sources: vec![
                source("curated", SourceKind::Curated, "data/curated.json", 0),
                source("legacy", SourceKind::LegacyTds, "data/legacy_tds.json", 1),
                source("scraped", SourceKind::Scraped, "data/scraped.json", 2),
                source("images", SourceKind::ImageDir, "public/product-images", 0),
                source("tds", SourceKind::PdfDir, "public/TDS", 0),
            ],
        }
    }
}

impl SourceRegistry {
    /// `pipeline.yaml` under the workspace root, or the built-in registry when absent.
    pub fn load(workspace_root: &Path) -> Result<Self> {
        let path = workspace_root.join("pipeline.yaml");
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        let registry: Self = serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        registry.check()?;
        Ok(registry)
    }

    fn check(&self) -> Result<()> {
        let curated = self
            .enabled()
            .filter(|s| s.kind == SourceKind::Curated)
            .count();
        if curated != 1 {
            bail!("pipeline.yaml must enable exactly one curated source, found {curated}");
        }
        let mut ids: Vec<&str> = self.sources.iter().map(|s| s.source_id.as_str()).collect();
        ids.sort_unstable();
        if let Some(dup) = ids.windows(2).find(|w| w[0] == w[1]) {
            bail!("pipeline.yaml lists source_id {} twice", dup[0]);
        }
        Ok(())
    }

    pub fn enabled(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }

    pub fn authoritative(&self) -> Option<&SourceConfig> {
        self.enabled().find(|s| s.kind == SourceKind::Curated)
    }

    /// Enabled secondary record sources in merge precedence order.
    pub fn secondary_record_sources(&self) -> Vec<&SourceConfig> {
        let mut out: Vec<&SourceConfig> = self
            .enabled()
            .filter(|s| s.kind.is_record_source() && s.kind != SourceKind::Curated)
            .collect();
        out.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.source_id.cmp(&b.source_id)));
        out
    }

    pub fn first_of_kind(&self, kind: SourceKind) -> Option<&SourceConfig> {
        self.enabled().find(|s| s.kind == kind)
    }

    pub fn descriptor(&self, source: &SourceConfig, config: &PipelineConfig) -> SourceDescriptor {
        SourceDescriptor::new(source.source_id.clone(), source.kind, config.resolve(&source.path))
    }
}

/// Fixed lookup tables the enrichers consult.
#[derive(Debug, Clone)]
pub struct ResolverTables {
    pub image_url_prefix: String,
    pub noise_prefixes: Vec<&'static str>,
    /// Ordered keyword → placeholder image, checked against category/brand text.
    pub image_fallbacks: Vec<(String, String)>,
    pub default_image: String,
    /// Industry tag → top-level PDF folder name.
    pub industry_folders: Vec<(String, String)>,
    pub default_industry_folder: String,
    /// Filename markers of the preferred (condensed) document variant.
    pub preferred_markers: Vec<String>,
}

impl ResolverTables {
    pub fn new(image_url_prefix: &str) -> Self {
        let prefix = image_url_prefix.trim_end_matches('/').to_string();
        let pairs = |items: &[(&str, &str)]| {
            items
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<Vec<_>>()
        };
        Self {
            image_fallbacks: vec![
                ("seal".to_string(), format!("{prefix}/placeholder-seal.png")),
                ("tape".to_string(), format!("{prefix}/placeholder-tape.png")),
            ],
            default_image: format!("{prefix}/placeholder.png"),
            image_url_prefix: prefix,
            noise_prefixes: NOISE_PREFIXES.to_vec(),
            industry_folders: pairs(&[
                ("industrial", "1. Industrial"),
                ("marine", "2. Marine"),
                ("transportation", "3. Transportation"),
                ("composites", "4. Composites"),
                ("insulation", "6. Insulation"),
                ("construction", "7. Construction"),
            ]),
            default_industry_folder: "1. Industrial".to_string(),
            preferred_markers: vec!["for email".to_string()],
        }
    }

    pub fn industry_folder(&self, industry: &str) -> &str {
        let wanted = industry.trim().to_lowercase();
        self.industry_folders
            .iter()
            .find(|(tag, _)| *tag == wanted)
            .map(|(_, folder)| folder.as_str())
            .unwrap_or(&self.default_industry_folder)
    }

    pub fn is_fallback_image(&self, path: &str) -> bool {
        path == self.default_image || self.image_fallbacks.iter().any(|(_, p)| p == path)
    }
}

/// Which enrichment stages run, and whether the catalog is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub images: bool,
    pub documents: bool,
    pub classification: bool,
    pub dry_run: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            images: true,
            documents: true,
            classification: true,
            dry_run: false,
        }
    }
}

impl RunOptions {
    pub fn stage_names(&self) -> Vec<String> {
        let mut stages = vec!["load".to_string(), "match".to_string(), "merge".to_string()];
        if self.classification {
            stages.push("classify".to_string());
        }
        if self.images {
            stages.push("images".to_string());
        }
        if self.documents {
            stages.push("documents".to_string());
        }
        stages.push("validate".to_string());
        stages
    }
}
