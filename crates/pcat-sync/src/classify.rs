//! Classification engine: ordered rule tables for category and chemistry.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use pcat_core::{meaningful, Confidence, ProductLine, ProductRecord, DEFAULT_INDUSTRY, TAPE_CHEMISTRY, UNKNOWN_CHEMISTRY};
use regex::{Regex, RegexBuilder};
use serde::Deserialize;

use crate::overrides::OverrideTable;

const BUILTIN_RULES: &str = include_str!("../rules/classification.yaml");

/// Name of the rule that forces tape chemistry onto every TAPE product.
pub const TAPE_CHEMISTRY_RULE: &str = "tape-chemistry";

#[derive(Debug, Clone, Deserialize)]
struct RulesFile {
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    chemistries: Vec<ChemistryEntry>,
    #[serde(default)]
    category_rules: Vec<CategoryRuleSpec>,
    #[serde(default)]
    chemistry_rules: Vec<ChemistryRuleSpec>,
    #[serde(default)]
    category_defaults: BTreeMap<ProductLine, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChemistryEntry {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleField {
    Name,
    Id,
}

#[derive(Debug, Clone, Deserialize)]
struct CategoryRuleSpec {
    rule: String,
    field: RuleField,
    pattern: String,
    category: ProductLine,
}

#[derive(Debug, Clone, Deserialize)]
struct ChemistryRuleSpec {
    rule: String,
    pattern: String,
    chemistry: String,
}

#[derive(Debug, Clone)]
pub struct CategoryRule {
    pub rule: String,
    pub field: RuleField,
    pub pattern: Regex,
    pub category: ProductLine,
}

#[derive(Debug, Clone)]
pub struct ChemistryRule {
    pub rule: String,
    pub pattern: Regex,
    pub chemistry: String,
}

#[derive(Debug, Clone)]
pub struct ClassificationTable {
    pub chemistries: Vec<ChemistryEntry>,
    pub category_rules: Vec<CategoryRule>,
    pub chemistry_rules: Vec<ChemistryRule>,
    pub category_defaults: BTreeMap<ProductLine, String>,
}

impl ClassificationTable {
    pub fn builtin() -> Result<Self> {
        Self::from_yaml(BUILTIN_RULES).context("parsing built-in classification rules")
    }

    /// `rules/classification.yaml` under the workspace root replaces the
    /// built-in table when present.
    pub fn load(workspace_root: &Path) -> Result<Self> {
        let path = workspace_root.join("rules").join("classification.yaml");
        if !path.exists() {
            return Self::builtin();
        }
        let text = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let file: RulesFile = serde_yaml::from_str(text)?;
        let category_rules = file
            .category_rules
            .into_iter()
            .map(|spec| {
                Ok(CategoryRule {
                    pattern: compile(&spec.pattern).with_context(|| format!("category rule {}", spec.rule))?,
                    rule: spec.rule,
                    field: spec.field,
                    category: spec.category,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let chemistry_rules = file
            .chemistry_rules
            .into_iter()
            .map(|spec| {
                Ok(ChemistryRule {
                    pattern: compile(&spec.pattern).with_context(|| format!("chemistry rule {}", spec.rule))?,
                    rule: spec.rule,
                    chemistry: spec.chemistry,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            chemistries: file.chemistries,
            category_rules,
            chemistry_rules,
            category_defaults: file.category_defaults,
        })
    }

    /// Map a declared chemistry onto the controlled vocabulary.
    pub fn canonical_chemistry(&self, raw: &str) -> Option<&str> {
        let wanted = raw.trim().to_lowercase();
        self.chemistries
            .iter()
            .find(|entry| {
                entry.name.to_lowercase() == wanted || entry.aliases.iter().any(|a| a.to_lowercase() == wanted)
            })
            .map(|entry| entry.name.as_str())
    }

    pub fn is_in_vocabulary(&self, chemistry: &str) -> bool {
        chemistry == UNKNOWN_CHEMISTRY || self.chemistries.iter().any(|e| e.name == chemistry)
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .with_context(|| format!("invalid pattern {pattern:?}"))
}

/// Resolved labels plus the rule that produced each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub category: Option<ProductLine>,
    pub category_rule: String,
    pub chemistry: String,
    pub confidence: Confidence,
    pub chemistry_rule: String,
}

impl Classification {
    pub fn describe(&self) -> String {
        format!(
            "category={} ({}); chemistry={} ({}, {})",
            self.category.map(|c| c.as_str()).unwrap_or("invalid"),
            self.category_rule,
            self.chemistry,
            self.chemistry_rule,
            self.confidence
        )
    }
}

pub struct Classifier<'a> {
    table: &'a ClassificationTable,
    overrides: &'a OverrideTable,
}

impl<'a> Classifier<'a> {
    pub fn new(table: &'a ClassificationTable, overrides: &'a OverrideTable) -> Self {
        Self { table, overrides }
    }

    pub fn classify(&self, product: &ProductRecord) -> Classification {
        let override_entry = self.overrides.for_product(&product.id);
        let (category, category_rule) = self.classify_category(product, override_entry.and_then(|o| o.category.as_deref()));

        let mut classification = match self.override_chemistry(product) {
            Some(found) => found,
            None => self.rule_chemistry(product, category),
        };
        classification.category = category;
        classification.category_rule = category_rule;

        if category == Some(ProductLine::Tape) && classification.chemistry != TAPE_CHEMISTRY {
            classification.chemistry = TAPE_CHEMISTRY.to_string();
            classification.confidence = Confidence::High;
            classification.chemistry_rule = TAPE_CHEMISTRY_RULE.to_string();
        }
        classification
    }

    /// Declared values only, for runs with the classification stage switched off.
    pub fn passthrough(&self, product: &ProductRecord) -> Classification {
        let category = product
            .hints
            .declared_category
            .as_deref()
            .and_then(ProductLine::parse_loose)
            .or_else(|| product.hints.category_hint.as_deref().and_then(ProductLine::parse_loose));
        let mut classification = self
            .declared_chemistry(product)
            .or_else(|| self.unmapped_chemistry(product))
            .unwrap_or_else(|| chemistry_only(UNKNOWN_CHEMISTRY.to_string(), Confidence::None, "none"));
        classification.category = category;
        classification.category_rule = "declared".to_string();
        classification
    }

    /// Write the classification onto the record; fills the default industry
    /// when no source supplied one. Returns true when the industry was defaulted.
    pub fn apply(&self, product: &mut ProductRecord, classification: &Classification) -> bool {
        product.category = classification.category;
        product.chemistry = classification.chemistry.clone();
        product.chemistry_confidence = classification.confidence;
        if product.industry.is_empty() {
            product.industry = vec![DEFAULT_INDUSTRY.to_string()];
            return true;
        }
        false
    }

    fn classify_category(&self, product: &ProductRecord, override_category: Option<&str>) -> (Option<ProductLine>, String) {
        if let Some(line) = override_category.and_then(ProductLine::parse_loose) {
            return (Some(line), "override".to_string());
        }
        for rule in &self.table.category_rules {
            let text = match rule.field {
                RuleField::Name => product.name.as_str(),
                RuleField::Id => product.id.as_str(),
            };
            if rule.pattern.is_match(text) {
                return (Some(rule.category), rule.rule.clone());
            }
        }
        if let Some(line) = product.hints.declared_category.as_deref().and_then(ProductLine::parse_loose) {
            return (Some(line), "declared".to_string());
        }
        if let Some(line) = product.hints.category_hint.as_deref().and_then(ProductLine::parse_loose) {
            return (Some(line), "source-hint".to_string());
        }
        (None, "none".to_string())
    }

    fn override_chemistry(&self, product: &ProductRecord) -> Option<Classification> {
        let entry = self.overrides.for_product(&product.id)?;
        let raw = meaningful(entry.chemistry.as_deref())?;
        let chemistry = self.table.canonical_chemistry(&raw).map(ToString::to_string).unwrap_or(raw);
        let confidence = entry
            .chemistry_confidence
            .as_deref()
            .and_then(Confidence::parse)
            .unwrap_or(Confidence::High);
        Some(chemistry_only(chemistry, confidence, "override"))
    }

    /// First declared value, in merge precedence order, that maps onto the
    /// vocabulary. Keeps that source's confidence (Medium when it gave none).
    fn declared_chemistry(&self, product: &ProductRecord) -> Option<Classification> {
        product.hints.declared_chemistries.iter().find_map(|declared| {
            let chemistry = self.table.canonical_chemistry(&declared.value)?;
            let confidence = match declared.confidence {
                Some(c) if c != Confidence::None => c,
                _ => Confidence::Medium,
            };
            Some(chemistry_only(chemistry.to_string(), confidence, "declared"))
        })
    }

    /// A declared value outside the vocabulary is kept verbatim at Low
    /// confidence so the validator can report it.
    fn unmapped_chemistry(&self, product: &ProductRecord) -> Option<Classification> {
        let declared = product.hints.declared_chemistries.first()?;
        Some(chemistry_only(declared.value.clone(), Confidence::Low, "declared-unmapped"))
    }

    fn rule_chemistry(&self, product: &ProductRecord, category: Option<ProductLine>) -> Classification {
        if let Some(declared) = self.declared_chemistry(product).or_else(|| self.unmapped_chemistry(product)) {
            return declared;
        }
        for rule in &self.table.chemistry_rules {
            if rule.pattern.is_match(&product.name) {
                return chemistry_only(rule.chemistry.clone(), Confidence::Medium, &rule.rule);
            }
        }
        if let Some(chemistry) = category.and_then(|c| self.table.category_defaults.get(&c)) {
            return chemistry_only(chemistry.clone(), Confidence::Low, "category-default");
        }
        chemistry_only(UNKNOWN_CHEMISTRY.to_string(), Confidence::None, "none")
    }
}

fn chemistry_only(chemistry: String, confidence: Confidence, rule: &str) -> Classification {
    Classification {
        category: None,
        category_rule: String::new(),
        chemistry,
        confidence,
        chemistry_rule: rule.to_string(),
    }
}
