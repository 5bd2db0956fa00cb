//! Data-driven per-product corrections (`rules/overrides.yaml`).

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use pcat_core::{Confidence, ProductLine};
use serde::Deserialize;

use crate::normalize::catalog_id;

/// Field values forced onto one product. Absent fields are left to the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProductOverride {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub chemistry: Option<String>,
    pub chemistry_confidence: Option<String>,
    pub industry: Option<Vec<String>>,
    pub image_url: Option<String>,
    pub standard_tds_link: Option<String>,
    #[serde(default)]
    pub technical_data: BTreeMap<String, String>,
}

/// Pins one secondary record to a product, bypassing key matching.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExplicitLink {
    pub source_id: String,
    pub raw_id: String,
    pub product_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OverrideTable {
    #[serde(default)]
    pub products: BTreeMap<String, ProductOverride>,
    #[serde(default)]
    pub links: Vec<ExplicitLink>,
}

impl OverrideTable {
    /// Missing file means an empty table.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let raw: OverrideTable = serde_yaml::from_str(text)?;
        for (id, o) in &raw.products {
            if let Some(category) = o.category.as_deref() {
                if ProductLine::parse_loose(category).is_none() {
                    bail!("override for {id}: category {category:?} is not one of BOND, SEAL, TAPE");
                }
            }
            if let Some(confidence) = o.chemistry_confidence.as_deref() {
                if Confidence::parse(confidence).is_none() {
                    bail!("override for {id}: unknown chemistryConfidence {confidence:?}");
                }
            }
        }
        Ok(Self {
            products: raw
                .products
                .into_iter()
                .map(|(id, o)| (catalog_id(&id), o))
                .collect(),
            links: raw.links,
        })
    }

    pub fn for_product(&self, id: &str) -> Option<&ProductOverride> {
        self.products.get(id)
    }

    pub fn link_for(&self, source_id: &str, raw_id: &str) -> Option<String> {
        let raw = raw_id.trim();
        self.links
            .iter()
            .find(|l| l.source_id == source_id && l.raw_id.trim().eq_ignore_ascii_case(raw))
            .map(|l| catalog_id(&l.product_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_products_and_links() {
        let table = OverrideTable::from_yaml(
            r#"
products:
  T461:
    chemistry: Acrylic (incl. PSA)
    chemistryConfidence: High
  os2:
    industry: [construction]
    technicalData:
      shelfLife: 12 months
links:
  - { source_id: scraped, raw_id: OS-2, product_id: OS2 }
"#,
        )
        .unwrap();
        assert_eq!(
            table.for_product("t461").and_then(|o| o.chemistry.as_deref()),
            Some("Acrylic (incl. PSA)")
        );
        assert_eq!(table.for_product("os2").map(|o| o.technical_data.len()), Some(1));
        assert_eq!(table.link_for("scraped", "os-2").as_deref(), Some("os2"));
        assert_eq!(table.link_for("legacy", "os-2"), None);
    }

    #[test]
    fn unknown_override_fields_are_rejected() {
        let err = OverrideTable::from_yaml("products:\n  c331:\n    colour: red\n").unwrap_err();
        assert!(format!("{err:#}").contains("colour"));
    }

    #[test]
    fn unparseable_category_or_confidence_is_rejected() {
        let err = OverrideTable::from_yaml("products:\n  c331:\n    category: GADGET\n").unwrap_err();
        assert!(format!("{err:#}").contains("GADGET"));
        let err = OverrideTable::from_yaml("products:\n  c331:\n    chemistryConfidence: sure\n").unwrap_err();
        assert!(format!("{err:#}").contains("sure"));
        assert!(OverrideTable::from_yaml("products:\n  c331:\n    category: sealant\n").is_ok());
    }

    #[test]
    fn missing_file_is_an_empty_table() {
        let table = OverrideTable::load(Path::new("/no/such/overrides.yaml")).unwrap();
        assert!(table.products.is_empty());
        assert!(table.links.is_empty());
    }
}
