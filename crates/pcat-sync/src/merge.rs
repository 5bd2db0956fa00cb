//! Field merge: authoritative values win, secondaries fill gaps, list
//! fields are unioned.

use pcat_core::{
    clean_list_item, meaningful, ClassificationHints, DeclaredChemistry, MatchResult, ProductRecord, SourceRecord,
};

use crate::normalize::catalog_id;
use crate::overrides::ProductOverride;

/// Merge one authoritative record with its secondaries, which must already
/// be in source-priority order. Pure: the result depends only on the inputs.
pub fn merge(authoritative: &SourceRecord, secondary: &[&SourceRecord]) -> ProductRecord {
    let sources: Vec<&SourceRecord> = std::iter::once(authoritative).chain(secondary.iter().copied()).collect();
    let mut product = ProductRecord::new(catalog_id(&authoritative.raw_id));

    product.name = first_text(&sources, |r| r.name.as_deref()).unwrap_or_default();
    product.description = first_text(&sources, |r| r.description.as_deref()).unwrap_or_default();
    product.industry = sources
        .iter()
        .map(|r| normalized_industry(&r.industry))
        .find(|tags| !tags.is_empty())
        .unwrap_or_default();
    product.image_url = first_text(&sources, |r| r.image_url.as_deref()).unwrap_or_default();
    product.standard_tds_link = first_text(&sources, |r| r.standard_tds_link.as_deref());
    product.how_to_use = first_text(&sources, |r| r.how_to_use.as_deref());

    product.pdf_links = union_links(sources.iter().flat_map(|r| r.pdf_links.iter()));
    product.sizes = union_items(sources.iter().flat_map(|r| r.sizes.iter()));
    product.benefits = union_items(sources.iter().flat_map(|r| r.benefits.iter()));
    product.applications = union_items(sources.iter().flat_map(|r| r.applications.iter()));

    for record in &sources {
        for (key, value) in &record.technical_data {
            if meaningful(Some(value)).is_some() {
                product.technical_data.entry(key.clone()).or_insert_with(|| value.trim().to_string());
            }
        }
    }

    product.hints = ClassificationHints {
        declared_category: first_text(&sources, |r| r.category.as_deref()),
        category_hint: first_text(&sources, |r| r.category_hint.as_deref()),
        declared_chemistries: sources
            .iter()
            .filter_map(|r| {
                meaningful(r.chemistry.as_deref()).map(|value| DeclaredChemistry {
                    source_id: r.source_id.clone(),
                    value,
                    confidence: r.chemistry_confidence,
                })
            })
            .collect(),
    };
    product
}

/// Merge a matcher result; linked records keep the order the matcher saw them in.
pub fn merge_match(result: &MatchResult) -> ProductRecord {
    let secondary: Vec<&SourceRecord> = result.linked.iter().map(|l| &l.record).collect();
    merge(&result.authoritative, &secondary)
}

/// Apply non-classification overrides. Returns the names of the fields touched.
pub fn apply_field_overrides(product: &mut ProductRecord, overrides: &ProductOverride) -> Vec<&'static str> {
    let mut touched = Vec::new();
    if let Some(name) = meaningful(overrides.name.as_deref()) {
        product.name = name;
        touched.push("name");
    }
    if let Some(description) = meaningful(overrides.description.as_deref()) {
        product.description = description;
        touched.push("description");
    }
    if let Some(industry) = overrides.industry.as_ref().map(|tags| normalized_industry(tags)) {
        if !industry.is_empty() {
            product.industry = industry;
            touched.push("industry");
        }
    }
    if let Some(image) = meaningful(overrides.image_url.as_deref()) {
        product.image_url = image;
        touched.push("imageUrl");
    }
    if let Some(link) = meaningful(overrides.standard_tds_link.as_deref()) {
        product.pdf_links.retain(|l| *l != link);
        product.pdf_links.insert(0, link.clone());
        product.standard_tds_link = Some(link);
        touched.push("standardTdsLink");
    }
    if !overrides.technical_data.is_empty() {
        for (key, value) in &overrides.technical_data {
            product.technical_data.insert(key.clone(), value.trim().to_string());
        }
        touched.push("technicalData");
    }
    touched
}

fn first_text<'a>(sources: &[&'a SourceRecord], field: impl Fn(&'a SourceRecord) -> Option<&'a str>) -> Option<String> {
    sources.iter().find_map(|r| meaningful(field(*r)))
}

fn normalized_industry(tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

/// Union of list entries, deduplicated on the cleaned, case-folded text and
/// kept in first-seen order.
pub fn union_items<'a>(items: impl IntoIterator<Item = &'a String>) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    let mut out = Vec::new();
    for item in items {
        let cleaned = clean_list_item(item);
        if cleaned.is_empty() || pcat_core::is_blank_or_placeholder(&cleaned) {
            continue;
        }
        let key = cleaned.to_lowercase();
        if !seen.contains(&key) {
            seen.push(key);
            out.push(cleaned);
        }
    }
    out
}

fn union_links<'a>(links: impl IntoIterator<Item = &'a String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for link in links {
        let link = link.trim();
        if !link.is_empty() && !out.iter().any(|l| l == link) {
            out.push(link.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcat_core::{Confidence, SourceKind};

    fn curated(id: &str) -> SourceRecord {
        SourceRecord::new("curated", SourceKind::Curated, 0, id)
    }

    fn secondary(source: &str, id: &str) -> SourceRecord {
        SourceRecord::new(source, SourceKind::Scraped, 0, id)
    }

    #[test]
    fn authoritative_value_is_never_overwritten() {
        let mut a = curated("os24");
        a.description = Some("Curated description".into());
        let mut s = secondary("scraped", "os24");
        s.description = Some("Scraped description".into());
        let merged = merge(&a, &[&s]);
        assert_eq!(merged.description, "Curated description");
    }

    #[test]
    fn empty_or_placeholder_authoritative_value_is_filled() {
        let mut a = curated("os24");
        a.description = Some("undefined".into());
        let mut legacy = secondary("legacy", "M-OS24");
        legacy.description = None;
        legacy.name = Some("OS24".into());
        let mut scraped = secondary("scraped", "os24");
        scraped.description = Some("Hybrid sealant".into());
        scraped.name = Some("OS24 Hybrid Sealant".into());
        let merged = merge(&a, &[&legacy, &scraped]);
        assert_eq!(merged.description, "Hybrid sealant");
        assert_eq!(merged.name, "OS24", "first secondary in priority order wins");
    }

    #[test]
    fn cumulative_fields_union_without_duplicates() {
        let mut a = curated("c331");
        a.benefits = vec!["Fast cure".into()];
        let mut legacy = secondary("legacy", "C-331");
        legacy.benefits = vec!["• Fast cure".into(), "Spray grade".into()];
        let mut scraped = secondary("scraped", "c331");
        scraped.benefits = vec!["fast  CURE".into(), "High strength".into()];
        scraped.sizes = vec!["1 gal".into(), "1 gal".into()];
        let merged = merge(&a, &[&legacy, &scraped]);
        assert_eq!(merged.benefits, vec!["Fast cure", "Spray grade", "High strength"]);
        assert_eq!(merged.sizes, vec!["1 gal"]);
    }

    #[test]
    fn technical_data_fills_missing_keys_only() {
        let mut a = curated("c331");
        a.technical_data.insert("appearance".into(), "Amber".into());
        let mut legacy = secondary("legacy", "C-331");
        legacy.technical_data.insert("appearance".into(), "Clear".into());
        legacy.technical_data.insert("solids".into(), "45%".into());
        let merged = merge(&a, &[&legacy]);
        assert_eq!(merged.technical_data.get("appearance").map(String::as_str), Some("Amber"));
        assert_eq!(merged.technical_data.get("solids").map(String::as_str), Some("45%"));
    }

    #[test]
    fn classification_hints_keep_every_declared_chemistry_in_order() {
        let mut a = curated("c331");
        a.category = Some("BOND".into());
        a.chemistry = Some("Unknown".into());
        a.chemistry_confidence = Some(Confidence::Low);
        let mut legacy = secondary("legacy", "C-331");
        legacy.chemistry = Some("Solvent Based".into());
        legacy.chemistry_confidence = Some(Confidence::High);
        let mut scraped = secondary("scraped", "c331");
        scraped.category_hint = Some("BOND".into());
        scraped.chemistry = Some("Contact Cement".into());
        let merged = merge(&a, &[&legacy, &scraped]);
        assert_eq!(merged.id, "c331");
        assert_eq!(merged.hints.declared_category.as_deref(), Some("BOND"));
        assert_eq!(merged.hints.category_hint.as_deref(), Some("BOND"));
        let declared = &merged.hints.declared_chemistries;
        assert_eq!(declared.len(), 2, "placeholder chemistry is not declared");
        assert_eq!(declared[0].source_id, "legacy");
        assert_eq!(declared[0].value, "Solvent Based");
        assert_eq!(declared[0].confidence, Some(Confidence::High));
        assert_eq!(declared[1].value, "Contact Cement");
    }

    #[test]
    fn overrides_replace_fields_and_pin_the_tds_link() {
        let mut a = curated("os2");
        a.industry = vec!["marine".into()];
        a.pdf_links = vec!["/TDS/a.pdf".into(), "/TDS/b.pdf".into()];
        let mut product = merge(&a, &[]);
        let o = ProductOverride {
            industry: Some(vec!["Construction".into(), "construction".into()]),
            standard_tds_link: Some("/TDS/b.pdf".into()),
            ..Default::default()
        };
        let touched = apply_field_overrides(&mut product, &o);
        assert_eq!(touched, vec!["industry", "standardTdsLink"]);
        assert_eq!(product.industry, vec!["construction"]);
        assert_eq!(product.pdf_links, vec!["/TDS/b.pdf", "/TDS/a.pdf"]);
    }
}
