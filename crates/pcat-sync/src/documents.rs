//! Document resolver: one canonical TDS link per product.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::config::ResolverTables;
use crate::normalize::{normalize, variants_with};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentRule {
    PreferredInProductFolder,
    Preferred,
    ProductFolder,
    FirstAvailable,
}

impl DocumentRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentRule::PreferredInProductFolder => "preferred_in_product_folder",
            DocumentRule::Preferred => "preferred",
            DocumentRule::ProductFolder => "product_folder",
            DocumentRule::FirstAvailable => "first_available",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentResolution {
    pub link: String,
    pub rule: DocumentRule,
    /// Candidates discarded in favour of `link`.
    pub links_removed: usize,
}

/// Pick one link: preferred marker in the product's own folder under its
/// industry folder, then any preferred link, then a product+industry folder
/// match, then the first candidate. `None` only when there are no candidates.
pub fn resolve_document(
    product_id: &str,
    industry: &str,
    candidates: &[String],
    tables: &ResolverTables,
) -> Option<DocumentResolution> {
    let candidates: Vec<&String> = candidates.iter().filter(|c| !c.trim().is_empty()).collect();
    let first = *candidates.first()?;
    let product_keys = variants_with(product_id, &tables.noise_prefixes);
    let industry_folder = tables.industry_folder(industry).to_lowercase();

    let preferred = |link: &str| has_preferred_marker(link, &tables.preferred_markers);
    let in_folder = |link: &str| in_product_folder(link, &product_keys) && in_industry_folder(link, &industry_folder);

    let pick = |rule: DocumentRule, link: &String| DocumentResolution {
        link: link.clone(),
        rule,
        links_removed: candidates.len() - 1,
    };

    if let Some(link) = candidates.iter().find(|l| preferred(l) && in_folder(l)) {
        return Some(pick(DocumentRule::PreferredInProductFolder, link));
    }
    if let Some(link) = candidates.iter().find(|l| preferred(l)) {
        return Some(pick(DocumentRule::Preferred, link));
    }
    if let Some(link) = candidates.iter().find(|l| in_folder(l)) {
        return Some(pick(DocumentRule::ProductFolder, link));
    }
    Some(pick(DocumentRule::FirstAvailable, first))
}

/// Markers match regardless of case and of `_`/`-`/space separators.
pub fn has_preferred_marker(link: &str, markers: &[String]) -> bool {
    let folded = fold_separators(link);
    markers.iter().any(|m| folded.contains(&fold_separators(m)))
}

fn fold_separators(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c == '_' || c == '-' { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn folders(link: &str) -> Vec<&str> {
    let mut parts: Vec<&str> = link.split('/').filter(|p| !p.is_empty()).collect();
    parts.pop();
    parts
}

fn in_product_folder(link: &str, product_keys: &[String]) -> bool {
    folders(link).iter().any(|folder| {
        let key = normalize(folder);
        !key.is_empty() && product_keys.contains(&key)
    })
}

fn in_industry_folder(link: &str, industry_folder: &str) -> bool {
    folders(link).iter().any(|folder| folder.to_lowercase() == industry_folder)
}

/// Key a document path by product: folder names and the file stem with the
/// preferred marker and extension removed.
pub fn document_keys(link: &str, markers: &[String]) -> BTreeSet<String> {
    let mut keys: BTreeSet<String> = folders(link).into_iter().map(normalize).filter(|k| !k.is_empty()).collect();
    if let Some(file) = link.rsplit('/').next() {
        let stem = file.rsplit_once('.').map(|(s, _)| s).unwrap_or(file);
        let mut folded = fold_separators(stem);
        for marker in markers {
            folded = folded.replace(&fold_separators(marker), " ");
        }
        let key = normalize(&folded);
        if !key.is_empty() {
            keys.insert(key);
        }
    }
    keys
}

/// Directory PDFs that belong to the product, in listing order.
pub fn candidates_from_listing<'a>(
    product_id: &str,
    listing: &'a BTreeSet<String>,
    tables: &ResolverTables,
) -> Vec<&'a String> {
    let product_keys = variants_with(product_id, &tables.noise_prefixes);
    listing
        .iter()
        .filter(|link| {
            document_keys(link, &tables.preferred_markers)
                .iter()
                .any(|k| product_keys.contains(k))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables() -> ResolverTables {
        ResolverTables::new("/product-images")
    }

    fn links(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn preferred_marker_beats_input_order() {
        let candidates = links(&["/TDS/FOR_EMAIL/x.pdf", "/TDS/other/x.pdf"]);
        let r = resolve_document("x", "industrial", &candidates, &tables()).unwrap();
        assert_eq!(r.link, "/TDS/FOR_EMAIL/x.pdf");
        assert_eq!(r.rule, DocumentRule::Preferred);
        assert_eq!(r.links_removed, 1);

        let reversed = links(&["/TDS/other/x.pdf", "/TDS/FOR_EMAIL/x.pdf"]);
        let r = resolve_document("x", "industrial", &reversed, &tables()).unwrap();
        assert_eq!(r.link, "/TDS/FOR_EMAIL/x.pdf");
    }

    #[test]
    fn preferred_in_own_industry_folder_ranks_first() {
        let candidates = links(&[
            "/TDS/2. Marine/C-331/TDS/C-331 FOR EMAIL.pdf",
            "/TDS/1. Industrial/C-331/TDS/C-331.pdf",
            "/TDS/1. Industrial/C-331/TDS/C-331 FOR EMAIL.pdf",
        ]);
        let r = resolve_document("c331", "industrial", &candidates, &tables()).unwrap();
        assert_eq!(r.link, "/TDS/1. Industrial/C-331/TDS/C-331 FOR EMAIL.pdf");
        assert_eq!(r.rule, DocumentRule::PreferredInProductFolder);
        assert_eq!(r.links_removed, 2);
    }

    #[test]
    fn folder_match_then_first_available() {
        let candidates = links(&["/TDS/7. Construction/OS2/OS2.pdf", "/TDS/2. Marine/OS24/OS24.pdf"]);
        let r = resolve_document("os24", "marine", &candidates, &tables()).unwrap();
        assert_eq!(r.rule, DocumentRule::ProductFolder);
        assert_eq!(r.link, "/TDS/2. Marine/OS24/OS24.pdf");

        let r = resolve_document("zz9", "marine", &candidates, &tables()).unwrap();
        assert_eq!(r.rule, DocumentRule::FirstAvailable);
        assert_eq!(r.link, "/TDS/7. Construction/OS2/OS2.pdf");
    }

    #[test]
    fn no_candidates_resolves_to_none() {
        assert!(resolve_document("c331", "industrial", &[], &tables()).is_none());
        assert!(resolve_document("c331", "industrial", &links(&["  "]), &tables()).is_none());
    }

    #[test]
    fn listing_candidates_match_by_folder_or_stem() {
        let listing: BTreeSet<String> = [
            "/TDS/1. Industrial/C-331/TDS/C-331 FOR EMAIL.pdf",
            "/TDS/1. Industrial/misc/c331-for-email.pdf",
            "/TDS/1. Industrial/C-3310/C-3310.pdf",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let found = candidates_from_listing("c331", &listing, &tables());
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|l| !l.contains("3310")));
    }
}
