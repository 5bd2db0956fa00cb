//! Image resolver. Pure: the caller supplies the directory listing.

use std::collections::BTreeSet;

use pcat_core::ProductRecord;
use serde::Serialize;

use crate::config::ResolverTables;
use crate::matcher::contains_on_boundary;
use crate::normalize::{normalize, prefix_stripped_forms};

const EXACT_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];

/// Which step of the resolution order produced the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageRule {
    Existing,
    Exact,
    Prefix,
    Substring,
    StrippedExact,
    StrippedPrefix,
    StrippedSubstring,
    CategoryFallback,
    DefaultFallback,
}

impl ImageRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageRule::Existing => "existing",
            ImageRule::Exact => "exact",
            ImageRule::Prefix => "prefix",
            ImageRule::Substring => "substring",
            ImageRule::StrippedExact => "stripped_exact",
            ImageRule::StrippedPrefix => "stripped_prefix",
            ImageRule::StrippedSubstring => "stripped_substring",
            ImageRule::CategoryFallback => "category_fallback",
            ImageRule::DefaultFallback => "default_fallback",
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, ImageRule::CategoryFallback | ImageRule::DefaultFallback)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageResolution {
    pub path: String,
    pub rule: ImageRule,
}

/// Resolve `product_id` against the listing: exact `{id}.png`, then a name
/// starting with the id, then a name containing it, then the same three on
/// noise-prefix-stripped ids, then the category/brand fallback table.
pub fn resolve_image(
    product_id: &str,
    category_or_brand: &str,
    available: &BTreeSet<String>,
    tables: &ResolverTables,
) -> ImageResolution {
    resolve_with_context(product_id, &[category_or_brand], available, tables)
}

/// Fallback contexts are tried in order; each one is checked against the
/// whole fallback table before the next.
fn resolve_with_context(
    product_id: &str,
    contexts: &[&str],
    available: &BTreeSet<String>,
    tables: &ResolverTables,
) -> ImageResolution {
    let id = product_id.trim().to_lowercase();
    let files: Vec<(String, &String)> = available.iter().map(|f| (f.to_lowercase(), f)).collect();

    if !id.is_empty() {
        if let Some((file, rule)) = match_id(&id, &files, [ImageRule::Exact, ImageRule::Prefix, ImageRule::Substring]) {
            return found(tables, file, rule);
        }

        for variant in stripped_variants(&id, tables) {
            let rules = [ImageRule::StrippedExact, ImageRule::StrippedPrefix, ImageRule::StrippedSubstring];
            if let Some((file, rule)) = match_id(&variant, &files, rules) {
                return found(tables, file, rule);
            }
        }
    }

    for context in contexts {
        let context = context.to_lowercase();
        for (keyword, path) in &tables.image_fallbacks {
            if context.contains(keyword.as_str()) {
                return ImageResolution {
                    path: path.clone(),
                    rule: ImageRule::CategoryFallback,
                };
            }
        }
    }
    ImageResolution {
        path: tables.default_image.clone(),
        rule: ImageRule::DefaultFallback,
    }
}

/// Keep the product's current image when its file is in the listing,
/// otherwise run [`resolve_image`].
pub fn resolve_product_image(
    product: &ProductRecord,
    available: &BTreeSet<String>,
    tables: &ResolverTables,
) -> ImageResolution {
    if let Some(name) = basename(&product.image_url) {
        if let Some(file) = available.iter().find(|f| f.eq_ignore_ascii_case(name)) {
            return found(tables, file, ImageRule::Existing);
        }
    }
    let category = product.category.map(|c| c.as_str()).unwrap_or_default();
    resolve_with_context(&product.id, &[category, product.name.as_str()], available, tables)
}

fn found(tables: &ResolverTables, file: &str, rule: ImageRule) -> ImageResolution {
    ImageResolution {
        path: format!("{}/{}", tables.image_url_prefix, file),
        rule,
    }
}

fn basename(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next()?.trim();
    path.rsplit('/').next().filter(|s| !s.is_empty())
}

/// Separator-free id, then its prefix-stripped forms as written and
/// separator-free; the id itself is excluded.
fn stripped_variants(id: &str, tables: &ResolverTables) -> Vec<String> {
    let stripped = prefix_stripped_forms(id, &tables.noise_prefixes);
    let mut out: Vec<String> = Vec::new();
    let candidates = std::iter::once(normalize(id))
        .chain(stripped.iter().cloned())
        .chain(stripped.iter().map(|s| normalize(s)));
    for candidate in candidates {
        if !candidate.is_empty() && candidate != id && !out.contains(&candidate) {
            out.push(candidate);
        }
    }
    out
}

fn match_id<'a>(
    id: &str,
    files: &'a [(String, &'a String)],
    rules: [ImageRule; 3],
) -> Option<(&'a str, ImageRule)> {
    for ext in EXACT_EXTENSIONS {
        let wanted = format!("{id}.{ext}");
        if let Some((_, original)) = files.iter().find(|(lower, _)| *lower == wanted) {
            return Some((original.as_str(), rules[0]));
        }
    }
    if let Some(file) = shortest(files.iter().filter(|(lower, _)| prefix_on_boundary(lower, id))) {
        return Some((file, rules[1]));
    }
    if let Some(file) = shortest(files.iter().filter(|(lower, _)| lower.contains(id) && contains_on_boundary(lower, id))) {
        return Some((file, rules[2]));
    }
    None
}

/// `haystack` starts with `needle` and does not continue its trailing digits.
fn prefix_on_boundary(haystack: &str, needle: &str) -> bool {
    let Some(rest) = haystack.strip_prefix(needle) else {
        return false;
    };
    let ends_digit = needle.chars().next_back().is_some_and(|c| c.is_ascii_digit());
    !(ends_digit && rest.chars().next().is_some_and(|c| c.is_ascii_digit()))
}

/// Shortest file name, then lexicographic.
fn shortest<'a>(candidates: impl Iterator<Item = &'a (String, &'a String)>) -> Option<&'a str> {
    candidates
        .min_by(|(a, _), (b, _)| a.len().cmp(&b.len()).then_with(|| a.cmp(b)))
        .map(|(_, original)| original.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcat_core::ProductLine;

    fn listing(files: &[&str]) -> BTreeSet<String> {
        files.iter().map(|f| f.to_string()).collect()
    }

    fn tables() -> ResolverTables {
        ResolverTables::new("/product-images")
    }

    #[test]
    fn exact_filename_wins() {
        let r = resolve_image("abc123", "", &listing(&["abc123.png", "abc123-v2.png"]), &tables());
        assert_eq!(r.path, "/product-images/abc123.png");
        assert_eq!(r.rule, ImageRule::Exact);
    }

    #[test]
    fn prefix_match_when_no_exact_file() {
        let r = resolve_image("abc123", "", &listing(&["abc123-v2.png"]), &tables());
        assert_eq!(r.path, "/product-images/abc123-v2.png");
        assert_eq!(r.rule, ImageRule::Prefix);
    }

    #[test]
    fn prefix_tie_break_is_shortest_then_lexicographic() {
        let r = resolve_image("os24", "", &listing(&["os24-large.png", "os24-b.png", "os24-a.png"]), &tables());
        assert_eq!(r.path, "/product-images/os24-a.png");
    }

    #[test]
    fn substring_match_respects_digit_boundaries() {
        let r = resolve_image("os24", "", &listing(&["marine-os24.jpg", "os245.png"]), &tables());
        assert_eq!(r.path, "/product-images/marine-os24.jpg");
        assert_eq!(r.rule, ImageRule::Substring);
    }

    #[test]
    fn prefix_match_checks_the_boundary_at_the_start() {
        let r = resolve_image("os24", "", &listing(&["os245-os24.png"]), &tables());
        assert_eq!(r.rule, ImageRule::Substring);
        let r = resolve_image("os24", "", &listing(&["os245-os24.png", "os24-b.png"]), &tables());
        assert_eq!(r.path, "/product-images/os24-b.png");
        assert_eq!(r.rule, ImageRule::Prefix);
    }

    #[test]
    fn stripped_prefix_variants_are_tried_next() {
        let r = resolve_image("m-os24", "", &listing(&["os24.png"]), &tables());
        assert_eq!(r.rule, ImageRule::StrippedExact);
        let r = resolve_image("c-331", "", &listing(&["c331.png"]), &tables());
        assert_eq!(r.path, "/product-images/c331.png");
        assert_eq!(r.rule, ImageRule::StrippedExact);
    }

    #[test]
    fn falls_through_to_category_then_default() {
        let r = resolve_image("abc123", "SEAL OS24", &listing(&["zzz.png"]), &tables());
        assert_eq!(r.path, "/product-images/placeholder-seal.png");
        assert!(r.rule.is_fallback());
        let r = resolve_image("abc123", "BOND", &listing(&[]), &tables());
        assert_eq!(r.path, "/product-images/placeholder.png");
        assert_eq!(r.rule, ImageRule::DefaultFallback);
    }

    #[test]
    fn existing_image_is_kept_when_present() {
        let mut product = ProductRecord::new("c331");
        product.category = Some(ProductLine::Bond);
        product.image_url = "/product-images/C331-hero.png".into();
        let files = listing(&["c331.png", "C331-hero.png"]);
        let r = resolve_product_image(&product, &files, &tables());
        assert_eq!(r.rule, ImageRule::Existing);
        assert_eq!(r.path, "/product-images/C331-hero.png");

        product.image_url = "/product-images/missing.png".into();
        let r = resolve_product_image(&product, &files, &tables());
        assert_eq!(r.rule, ImageRule::Exact);
    }

    #[test]
    fn tape_products_fall_back_to_the_tape_placeholder() {
        let mut product = ProductRecord::new("t999");
        product.category = Some(ProductLine::Tape);
        let r = resolve_product_image(&product, &listing(&[]), &tables());
        assert_eq!(r.path, "/product-images/placeholder-tape.png");

        product.name = "T999 Window Seal Tape".into();
        let r = resolve_product_image(&product, &listing(&[]), &tables());
        assert_eq!(r.path, "/product-images/placeholder-tape.png", "category outranks name keywords");

        product.category = None;
        let r = resolve_product_image(&product, &listing(&[]), &tables());
        assert_eq!(r.path, "/product-images/placeholder-seal.png");
    }
}
