//! Identity normalization: canonical keys and noise-prefix variants.

/// Historical code prefixes that some sources put in front of a product id.
pub const NOISE_PREFIXES: &[&str] = &["tac-", "m-", "c-", "t-", "r-", "rc", "tc"];

/// Case-folded key with every non-alphanumeric character removed.
pub fn normalize(raw_id: &str) -> String {
    raw_id
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Lower-cased id with one noise prefix removed, for every prefix in the
/// table that applies. Separators inside the remainder are kept.
pub fn prefix_stripped_forms(raw_id: &str, prefixes: &[&str]) -> Vec<String> {
    let lower = raw_id.trim().to_lowercase();
    let mut out: Vec<String> = Vec::new();
    for prefix in prefixes {
        if let Some(rest) = lower.strip_prefix(prefix) {
            let rest = rest.trim_start_matches(['-', '_', ' ']);
            if !rest.is_empty() && !out.iter().any(|o| o == rest) {
                out.push(rest.to_string());
            }
        }
    }
    out
}

/// Canonical key first, then the keys of every prefix-stripped form, in
/// table order and without duplicates.
pub fn normalize_with_prefix_variants(raw_id: &str) -> Vec<String> {
    variants_with(raw_id, NOISE_PREFIXES)
}

pub fn variants_with(raw_id: &str, prefixes: &[&str]) -> Vec<String> {
    let mut keys = vec![normalize(raw_id)];
    for form in prefix_stripped_forms(raw_id, prefixes) {
        let key = normalize(&form);
        if !key.is_empty() && !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}

/// Lower-case product id as stored in the catalog.
pub fn catalog_id(raw_id: &str) -> String {
    raw_id.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_folds_case_and_strips_separators() {
        assert_eq!(normalize("C-331"), "c331");
        assert_eq!(normalize("  os_24 "), "os24");
        assert_eq!(normalize("TAC-734G"), "tac734g");
        assert_eq!(normalize("--"), "");
    }

    #[test]
    fn variants_keep_canonical_key_first() {
        assert_eq!(normalize_with_prefix_variants("M-OS24"), vec!["mos24", "os24"]);
        assert_eq!(normalize_with_prefix_variants("c331"), vec!["c331"]);
        assert_eq!(normalize_with_prefix_variants("TC-453"), vec!["tc453", "453"]);
    }

    #[test]
    fn tac_prefix_wins_over_shorter_entries() {
        assert_eq!(prefix_stripped_forms("TAC-734G", NOISE_PREFIXES), vec!["734g"]);
        assert_eq!(prefix_stripped_forms("t-461", NOISE_PREFIXES), vec!["461"]);
    }

    #[test]
    fn normalization_is_pure() {
        let a = normalize_with_prefix_variants("R-529");
        let b = normalize_with_prefix_variants("R-529");
        assert_eq!(a, b);
    }
}
