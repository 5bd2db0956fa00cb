//! Record matcher: links secondary records to the authoritative ids.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use pcat_core::{LinkedRecord, MatchResult, MatchStrength, SourceRecord};
use serde::Serialize;

use crate::normalize::{catalog_id, normalize, variants_with, NOISE_PREFIXES};
use crate::overrides::OverrideTable;
use crate::validate::fuzzy_ratio;

/// Shortest normalized key allowed to take part in substring matching.
pub const MIN_FUZZY_KEY_LEN: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrphanReason {
    NoCandidate,
    Ambiguous { candidates: Vec<String> },
    UnknownLinkTarget { product_id: String },
    EmptyKey,
}

impl fmt::Display for OrphanReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrphanReason::NoCandidate => f.write_str("no matching product"),
            OrphanReason::Ambiguous { candidates } => write!(f, "ambiguous: {}", candidates.join(", ")),
            OrphanReason::UnknownLinkTarget { product_id } => write!(f, "explicit link to unknown product {product_id}"),
            OrphanReason::EmptyKey => f.write_str("identifier normalizes to an empty key"),
        }
    }
}

/// A secondary record that could not be linked to any authoritative id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrphanedSourceRecord {
    pub source_id: String,
    pub raw_id: String,
    pub reason: OrphanReason,
}

/// An authoritative record whose key collided with an earlier one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateAuthoritative {
    pub raw_id: String,
    pub index: usize,
    pub kept_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    pub results: Vec<MatchResult>,
    pub orphans: Vec<OrphanedSourceRecord>,
    pub duplicates: Vec<DuplicateAuthoritative>,
}

impl MatchOutcome {
    /// Links per strength; `unmatched` counts products with no secondary link.
    pub fn counts(&self) -> BTreeMap<MatchStrength, usize> {
        let mut counts = BTreeMap::new();
        for result in &self.results {
            if result.linked.is_empty() {
                *counts.entry(MatchStrength::Unmatched).or_insert(0) += 1;
            }
            for link in &result.linked {
                *counts.entry(link.strength).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Share of links that only matched by substring.
    pub fn fuzzy_ratio(&self) -> f64 {
        fuzzy_ratio(&self.counts())
    }
}

struct AuthorityEntry {
    key: String,
    variants: Vec<String>,
}

pub struct RecordMatcher<'a> {
    overrides: &'a OverrideTable,
    prefixes: &'a [&'a str],
    min_fuzzy_len: usize,
}

impl<'a> RecordMatcher<'a> {
    pub fn new(overrides: &'a OverrideTable) -> Self {
        Self {
            overrides,
            prefixes: NOISE_PREFIXES,
            min_fuzzy_len: MIN_FUZZY_KEY_LEN,
        }
    }

    pub fn with_min_fuzzy_len(mut self, len: usize) -> Self {
        self.min_fuzzy_len = len;
        self
    }

    /// One result per distinct authoritative key, in authoritative order.
    /// Secondary records are linked in the order given.
    pub fn link(&self, authoritative: Vec<SourceRecord>, secondary: Vec<SourceRecord>) -> MatchOutcome {
        let mut outcome = MatchOutcome::default();
        let mut entries: Vec<AuthorityEntry> = Vec::new();
        let mut by_key: HashMap<String, usize> = HashMap::new();
        let mut by_id: HashMap<String, usize> = HashMap::new();

        for record in authoritative {
            let key = normalize(&record.raw_id);
            if key.is_empty() {
                outcome.orphans.push(OrphanedSourceRecord {
                    source_id: record.source_id.clone(),
                    raw_id: record.raw_id.clone(),
                    reason: OrphanReason::EmptyKey,
                });
                continue;
            }
            if let Some(&existing) = by_key.get(&key) {
                outcome.duplicates.push(DuplicateAuthoritative {
                    raw_id: record.raw_id.clone(),
                    index: record.index,
                    kept_id: catalog_id(&outcome.results[existing].authoritative.raw_id),
                });
                continue;
            }
            let position = outcome.results.len();
            by_key.insert(key.clone(), position);
            by_id.insert(catalog_id(&record.raw_id), position);
            entries.push(AuthorityEntry {
                key: key.clone(),
                variants: variants_with(&record.raw_id, self.prefixes),
            });
            outcome.results.push(MatchResult {
                canonical_key: key,
                authoritative: record,
                linked: Vec::new(),
            });
        }

        for record in secondary {
            match self.find(&record, &entries, &by_key, &by_id) {
                Ok((position, strength)) => outcome.results[position].linked.push(LinkedRecord { strength, record }),
                Err(reason) => outcome.orphans.push(OrphanedSourceRecord {
                    source_id: record.source_id.clone(),
                    raw_id: record.raw_id.clone(),
                    reason,
                }),
            }
        }

        outcome
    }

    fn find(
        &self,
        record: &SourceRecord,
        entries: &[AuthorityEntry],
        by_key: &HashMap<String, usize>,
        by_id: &HashMap<String, usize>,
    ) -> Result<(usize, MatchStrength), OrphanReason> {
        if let Some(product_id) = self.overrides.link_for(&record.source_id, &record.raw_id) {
            return by_id
                .get(&product_id)
                .map(|&p| (p, MatchStrength::Exact))
                .ok_or(OrphanReason::UnknownLinkTarget { product_id });
        }

        let key = normalize(&record.raw_id);
        if key.is_empty() {
            return Err(OrphanReason::EmptyKey);
        }
        if let Some(&position) = by_key.get(&key) {
            return Ok((position, MatchStrength::Exact));
        }

        let variants = variants_with(&record.raw_id, self.prefixes);
        let by_variant = candidates(entries, |entry| {
            entry.variants.iter().any(|v| variants.contains(v))
        });
        if let Some(found) = single(by_variant, entries, MatchStrength::Normalized)? {
            return Ok(found);
        }

        let min = self.min_fuzzy_len;
        let by_substring = candidates(entries, |entry| {
            let (short, long) = if key.len() <= entry.key.len() {
                (key.as_str(), entry.key.as_str())
            } else {
                (entry.key.as_str(), key.as_str())
            };
            short.len() >= min && contains_on_boundary(long, short)
        });
        match single(by_substring, entries, MatchStrength::Fuzzy)? {
            Some(found) => Ok(found),
            None => Err(OrphanReason::NoCandidate),
        }
    }
}

fn candidates(entries: &[AuthorityEntry], mut pred: impl FnMut(&AuthorityEntry) -> bool) -> Vec<usize> {
    entries
        .iter()
        .enumerate()
        .filter(|(_, e)| pred(e))
        .map(|(i, _)| i)
        .collect()
}

fn single(
    found: Vec<usize>,
    entries: &[AuthorityEntry],
    strength: MatchStrength,
) -> Result<Option<(usize, MatchStrength)>, OrphanReason> {
    match found.as_slice() {
        [] => Ok(None),
        [one] => Ok(Some((*one, strength))),
        many => Err(OrphanReason::Ambiguous {
            candidates: many.iter().map(|&i| entries[i].key.clone()).collect(),
        }),
    }
}

/// Substring containment that refuses to split a run of digits, so `os24`
/// never matches inside `os245`.
pub fn contains_on_boundary(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    let starts_digit = needle.chars().next().is_some_and(|c| c.is_ascii_digit());
    let ends_digit = needle.chars().next_back().is_some_and(|c| c.is_ascii_digit());
    haystack.match_indices(needle).any(|(start, _)| {
        let end = start + needle.len();
        let before = haystack[..start].chars().next_back();
        let after = haystack[end..].chars().next();
        let splits_before = starts_digit && before.is_some_and(|c| c.is_ascii_digit());
        let splits_after = ends_digit && after.is_some_and(|c| c.is_ascii_digit());
        !splits_before && !splits_after
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcat_core::SourceKind;

    fn auth(ids: &[&str]) -> Vec<SourceRecord> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| SourceRecord::new("curated", SourceKind::Curated, i, *id))
            .collect()
    }

    fn sec(source: &str, ids: &[&str]) -> Vec<SourceRecord> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| SourceRecord::new(source, SourceKind::Scraped, i, *id))
            .collect()
    }

    fn strength_of(outcome: &MatchOutcome, id: &str) -> Vec<MatchStrength> {
        outcome
            .results
            .iter()
            .find(|r| r.authoritative.raw_id == id)
            .map(|r| r.linked.iter().map(|l| l.strength).collect())
            .unwrap_or_default()
    }

    #[test]
    fn case_and_hyphen_differences_are_exact_key_matches() {
        let overrides = OverrideTable::default();
        let outcome = RecordMatcher::new(&overrides).link(auth(&["c331"]), sec("legacy", &["C-331"]));
        assert_eq!(strength_of(&outcome, "c331"), vec![MatchStrength::Exact]);
        assert!(outcome.orphans.is_empty());
    }

    #[test]
    fn noise_prefix_variants_match_as_normalized() {
        let overrides = OverrideTable::default();
        let outcome = RecordMatcher::new(&overrides).link(auth(&["os24", "tc453"]), sec("legacy", &["M-OS24", "453"]));
        assert_eq!(strength_of(&outcome, "os24"), vec![MatchStrength::Normalized]);
        assert_eq!(strength_of(&outcome, "tc453"), vec![MatchStrength::Normalized]);
    }

    #[test]
    fn substring_match_is_fuzzy_and_guarded() {
        let overrides = OverrideTable::default();
        let outcome = RecordMatcher::new(&overrides).link(
            auth(&["os2", "os24", "c1000"]),
            sec("scraped", &["os24-hybrid", "os245", "os2x"]),
        );
        assert_eq!(strength_of(&outcome, "os24"), vec![MatchStrength::Fuzzy]);
        assert!(strength_of(&outcome, "os2").is_empty(), "short keys never match by substring");
        let orphaned: Vec<_> = outcome.orphans.iter().map(|o| o.raw_id.as_str()).collect();
        assert_eq!(orphaned, vec!["os245", "os2x"]);
        assert!((outcome.fuzzy_ratio() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn ambiguous_substring_becomes_an_orphan() {
        let overrides = OverrideTable::default();
        let outcome = RecordMatcher::new(&overrides).link(auth(&["t461", "t461hd"]), sec("scraped", &["t461hd-black"]));
        assert_eq!(outcome.orphans.len(), 1);
        assert!(matches!(outcome.orphans[0].reason, OrphanReason::Ambiguous { .. }));
    }

    #[test]
    fn explicit_links_resolve_ambiguity() {
        let overrides = OverrideTable::from_yaml(
            "links:\n  - { source_id: scraped, raw_id: t461hd-black, product_id: t461hd }\n  - { source_id: scraped, raw_id: gone, product_id: nope }\n",
        )
        .unwrap();
        let outcome = RecordMatcher::new(&overrides).link(auth(&["t461", "t461hd"]), sec("scraped", &["t461hd-black", "gone"]));
        assert_eq!(strength_of(&outcome, "t461hd"), vec![MatchStrength::Exact]);
        assert_eq!(outcome.orphans.len(), 1);
        assert!(matches!(outcome.orphans[0].reason, OrphanReason::UnknownLinkTarget { .. }));
    }

    #[test]
    fn duplicate_authoritative_keys_keep_the_first() {
        let overrides = OverrideTable::default();
        let outcome = RecordMatcher::new(&overrides).link(auth(&["c331", "C-331", "os24"]), Vec::new());
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.duplicates.len(), 1);
        assert_eq!(outcome.duplicates[0].kept_id, "c331");
        assert_eq!(outcome.counts().get(&MatchStrength::Unmatched), Some(&2));
        assert_eq!(outcome.fuzzy_ratio(), 0.0);
    }

    #[test]
    fn boundary_guard_only_applies_to_digit_runs() {
        assert!(contains_on_boundary("os24hybrid", "os24"));
        assert!(!contains_on_boundary("os245", "os24"));
        assert!(!contains_on_boundary("1331", "331"));
        assert!(contains_on_boundary("c331", "331"));
        assert!(contains_on_boundary("sealant", "seal"));
    }
}
