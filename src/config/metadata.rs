//! Field-filter configuration shared by the zotero layer (§4.3) and the
//! catalog/MARC layer (§4.4 step 7-8).
//!
//! The source config format expresses these as several parallel maps keyed
//! by `"tag+subfield"` strings (one map per filter kind). Per spec §9's
//! REDESIGN FLAGS, this is modeled here as a single tagged union so that a
//! given field has exactly one filter attached to it rather than being
//! scattered across five lookups.

use std::collections::HashMap;

use regex::Regex;

/// One filter attached to a field, keyed by field name (zotero layer) or by
/// `(tag, subfield)` (MARC layer, see [`MarcMetadataParams`]).
#[derive(Debug, Clone)]
pub enum FieldFilter {
    /// `suppress(field, regex)` — replace the value with an empty string if
    /// it matches `regex`.
    Suppress(Regex),
    /// `override(field, pattern)` — replace the value with `pattern`; the
    /// literal token `%org%` in `pattern` is substituted with the original
    /// value before replacement.
    Override(String),
    /// `exclude(field, regex)` — if this matches any leaf value, the whole
    /// item/record is dropped.
    Exclude(Regex),
    /// `rewrite(field, regex, replacement)` — replace regex matches with
    /// `replacement`.
    Rewrite(Regex, String),
    /// MARC-layer only: add the field unconditionally, with the given
    /// subfield value.
    Add(String),
    /// MARC-layer only: add the field only if `test_field` matches `regex`,
    /// using `replacement` as the value to insert.
    AddConditional {
        test_field: String,
        matcher: Regex,
        replacement: String,
    },
    /// MARC-layer only: remove the field/subfield unconditionally.
    Remove,
}

impl FieldFilter {
    pub fn apply_suppress(&self, value: &str) -> Option<String> {
        match self {
            Self::Suppress(re) if re.is_match(value) => Some(String::new()),
            _ => None,
        }
    }

    pub fn apply_override(&self, original: &str) -> Option<String> {
        match self {
            Self::Override(pattern) => Some(pattern.replace("%org%", original)),
            _ => None,
        }
    }

    pub fn matches_exclude(&self, value: &str) -> bool {
        matches!(self, Self::Exclude(re) if re.is_match(value))
    }

    pub fn apply_rewrite(&self, value: &str) -> Option<String> {
        match self {
            Self::Rewrite(re, replacement) => Some(re.replace_all(value, replacement.as_str()).into_owned()),
            _ => None,
        }
    }
}

/// Post-processing filters applied to the raw translation-service JSON
/// (§4.3), keyed by zotero field name. A journal's, group's, and the
/// global params' maps are consulted together; journal overrides group
/// overrides global.
#[derive(Debug, Clone, Default)]
pub struct ZoteroMetadataParams {
    pub filters: HashMap<String, Vec<FieldFilter>>,
}

impl ZoteroMetadataParams {
    pub fn merged(global: &Self, group: &Self, journal: &Self) -> Self {
        let mut filters: HashMap<String, Vec<FieldFilter>> = HashMap::new();
        for params in [global, group, journal] {
            for (field, list) in &params.filters {
                filters.entry(field.clone()).or_default().extend(list.iter().cloned());
            }
        }
        Self { filters }
    }

    pub fn for_field(&self, field: &str) -> &[FieldFilter] {
        self.filters.get(field).map_or(&[], Vec::as_slice)
    }
}

/// Post-processing filters applied to the assembled catalog record (§4.4
/// steps 7-8), keyed by `(tag, subfield)`. Subfield `'*'` means "the whole
/// field" (used by `fields_to_add`/`fields_to_remove`/exclusion filters that
/// operate at field granularity rather than subfield granularity).
#[derive(Debug, Clone, Default)]
pub struct MarcMetadataParams {
    pub filters: HashMap<(String, char), Vec<FieldFilter>>,
}

impl MarcMetadataParams {
    pub fn merged(global: &Self, group: &Self, journal: &Self) -> Self {
        let mut filters: HashMap<(String, char), Vec<FieldFilter>> = HashMap::new();
        for params in [global, group, journal] {
            for (key, list) in &params.filters {
                filters.entry(key.clone()).or_default().extend(list.iter().cloned());
            }
        }
        Self { filters }
    }

    pub fn for_field(&self, tag: &str, subfield: char) -> &[FieldFilter] {
        self.filters
            .get(&(tag.to_string(), subfield))
            .map_or(&[], Vec::as_slice)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn override_substitutes_org_token() {
        let filter = FieldFilter::Override("[%org%]".to_string());
        assert_eq!(filter.apply_override("Hello").as_deref(), Some("[Hello]"));
    }

    #[test]
    fn suppress_only_matches_filter_kind() {
        let filter = FieldFilter::Override("x".to_string());
        assert_eq!(filter.apply_suppress("Hello"), None);
    }

    #[test]
    fn rewrite_replaces_all_matches() {
        let filter = FieldFilter::Rewrite(Regex::new("a+").unwrap(), "b".to_string());
        assert_eq!(filter.apply_rewrite("aaXaa").as_deref(), Some("bXb"));
    }

    #[test]
    fn merged_concatenates_filters_from_all_three_levels() {
        let mut global = ZoteroMetadataParams::default();
        global
            .filters
            .insert("title".to_string(), vec![FieldFilter::Add("x".to_string())]);
        let group = ZoteroMetadataParams::default();
        let mut journal = ZoteroMetadataParams::default();
        journal
            .filters
            .insert("title".to_string(), vec![FieldFilter::Remove]);

        let merged = ZoteroMetadataParams::merged(&global, &group, &journal);
        assert_eq!(merged.for_field("title").len(), 2);
    }
}
