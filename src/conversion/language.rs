//! Language resolution (spec §4.4.1).
//!
//! Inputs: the zotero-reported language (possibly absent), the journal's
//! `expected_languages_`, `language_mode_`, and `source_text_fields_`.
//! Detection against an external service is modeled as a trait so tests can
//! supply a fake; the n-gram fallback uses `whatlang` directly, limited to
//! the journal's expected set.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::config::{JournalParams, LanguageMode, SourceTextFields};
use crate::model::MetadataRecord;

/// Maps common ISO 639-1 codes to the 3-letter codes this crate stores
/// everywhere else. Unrecognized codes are dropped per spec step 1.
#[must_use]
pub fn normalize_to_3letter(code: &str) -> Option<String> {
    let lower = code.trim().to_ascii_lowercase();
    if lower.len() == 3 {
        return Some(lower);
    }
    let mapped = match lower.as_str() {
        "en" => "eng",
        "de" => "ger",
        "fr" => "fre",
        "es" => "spa",
        "it" => "ita",
        "pt" => "por",
        "nl" => "dut",
        "ru" => "rus",
        "pl" => "pol",
        "zh" => "chi",
        "ja" => "jpn",
        _ => return None,
    };
    Some(mapped.to_string())
}

/// Collaborator interface for the external language-detection service
/// named in spec §6/§4.4.1. Out of scope to implement here; this crate
/// depends only on the contract.
#[async_trait]
pub trait LanguageDetector: Send + Sync {
    async fn detect(&self, text: &str, candidates: &HashSet<String>) -> Option<String>;
}

/// Detector that always fails, forcing the n-gram fallback. Useful as a
/// default when no external service is configured.
pub struct UnavailableDetector;

#[async_trait]
impl LanguageDetector for UnavailableDetector {
    async fn detect(&self, _text: &str, _candidates: &HashSet<String>) -> Option<String> {
        None
    }
}

/// `whatlang`-based n-gram fallback, limited to `expected_languages`.
fn detect_with_ngram(text: &str, expected_languages: &HashSet<String>) -> Option<String> {
    let info = whatlang::detect(text)?;
    let code = iso6393_from_whatlang(info.lang());
    if expected_languages.contains(code) {
        Some(code.to_string())
    } else {
        None
    }
}

fn iso6393_from_whatlang(lang: whatlang::Lang) -> &'static str {
    lang.code()
}

fn source_text(record: &MetadataRecord, fields: SourceTextFields) -> String {
    match fields {
        SourceTextFields::Title => record.title.clone(),
        SourceTextFields::Abstract => record.abstract_note.clone(),
        SourceTextFields::TitleAndAbstract => {
            format!("{} {}", record.title, record.abstract_note)
        }
    }
}

/// Applies the §4.4.1 algorithm in place, mutating `record.languages`.
pub async fn resolve(
    record: &mut MetadataRecord,
    journal: &JournalParams,
    detector: &dyn LanguageDetector,
) {
    let zotero_reported: Vec<String> = record
        .languages
        .iter()
        .filter_map(|l| normalize_to_3letter(l))
        .collect();
    record.languages = zotero_reported;

    let expected = &journal.language_params.expected_languages;

    if journal.language_params.mode == LanguageMode::ForceLanguages {
        record.languages = expected.iter().cloned().collect();
        return;
    }

    if expected.is_empty() {
        return;
    }

    let detected = if expected.len() == 1 {
        expected.iter().next().cloned()
    } else {
        let text = source_text(record, journal.language_params.source_text_fields);
        match detector.detect(&text, expected).await {
            Some(lang) => Some(lang),
            None => detect_with_ngram(&text, expected),
        }
    };

    if journal.language_params.mode == LanguageMode::ForceDetection {
        record.languages = match detected {
            Some(lang) if expected.contains(&lang) => vec![lang],
            _ => Vec::new(),
        };
        return;
    }

    match record.languages.len() {
        0 => {
            if let Some(lang) = detected {
                record.languages = vec![lang];
            }
        }
        1 => {
            if Some(record.languages[0].clone()) != detected {
                record.languages.clear();
            }
        }
        _ => record.languages.clear(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::{CrawlParams, HarvesterOperation, IssnPpnPair, LanguageParams, PagedFeedParams, UploadOperation};
    use crate::config::{MarcMetadataParams, ZoteroMetadataParams};

    fn journal_with(mode: LanguageMode, expected: &[&str], source_text_fields: SourceTextFields) -> JournalParams {
        JournalParams {
            zeder_id: 1,
            zeder_instance: "ixtheo".to_string(),
            name: "J".to_string(),
            group: "G".to_string(),
            subgroup: None,
            entry_point_url: "https://example.org".to_string(),
            harvester_operation: HarvesterOperation::Direct,
            upload_operation: UploadOperation::None,
            identifiers: IssnPpnPair::default(),
            strptime_format_string: None,
            update_window_days: 0,
            review_regex: None,
            notes_regex: None,
            language_params: LanguageParams {
                expected_languages: expected.iter().map(|s| s.to_string()).collect(),
                source_text_fields,
                mode,
            },
            crawl_params: CrawlParams::default(),
            personalized_authors: false,
            zotero_metadata_params: ZoteroMetadataParams::default(),
            marc_metadata_params: MarcMetadataParams::default(),
            selective_evaluation: false,
            emailcrawl_subject_regex: None,
            ssg: None,
            license: None,
            paged_feed: PagedFeedParams::default(),
        }
    }

    #[tokio::test]
    async fn force_languages_sets_verbatim() {
        let journal = journal_with(LanguageMode::ForceLanguages, &["eng", "ger"], SourceTextFields::Title);
        let mut record = MetadataRecord::new();
        resolve(&mut record, &journal, &UnavailableDetector).await;
        let mut langs = record.languages;
        langs.sort();
        assert_eq!(langs, vec!["eng".to_string(), "ger".to_string()]);
    }

    #[tokio::test]
    async fn empty_expected_languages_is_a_no_op() {
        let journal = journal_with(LanguageMode::Default, &[], SourceTextFields::Title);
        let mut record = MetadataRecord::new();
        record.languages = vec!["fre".to_string()];
        resolve(&mut record, &journal, &UnavailableDetector).await;
        assert_eq!(record.languages, vec!["fre".to_string()]);
    }

    #[tokio::test]
    async fn single_expected_language_is_treated_as_detected() {
        let journal = journal_with(LanguageMode::Default, &["eng"], SourceTextFields::Title);
        let mut record = MetadataRecord::new();
        resolve(&mut record, &journal, &UnavailableDetector).await;
        assert_eq!(record.languages, vec!["eng".to_string()]);
    }

    #[tokio::test]
    async fn conflicting_zotero_language_is_cleared() {
        let journal = journal_with(LanguageMode::Default, &["eng"], SourceTextFields::Title);
        let mut record = MetadataRecord::new();
        record.languages = vec!["ger".to_string()];
        resolve(&mut record, &journal, &UnavailableDetector).await;
        assert!(record.languages.is_empty());
    }

    #[tokio::test]
    async fn matching_zotero_language_is_kept() {
        let journal = journal_with(LanguageMode::Default, &["eng", "ger"], SourceTextFields::Title);
        let mut record = MetadataRecord::new();
        record.languages = vec!["eng".to_string()];
        resolve(&mut record, &journal, &UnavailableDetector).await;
        assert_eq!(record.languages, vec!["eng".to_string()]);
    }

    #[test]
    fn normalize_drops_unrecognized_codes() {
        assert_eq!(normalize_to_3letter("xx"), None);
        assert_eq!(normalize_to_3letter("en"), Some("eng".to_string()));
        assert_eq!(normalize_to_3letter("eng"), Some("eng".to_string()));
    }
}
