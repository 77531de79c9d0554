//! Per-journal configuration (§3 `JournalParams`).

use std::collections::HashSet;

use regex::Regex;

use super::metadata::{MarcMetadataParams, ZoteroMetadataParams};

/// Which harvest operator is dispatched for this journal. The authoritative
/// set is exactly these five (spec §9 open question resolution).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarvesterOperation {
    Direct,
    Rss,
    Crawl,
    ApiQuery,
    Email,
}

impl HarvesterOperation {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "DIRECT" => Some(Self::Direct),
            "RSS" => Some(Self::Rss),
            "CRAWL" => Some(Self::Crawl),
            "APIQUERY" => Some(Self::ApiQuery),
            "EMAIL" => Some(Self::Email),
            _ => None,
        }
    }
}

/// Whether, and how, a journal's output should be uploaded to the union
/// catalog. Affects only the driver's CLI reporting; it does not change
/// harvesting/conversion behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOperation {
    None,
    Test,
    Live,
}

impl UploadOperation {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "NONE" => Some(Self::None),
            "TEST" => Some(Self::Test),
            "LIVE" => Some(Self::Live),
            _ => None,
        }
    }
}

/// §4.4.1 language resolution mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanguageMode {
    Default,
    ForceLanguages,
    ForceDetection,
    ForceFromTranslator,
}

impl LanguageMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "DEFAULT" => Some(Self::Default),
            "FORCE_LANGUAGES" => Some(Self::ForceLanguages),
            "FORCE_DETECTION" => Some(Self::ForceDetection),
            "FORCE_FROM_TRANSLATOR" => Some(Self::ForceFromTranslator),
            _ => None,
        }
    }
}

/// Which text is consulted when language detection is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceTextFields {
    Title,
    Abstract,
    TitleAndAbstract,
}

impl Default for SourceTextFields {
    fn default() -> Self {
        Self::Title
    }
}

#[derive(Debug, Clone, Default)]
pub struct LanguageParams {
    pub expected_languages: HashSet<String>,
    pub source_text_fields: SourceTextFields,
    pub mode: LanguageMode,
}

impl Default for LanguageMode {
    fn default() -> Self {
        Self::Default
    }
}

#[derive(Debug, Clone, Default)]
pub struct CrawlParams {
    pub max_depth: u32,
    pub extraction_regex: Option<Regex>,
    pub crawl_url_regex: Option<Regex>,
}

/// The paged-RSS extension (§9 design note, implemented as
/// `harvest::operators::PagedFeedOperator`).
#[derive(Debug, Clone, Default)]
pub struct PagedFeedParams {
    pub enabled: bool,
    pub page_size: u32,
    pub page_range: Vec<u32>,
    pub delay_ms: u64,
}

/// Online/print identifier pair. At least one of the two must be complete
/// (both ISSN and PPN set); §3 invariant.
#[derive(Debug, Clone, Default)]
pub struct IssnPpnPair {
    pub online_issn: Option<String>,
    pub online_ppn: Option<String>,
    pub print_issn: Option<String>,
    pub print_ppn: Option<String>,
}

impl IssnPpnPair {
    pub fn online_complete(&self) -> bool {
        self.online_issn.is_some() && self.online_ppn.is_some()
    }

    pub fn print_complete(&self) -> bool {
        self.print_issn.is_some() && self.print_ppn.is_some()
    }
}

/// §3 `JournalParams`.
#[derive(Debug, Clone)]
pub struct JournalParams {
    pub zeder_id: u64,
    pub zeder_instance: String,
    pub name: String,
    pub group: String,
    pub subgroup: Option<String>,
    pub entry_point_url: String,
    pub harvester_operation: HarvesterOperation,
    pub upload_operation: UploadOperation,
    pub identifiers: IssnPpnPair,
    pub strptime_format_string: Option<String>,
    pub update_window_days: u32,
    pub review_regex: Option<Regex>,
    pub notes_regex: Option<Regex>,
    pub language_params: LanguageParams,
    pub crawl_params: CrawlParams,
    pub personalized_authors: bool,
    pub zotero_metadata_params: ZoteroMetadataParams,
    pub marc_metadata_params: MarcMetadataParams,
    pub selective_evaluation: bool,
    pub emailcrawl_subject_regex: Option<Regex>,
    pub ssg: Option<String>,
    pub license: Option<String>,
    pub paged_feed: PagedFeedParams,
}

impl JournalParams {
    /// §3 invariant: at least one complete ISSN+PPN pair.
    pub fn has_complete_identifier_pair(&self) -> bool {
        self.identifiers.online_complete() || self.identifiers.print_complete()
    }
}
