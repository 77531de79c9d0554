//! Parameters shared by every group, subgroup, and journal (§3 `GlobalParams`).

use regex::Regex;

use super::metadata::{MarcMetadataParams, ZoteroMetadataParams};

/// Default/max per-domain download delay, with optional per-domain
/// overrides for each bound (§3 `DownloadDelayParams`).
#[derive(Debug, Clone)]
pub struct DownloadDelayParams {
    pub default_delay_ms: u64,
    pub max_delay_ms: u64,
    pub domain_default_overrides: std::collections::HashMap<String, u64>,
    pub domain_max_overrides: std::collections::HashMap<String, u64>,
}

impl DownloadDelayParams {
    pub fn default_delay_for_domain(&self, domain: &str) -> u64 {
        self.domain_default_overrides
            .get(domain)
            .copied()
            .unwrap_or(self.default_delay_ms)
    }

    pub fn max_delay_for_domain(&self, domain: &str) -> u64 {
        self.domain_max_overrides
            .get(domain)
            .copied()
            .unwrap_or(self.max_delay_ms)
    }
}

impl Default for DownloadDelayParams {
    fn default() -> Self {
        Self {
            default_delay_ms: 0,
            max_delay_ms: 0,
            domain_default_overrides: Default::default(),
            domain_max_overrides: Default::default(),
        }
    }
}

/// §3 `GlobalParams`.
#[derive(Debug, Clone)]
pub struct GlobalParams {
    pub translation_server_url: String,
    pub api_query_base_url: String,
    pub emailcrawl_mboxes: Vec<String>,
    pub enhancement_maps_directory: Option<String>,
    pub skip_online_first_articles_unconditionally: bool,
    pub download_delay: DownloadDelayParams,
    pub timeout_crawl_operation_secs: u64,
    pub timeout_download_request_secs: u64,
    pub review_regex: Option<Regex>,
    pub notes_regex: Option<Regex>,
    pub zotero_metadata_params: ZoteroMetadataParams,
    pub marc_metadata_params: MarcMetadataParams,
    pub concurrency: ConcurrencyParams,
}

/// Per-pool worker caps (spec §5: "distinct worker pools for direct
/// downloads, crawls, feeds, conversions"), plus the dispatcher's own
/// per-journal budget (spec §4.2: "a bounded concurrency budget").
#[derive(Debug, Clone, Copy)]
pub struct ConcurrencyParams {
    pub max_concurrent_journals: usize,
    pub max_concurrent_direct_downloads: usize,
    pub max_concurrent_crawls: usize,
    pub max_concurrent_feeds: usize,
    pub max_concurrent_conversions: usize,
}

impl Default for ConcurrencyParams {
    fn default() -> Self {
        Self {
            max_concurrent_journals: 4,
            max_concurrent_direct_downloads: 8,
            max_concurrent_crawls: 4,
            max_concurrent_feeds: 4,
            max_concurrent_conversions: 8,
        }
    }
}
