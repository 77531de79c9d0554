//! The download manager (spec §4.1): the five harvest-fetch operations,
//! wired to the shared rate limiter, robots cache, response cache, and
//! translation client.
//!
//! One [`DownloadManager`] is shared (via `Arc`) across every dispatcher
//! worker; all of its state is either lock-free (`DashMap`) or scoped to a
//! single domain (`tokio::sync::Mutex` inside [`RateLimiter`]).

use std::sync::Arc;
use std::time::Duration;

use mailparse::MailHeaderMap;
use regex::Regex;
use tracing::{instrument, warn};
use url::Url;

use crate::config::GlobalParams;
use crate::model::HarvestableItem;

use super::cache::{CachedResponse, DownloadMode, ResponseCache};
use super::client::HttpClient;
use super::error::DownloadError;
use super::rate_limiter::RateLimiter;
use super::robots::{origin_for_robots, RobotsCache, RobotsDecision};
use super::translation::{RawZoteroItem, TranslationClient};

/// Result of [`DownloadManager::direct_download`]. Network/HTTP/translation
/// failures are reported here rather than raised, per spec §4.1.
#[derive(Debug)]
pub struct DirectDownloadResult {
    pub item: HarvestableItem,
    pub mode: DownloadMode,
    pub body: Option<String>,
    pub items: Vec<RawZoteroItem>,
    pub error: Option<DownloadError>,
}

impl DirectDownloadResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of [`DownloadManager::crawl`]. Children that the crawl spawned as
/// further direct downloads are returned as fresh [`HarvestableItem`]s for
/// the dispatcher to enqueue.
#[derive(Debug)]
pub struct CrawlResult {
    pub num_crawled_successful: usize,
    pub num_crawled_failed: usize,
    pub spawned_items: Vec<HarvestableItem>,
    pub error: Option<DownloadError>,
}

/// Result of [`DownloadManager::feed`].
#[derive(Debug)]
pub struct FeedResult {
    pub spawned_items: Vec<HarvestableItem>,
    pub error: Option<DownloadError>,
}

/// Result of [`DownloadManager::api_query`].
#[derive(Debug)]
pub struct ApiQueryResult {
    pub spawned_items: Vec<HarvestableItem>,
    pub error: Option<DownloadError>,
}

/// Result of [`DownloadManager::email_crawl`].
#[derive(Debug)]
pub struct EmailCrawlResult {
    pub spawned_items: Vec<HarvestableItem>,
    pub error: Option<DownloadError>,
}

pub struct DownloadManager {
    client: HttpClient,
    rate_limiter: RateLimiter,
    robots: RobotsCache,
    cache: ResponseCache,
    translation: TranslationClient,
    ignore_robots: bool,
    timeout_download_request: Duration,
    timeout_crawl_operation: Duration,
}

impl DownloadManager {
    #[must_use]
    pub fn new(global: &GlobalParams, cache_ttl: Duration, ignore_robots: bool) -> Self {
        Self {
            client: HttpClient::new(),
            rate_limiter: RateLimiter::new(global.download_delay.clone()),
            robots: RobotsCache::new(),
            cache: ResponseCache::new(cache_ttl),
            translation: TranslationClient::new(global.translation_server_url.clone()),
            ignore_robots,
            timeout_download_request: Duration::from_secs(global.timeout_download_request_secs),
            timeout_crawl_operation: Duration::from_secs(global.timeout_crawl_operation_secs),
        }
    }

    /// Blocks on the per-domain rate limiter, then checks (and enforces,
    /// unless `ignore_robots` was set) robots.txt, before returning.
    async fn wait_turn(&self, url: &Url) -> Result<(), DownloadError> {
        self.rate_limiter.acquire(url).await;

        let Some(origin) = origin_for_robots(url.as_str()) else {
            return Ok(());
        };
        match self.robots.check_allowed(url.as_str(), &origin, &self.client).await {
            Ok(decision) => {
                if let Some(domain) = RateLimiter::domain_of(url) {
                    if let Some(delay) = self.robots.crawl_delay_for(&origin) {
                        self.rate_limiter.observe_crawl_delay(&domain, delay);
                    }
                }
                if decision == RobotsDecision::Disallowed && !self.ignore_robots {
                    return Err(DownloadError::robots_disallowed(url.as_str()));
                }
                Ok(())
            }
            Err(e) => {
                warn!(url = %url, error = %e, "robots.txt check failed, proceeding without it");
                Ok(())
            }
        }
    }

    #[instrument(skip(self), fields(url = %item.url))]
    pub async fn direct_download(
        &self,
        item: &HarvestableItem,
        user_agent: &str,
        mode: DownloadMode,
    ) -> DirectDownloadResult {
        let url = match Url::parse(&item.url) {
            Ok(u) => u,
            Err(_) => {
                return DirectDownloadResult {
                    item: item.clone(),
                    mode,
                    body: None,
                    items: Vec::new(),
                    error: Some(DownloadError::network(&item.url, "invalid URL")),
                }
            }
        };

        if let Err(e) = self.wait_turn(&url).await {
            return DirectDownloadResult {
                item: item.clone(),
                mode,
                body: None,
                items: Vec::new(),
                error: Some(e),
            };
        }

        let timeout = self.timeout_download_request;
        let fetch_result = self
            .cache
            .get_or_fetch(&item.url, mode, || async {
                self.fetch_raw(&item.url, user_agent, timeout).await
            })
            .await;

        let body = match fetch_result {
            Ok(response) => response.body,
            Err(e) => {
                return DirectDownloadResult {
                    item: item.clone(),
                    mode,
                    body: None,
                    items: Vec::new(),
                    error: Some(e),
                }
            }
        };

        match mode {
            DownloadMode::Raw => DirectDownloadResult {
                item: item.clone(),
                mode,
                body: Some(body),
                items: Vec::new(),
                error: None,
            },
            DownloadMode::Translated => {
                match self
                    .translation
                    .translate(&self.client, &item.url, user_agent, timeout)
                    .await
                {
                    Ok(items) => DirectDownloadResult {
                        item: item.clone(),
                        mode,
                        body: Some(body),
                        items,
                        error: None,
                    },
                    Err(e) => DirectDownloadResult {
                        item: item.clone(),
                        mode,
                        body: Some(body),
                        items: Vec::new(),
                        error: Some(e),
                    },
                }
            }
        }
    }

    async fn fetch_raw(
        &self,
        url: &str,
        user_agent: &str,
        timeout: Duration,
    ) -> Result<CachedResponse, DownloadError> {
        let response = self
            .client
            .get(url, user_agent, timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DownloadError::timeout(url)
                } else {
                    DownloadError::network(url, e.to_string())
                }
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::http(url, status.as_u16()));
        }
        let body = response
            .text()
            .await
            .map_err(|e| DownloadError::network(url, e.to_string()))?;
        Ok(CachedResponse {
            body,
            status: status.as_u16(),
        })
    }

    /// Recursively follows links matching `crawl_url_regex_` up to
    /// `max_crawl_depth_`; pages matching `extraction_regex_` are spawned as
    /// direct-download [`HarvestableItem`]s rather than followed further.
    #[instrument(skip(self), fields(url = %item.url))]
    pub async fn crawl(&self, item: &HarvestableItem, user_agent: &str) -> CrawlResult {
        match tokio::time::timeout(self.timeout_crawl_operation, self.crawl_inner(item, user_agent))
            .await
        {
            Ok(result) => result,
            Err(_) => CrawlResult {
                num_crawled_successful: 0,
                num_crawled_failed: 0,
                spawned_items: Vec::new(),
                error: Some(DownloadError::timeout(&item.url)),
            },
        }
    }

    async fn crawl_inner(&self, item: &HarvestableItem, user_agent: &str) -> CrawlResult {
        let crawl_params = &item.journal.crawl_params;
        let mut visited = std::collections::HashSet::new();
        let mut frontier = vec![(item.url.clone(), 0u32)];
        let mut spawned = Vec::new();
        let mut successful = 0usize;
        let mut failed = 0usize;
        let mut first_error = None;

        while let Some((url, depth)) = frontier.pop() {
            if !visited.insert(url.clone()) {
                continue;
            }
            let synthetic_item = HarvestableItem {
                id: item.id,
                url: url.clone(),
                journal: Arc::clone(&item.journal),
            };
            let result = self
                .direct_download(&synthetic_item, user_agent, DownloadMode::Raw)
                .await;
            let body = match result.body {
                Some(b) => b,
                None => {
                    failed += 1;
                    if first_error.is_none() {
                        first_error = result.error;
                    }
                    continue;
                }
            };
            successful += 1;

            if let Some(extraction_regex) = &crawl_params.extraction_regex {
                if extraction_regex.is_match(&url) {
                    spawned.push(item.journal_factory_placeholder(&url));
                }
            }

            if depth >= crawl_params.max_depth {
                continue;
            }
            for link in extract_links(&body) {
                let absolute = resolve_link(&url, &link);
                let Some(absolute) = absolute else { continue };
                if let Some(crawl_url_regex) = &crawl_params.crawl_url_regex {
                    if !crawl_url_regex.is_match(&absolute) {
                        continue;
                    }
                }
                if !visited.contains(&absolute) {
                    frontier.push((absolute, depth + 1));
                }
            }
        }

        CrawlResult {
            num_crawled_successful: successful,
            num_crawled_failed: failed,
            spawned_items: spawned,
            error: if successful == 0 { first_error } else { None },
        }
    }

    /// Fetches an RSS/Atom feed, optionally iterating pages per the
    /// paged-feed extension, and emits one item per entry whose link
    /// `already_delivered` reports as not-yet-seen.
    #[instrument(skip(self, already_delivered), fields(url = %item.url))]
    pub async fn feed(
        &self,
        item: &HarvestableItem,
        user_agent: &str,
        already_delivered: impl Fn(&str) -> bool,
    ) -> FeedResult {
        let paged = &item.journal.paged_feed;
        let urls_to_fetch: Vec<String> = if paged.enabled {
            if paged.page_range.is_empty() {
                vec![item.url.clone()]
            } else {
                paged
                    .page_range
                    .iter()
                    .map(|page_num| {
                        format!(
                            "{}{}page_size={}&page_num={}",
                            item.url,
                            if item.url.contains('?') { "&" } else { "?" },
                            paged.page_size,
                            page_num
                        )
                    })
                    .collect()
            }
        } else {
            vec![item.url.clone()]
        };

        let mut spawned = Vec::new();
        for url in &urls_to_fetch {
            let parsed = match Url::parse(url) {
                Ok(u) => u,
                Err(_) => continue,
            };
            if let Err(e) = self.wait_turn(&parsed).await {
                return FeedResult {
                    spawned_items: spawned,
                    error: Some(e),
                };
            }
            let body = match self
                .fetch_raw(url, user_agent, self.timeout_download_request)
                .await
            {
                Ok(response) => response.body,
                Err(e) => {
                    return FeedResult {
                        spawned_items: spawned,
                        error: Some(e),
                    }
                }
            };
            let feed = match feed_rs::parser::parse(body.as_bytes()) {
                Ok(feed) => feed,
                Err(e) => {
                    return FeedResult {
                        spawned_items: spawned,
                        error: Some(DownloadError::network(url, format!("feed parse error: {e}"))),
                    }
                }
            };
            for entry in feed.entries {
                let Some(link) = entry.links.first().map(|l| l.href.clone()) else {
                    continue;
                };
                if already_delivered(&link) {
                    continue;
                }
                spawned.push(item.journal_factory_placeholder(&link));
            }
        }

        FeedResult {
            spawned_items: spawned,
            error: None,
        }
    }

    /// Queries an external bibliographic API by the journal's online ISSN
    /// and emits direct-download items for each returned identifier.
    #[instrument(skip(self), fields(journal = %item.journal_name()))]
    pub async fn api_query(&self, item: &HarvestableItem, api_base_url: &str) -> ApiQueryResult {
        let Some(issn) = &item.journal.identifiers.online_issn else {
            return ApiQueryResult {
                spawned_items: Vec::new(),
                error: Some(DownloadError::network(
                    &item.url,
                    "API query requires an online ISSN",
                )),
            };
        };
        let query_url = format!("{}?issn={}", api_base_url.trim_end_matches('/'), issn);
        let parsed = match Url::parse(&query_url) {
            Ok(u) => u,
            Err(_) => {
                return ApiQueryResult {
                    spawned_items: Vec::new(),
                    error: Some(DownloadError::network(&query_url, "invalid API URL")),
                }
            }
        };
        if let Err(e) = self.wait_turn(&parsed).await {
            return ApiQueryResult {
                spawned_items: Vec::new(),
                error: Some(e),
            };
        }

        let body = match self
            .fetch_raw(&query_url, "catalog-harvester", self.timeout_download_request)
            .await
        {
            Ok(response) => response.body,
            Err(e) => {
                return ApiQueryResult {
                    spawned_items: Vec::new(),
                    error: Some(e),
                }
            }
        };

        #[derive(serde::Deserialize)]
        struct ApiResponse {
            #[serde(default)]
            identifiers: Vec<String>,
        }
        let parsed: ApiResponse = match serde_json::from_str(&body) {
            Ok(p) => p,
            Err(e) => {
                return ApiQueryResult {
                    spawned_items: Vec::new(),
                    error: Some(DownloadError::network(
                        &query_url,
                        format!("invalid API response: {e}"),
                    )),
                }
            }
        };

        let spawned = parsed
            .identifiers
            .into_iter()
            .map(|doi| item.journal_factory_placeholder(&format!("https://doi.org/{doi}")))
            .collect();

        ApiQueryResult {
            spawned_items: spawned,
            error: None,
        }
    }

    /// Scans the configured mailbox files for messages whose subject
    /// matches the journal's `emailcrawl_subject_regex_`, extracting links
    /// from the body as harvestable items.
    #[instrument(skip(self, mboxes))]
    #[allow(clippy::expect_used)]
    pub fn email_crawl(&self, item: &HarvestableItem, mboxes: &[String]) -> EmailCrawlResult {
        let Some(subject_regex) = &item.journal.emailcrawl_subject_regex else {
            return EmailCrawlResult {
                spawned_items: Vec::new(),
                error: None,
            };
        };

        let link_regex = Regex::new(r"https?://[^\s<>\x22]+").expect("static regex is valid");
        let mut spawned = Vec::new();
        for mbox_path in mboxes {
            let content = match std::fs::read(mbox_path) {
                Ok(c) => c,
                Err(e) => {
                    return EmailCrawlResult {
                        spawned_items: spawned,
                        error: Some(DownloadError::network(
                            mbox_path,
                            format!("failed to read mbox: {e}"),
                        )),
                    }
                }
            };
            for raw_message in split_mbox(&content) {
                let Ok(parsed) = mailparse::parse_mail(raw_message) else {
                    continue;
                };
                let subject = parsed
                    .headers
                    .get_first_value("Subject")
                    .unwrap_or_default();
                if !subject_regex.is_match(&subject) {
                    continue;
                }
                let body = parsed.get_body().unwrap_or_default();
                for capture in link_regex.find_iter(&body) {
                    spawned.push(item.journal_factory_placeholder(capture.as_str()));
                }
            }
        }

        EmailCrawlResult {
            spawned_items: spawned,
            error: None,
        }
    }
}

/// Splits a concatenated mbox file on `From ` sender lines.
#[allow(clippy::unwrap_used)]
fn split_mbox(content: &[u8]) -> Vec<&[u8]> {
    let text = String::from_utf8_lossy(content);
    let mut messages = Vec::new();
    let mut start = None;
    let mut offset = 0usize;
    for line in text.split_inclusive('\n') {
        if line.starts_with("From ") && start.is_some() {
            let begin = start.unwrap();
            messages.push(&content[begin..offset]);
            start = Some(offset + line.len());
        } else if line.starts_with("From ") && start.is_none() {
            start = Some(offset + line.len());
        }
        offset += line.len();
    }
    if let Some(begin) = start {
        messages.push(&content[begin..]);
    }
    messages
}

#[allow(clippy::expect_used)]
fn extract_links(html: &str) -> Vec<String> {
    let href_regex = Regex::new(r#"href\s*=\s*["']([^"']+)["']"#).expect("static regex is valid");
    href_regex
        .captures_iter(html)
        .map(|c| c[1].to_string())
        .collect()
}

fn resolve_link(base: &str, link: &str) -> Option<String> {
    let base_url = Url::parse(base).ok()?;
    base_url.join(link).ok().map(|u| u.to_string())
}

impl HarvestableItem {
    /// Builds a synthetic sibling item sharing this item's journal, used
    /// when a crawl/feed/API/mailbox operation spawns new URLs. The id is
    /// a placeholder; the dispatcher reassigns a real id from the
    /// journal's [`crate::model::HarvestableItemFactory`] before enqueuing.
    fn journal_factory_placeholder(&self, url: &str) -> HarvestableItem {
        HarvestableItem {
            id: 0,
            url: url.to_string(),
            journal: Arc::clone(&self.journal),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn extract_links_finds_href_attributes() {
        let html = r#"<a href="/article/1">one</a> <a href='/article/2'>two</a>"#;
        let links = extract_links(html);
        assert_eq!(links, vec!["/article/1", "/article/2"]);
    }

    #[test]
    fn resolve_link_makes_relative_links_absolute() {
        let resolved = resolve_link("https://example.org/toc", "/article/1").unwrap();
        assert_eq!(resolved, "https://example.org/article/1");
    }

    #[test]
    fn split_mbox_separates_on_from_lines() {
        let mbox = b"From a@b 1\nSubject: one\n\nbody one\nFrom c@d 2\nSubject: two\n\nbody two\n";
        let messages = split_mbox(mbox);
        assert_eq!(messages.len(), 2);
    }
}
