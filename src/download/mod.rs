//! Download manager (spec §4.1): harvest-fetch operations, per-domain rate
//! limiting, robots.txt enforcement, response caching, and the translation
//! service client.

mod cache;
mod client;
mod error;
mod manager;
mod rate_limiter;
mod robots;
mod translation;

pub use cache::{CachedResponse, DownloadMode, ResponseCache, ResponseCacheStats, DEFAULT_CACHE_TTL};
pub use client::HttpClient;
pub use error::DownloadError;
pub use manager::{
    ApiQueryResult, CrawlResult, DirectDownloadResult, DownloadManager, EmailCrawlResult,
    FeedResult,
};
pub use rate_limiter::RateLimiter;
pub use robots::{origin_for_robots, RobotsCache, RobotsDecision, RobotsError};
pub use translation::{to_metadata_record, RawCreator, RawTag, RawZoteroItem, TranslationClient};
