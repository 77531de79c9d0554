//! Per-domain rate limiting for the download manager (spec §4.1).
//!
//! For each origin domain, the delay before the next request is randomized
//! in `[default_delay_for_domain, max_delay_for_domain]`; a `Crawl-delay`
//! directive discovered in the domain's `robots.txt` raises the effective
//! floor of that range (via [`RateLimiter::observe_crawl_delay`]).
//!
//! Requests may proceed concurrently across domains; a single domain is
//! serialized by its own `tokio::sync::Mutex`, never by a lock held across
//! domains.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;

use crate::config::DownloadDelayParams;

const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

#[derive(Debug)]
struct DomainState {
    last_request: Mutex<Option<Instant>>,
    crawl_delay_floor_ms: AtomicU64,
    cumulative_delay_ms: AtomicU64,
}

impl DomainState {
    fn new() -> Self {
        Self {
            last_request: Mutex::new(None),
            crawl_delay_floor_ms: AtomicU64::new(0),
            cumulative_delay_ms: AtomicU64::new(0),
        }
    }
}

/// Per-domain delay enforcement, shared across the download manager's
/// worker pools via `Arc`.
#[derive(Debug)]
pub struct RateLimiter {
    delay_params: DownloadDelayParams,
    domains: DashMap<String, Arc<DomainState>>,
}

impl RateLimiter {
    pub fn new(delay_params: DownloadDelayParams) -> Self {
        Self {
            delay_params,
            domains: DashMap::new(),
        }
    }

    fn state_for(&self, domain: &str) -> Arc<DomainState> {
        Arc::clone(
            self.domains
                .entry(domain.to_string())
                .or_insert_with(|| Arc::new(DomainState::new()))
                .value(),
        )
    }

    /// Raises the floor of the delay range for `domain` to at least
    /// `crawl_delay`, as discovered from the domain's `robots.txt`.
    pub fn observe_crawl_delay(&self, domain: &str, crawl_delay: Duration) {
        let state = self.state_for(domain);
        #[allow(clippy::cast_possible_truncation)]
        let ms = crawl_delay.as_millis() as u64;
        state.crawl_delay_floor_ms.fetch_max(ms, Ordering::SeqCst);
    }

    /// Blocks until it is this caller's turn to issue a request to `url`'s
    /// domain, sleeping as needed to satisfy the randomized per-domain delay.
    pub async fn acquire(&self, url: &Url) {
        let Some(domain) = url.host_str() else {
            return;
        };
        let domain = domain.to_string();
        let state = self.state_for(&domain);

        let default_ms = self.delay_params.default_delay_for_domain(&domain);
        let max_ms = self
            .delay_params
            .max_delay_for_domain(&domain)
            .max(default_ms);
        let floor_ms = state.crawl_delay_floor_ms.load(Ordering::SeqCst);
        let low = default_ms.max(floor_ms);
        let high = max_ms.max(low);

        let delay_ms = if low >= high {
            low
        } else {
            rand::thread_rng().gen_range(low..=high)
        };
        let delay = Duration::from_millis(delay_ms);

        let mut last_request = state.last_request.lock().await;
        let now = Instant::now();
        if let Some(last) = *last_request {
            let elapsed = now.duration_since(last);
            if elapsed < delay {
                let remaining = delay - elapsed;
                debug!(domain = %domain, delay_ms = remaining.as_millis(), "rate limit sleep");
                tokio::time::sleep(remaining).await;

                let cumulative = state
                    .cumulative_delay_ms
                    .fetch_add(remaining.as_millis() as u64, Ordering::SeqCst)
                    + remaining.as_millis() as u64;
                if Duration::from_millis(cumulative) > CUMULATIVE_DELAY_WARNING_THRESHOLD {
                    warn!(domain = %domain, cumulative_ms = cumulative, "domain has accumulated a large rate-limit delay this run");
                }
            }
        }
        *last_request = Some(Instant::now());
    }

    pub fn domain_of(url: &Url) -> Option<String> {
        url.host_str().map(str::to_string)
    }
}
