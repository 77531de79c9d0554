//! Thin `reqwest` wrapper shared by every harvest operator and the
//! translation-service client.
//!
//! One [`HttpClient`] is created per process and reused across requests so
//! connection pooling applies; per-request overrides (user agent, timeout)
//! are passed explicitly rather than baked into the client, since both vary
//! per group/journal.

use std::time::Duration;

use reqwest::{Client, ClientBuilder};

const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 15;

/// Lightweight wrapper over `reqwest::Client`, kept mainly so the rest of
/// the crate depends on this module rather than on `reqwest` directly.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        let client = ClientBuilder::new()
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .gzip(true)
            .cookie_store(true)
            .build()
            .expect("failed to build HTTP client with static configuration");
        Self { client }
    }

    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }

    pub fn get(&self, url: &str, user_agent: &str, timeout: Duration) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .header(reqwest::header::USER_AGENT, user_agent)
            .timeout(timeout)
    }

    pub fn post(&self, url: &str, user_agent: &str, timeout: Duration) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header(reqwest::header::USER_AGENT, user_agent)
            .timeout(timeout)
    }
}
