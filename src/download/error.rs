//! Error types for the download manager (spec §4.1, §7).
//!
//! Network, HTTP, and timeout failures are never raised as fatal errors;
//! the download manager reports them as fields on a `Result` struct, not as
//! `Err` returns that unwind the caller. `DownloadError` exists so that the
//! manager's internals have a typed way to represent "what kind of failure"
//! before it gets folded into that `Result` struct.

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum DownloadError {
    /// DNS resolution, connection refused, TLS errors, and the like.
    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },

    /// A non-2xx response. The status code is preserved for the caller.
    #[error("HTTP {status} fetching {url}")]
    Http { url: String, status: u16 },

    /// The operation exceeded its time budget
    /// (`timeout_download_request_`/`timeout_crawl_operation_`).
    #[error("timeout fetching {url}")]
    Timeout { url: String },

    /// The translation service returned a non-2xx response or an empty
    /// JSON array.
    #[error("translation service error for {url}: {message}")]
    Translation { url: String, message: String },

    /// robots.txt forbids fetching this URL.
    #[error("robots.txt disallows fetching {url}")]
    RobotsDisallowed { url: String },
}

impl DownloadError {
    pub fn network(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Network {
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn http(url: impl Into<String>, status: u16) -> Self {
        Self::Http {
            url: url.into(),
            status,
        }
    }

    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    pub fn translation(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Translation {
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn robots_disallowed(url: impl Into<String>) -> Self {
        Self::RobotsDisallowed { url: url.into() }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn http_error_preserves_status_code() {
        let err = DownloadError::http("https://example.com/a", 503);
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn network_error_display_contains_url() {
        let err = DownloadError::network("https://example.com/a", "connection refused");
        assert!(err.to_string().contains("https://example.com/a"));
    }
}
