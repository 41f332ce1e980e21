//! Error types for outbound HTTP requests.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while fetching a listing page, article, or image.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request did not complete within the configured timeout.
    #[error("timeout fetching {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// The server answered with a non-2xx status.
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// Server-requested delay from a `Retry-After` header, if any.
        retry_after: Option<Duration>,
    },

    /// Transport-level failure (DNS, connection refused, TLS, body read).
    #[error("network error fetching {url}: {source}")]
    Network {
        /// The URL being fetched.
        url: String,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },

    /// The URL could not be parsed or is not http(s).
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The offending URL string.
        url: String,
    },

    /// A configured header value is not valid HTTP.
    #[error("invalid {name} header value: {value:?}")]
    InvalidHeader {
        /// Header name.
        name: &'static str,
        /// Rejected value.
        value: String,
    },

    /// The HTTP client itself could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl FetchError {
    /// Classifies a reqwest error as a timeout or a generic network failure.
    pub fn from_reqwest(url: impl Into<String>, source: reqwest::Error) -> Self {
        let url = url.into();
        if source.is_timeout() {
            Self::Timeout { url }
        } else {
            Self::Network { url, source }
        }
    }

    /// Creates an HTTP status error without a `Retry-After` hint.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after: None,
        }
    }

    /// Whether a retry has a reasonable chance of succeeding.
    ///
    /// Timeouts, transport errors, 408, 429 and 5xx are transient; every
    /// other status, bad URLs, and client construction failures are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Network { .. } => true,
            Self::HttpStatus { status, .. } => {
                *status == 408 || *status == 429 || (500..600).contains(status)
            }
            Self::InvalidUrl { .. } | Self::InvalidHeader { .. } | Self::Client(_) => false,
        }
    }

    /// The server-requested delay, when one was sent.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::HttpStatus { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
