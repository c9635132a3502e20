//! Progressive HTTP fetcher
//!
//! This module retrieves a bounded prefix of a web page:
//! - Range requests so servers send only the bytes we will read
//! - Client-side truncation for servers that ignore `Range`
//! - Manual redirect handling with a hop limit and loop detection
//! - An SSRF guard applied to the initial URL and every redirect hop
//! - Many transfers multiplexed on a small set of I/O driver tasks
//!
//! Completion is reported through a callback. Each request carries an opaque
//! context value that is handed back untouched in its [`FetchResult`].

mod engine;
mod guard;
mod transfer;

pub use engine::{build_http_client, FetchCallback, Fetcher, FetcherSettings};
pub use guard::{check_destination, is_private_address};

use thiserror::Error;

/// Why a fetch attempt produced no content
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// SSRF guard trip or disallowed scheme; never retried
    #[error("Blocked request to {url}: {reason}")]
    Blocked { url: String, reason: String },

    #[error("Request timeout for {url}")]
    Timeout { url: String },

    /// DNS, connection, TLS or body read failure
    #[error("Unreachable {url}: {message}")]
    Unreachable { url: String, message: String },

    #[error("Too many redirects from {url}")]
    RedirectLimit { url: String },

    #[error("Redirect loop detected at {url}")]
    RedirectLoop { url: String },

    #[error("Invalid URL {url}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("Fetcher is shutting down")]
    ShuttingDown,
}

impl FetchError {
    /// True for SSRF rejections, which callers must not treat as transient
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }
}

/// Content retrieved by a successful attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    /// At most the requested byte budget
    pub content: Vec<u8>,
    pub status_code: u16,
    /// URL of the final response after redirects
    pub effective_url: String,
    /// More bytes arrived than the budget allowed
    pub truncated: bool,
}

impl FetchedPage {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Outcome of one fetch attempt plus the caller's context
#[derive(Debug)]
pub struct FetchResult<C> {
    pub outcome: Result<FetchedPage, FetchError>,
    pub context: C,
}
