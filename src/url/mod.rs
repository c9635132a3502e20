//! URL handling module for link-embed
//!
//! This module provides URL extraction from message text, cleanup of the
//! punctuation that chat text tends to glue onto links, resolution of
//! relative image URLs, and optional image proxying.

mod extract;
mod proxy;
mod resolve;

pub use extract::{clean_url, extract_urls};
pub use proxy::proxy_image;
pub use resolve::resolve_against;

use crate::{UrlError, UrlResult};
use url::Url;

/// Parses a URL and checks that it is an absolute `http` or `https` URL with a host
///
/// # Examples
///
/// ```
/// use link_embed::url::parse_http_url;
///
/// assert!(parse_http_url("https://example.com/a").is_ok());
/// assert!(parse_http_url("ftp://example.com/a").is_err());
/// ```
pub fn parse_http_url(input: &str) -> UrlResult<Url> {
    let url = Url::parse(input).map_err(|e| UrlError::Parse(format!("{}: {}", input, e)))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(UrlError::InvalidScheme(other.to_string())),
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(UrlError::MissingHost);
    }

    Ok(url)
}
