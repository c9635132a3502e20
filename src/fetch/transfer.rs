//! A single fetch attempt: redirects, range header and byte budget

use crate::fetch::guard::check_destination;
use crate::fetch::{FetchError, FetchedPage};
use reqwest::header::{ACCEPT_ENCODING, LOCATION, RANGE};
use reqwest::{Client, Response};
use std::collections::HashSet;
use url::Url;

/// Largest buffer reserved up front, whatever the budget
const INITIAL_BUFFER_CAP: usize = 64 * 1024;

/// Per-transfer knobs shared by every driver
#[derive(Debug, Clone)]
pub(crate) struct TransferSettings {
    pub max_redirects: u32,
    pub block_private_addresses: bool,
}

/// Runs one attempt against `url`
///
/// # Request Flow
///
/// 1. Guard the destination (scheme, private addresses)
/// 2. Send GET, with `Range: bytes=0-{max_bytes-1}` when `use_range` is set
/// 3. On a 3xx with `Location`, resolve the target and go back to 1
///    - More than `max_redirects` hops is `RedirectLimit`
///    - Revisiting a URL is `RedirectLoop`
/// 4. Read the body, keeping at most `max_bytes` and draining the rest
///
/// Non-2xx final responses are returned as pages; the caller judges status.
pub(crate) async fn run_transfer(
    client: &Client,
    settings: &TransferSettings,
    url: &str,
    max_bytes: usize,
    use_range: bool,
) -> Result<FetchedPage, FetchError> {
    let mut current = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
        url: url.to_string(),
        message: e.to_string(),
    })?;

    let mut visited = HashSet::new();
    visited.insert(current.to_string());
    let mut hops: u32 = 0;

    loop {
        check_destination(&current, settings.block_private_addresses).await?;

        let mut request = client.get(current.clone());
        if use_range && max_bytes > 0 {
            // Compressed bodies cut at a byte offset cannot be decoded
            request = request
                .header(RANGE, format!("bytes=0-{}", max_bytes - 1))
                .header(ACCEPT_ENCODING, "identity");
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify_error(e, &current))?;

        if response.status().is_redirection() {
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());

            if let Some(location) = location {
                hops += 1;
                if hops > settings.max_redirects {
                    return Err(FetchError::RedirectLimit {
                        url: url.to_string(),
                    });
                }

                let next = current
                    .join(&location)
                    .map_err(|e| FetchError::InvalidUrl {
                        url: location.clone(),
                        message: e.to_string(),
                    })?;

                if !visited.insert(next.to_string()) {
                    return Err(FetchError::RedirectLoop {
                        url: next.to_string(),
                    });
                }

                tracing::debug!("Redirect {} -> {} (hop {})", current, next, hops);
                current = next;
                continue;
            }
        }

        return read_capped(response, current, max_bytes).await;
    }
}

/// Reads the response body, keeping at most `max_bytes`
async fn read_capped(
    mut response: Response,
    url: Url,
    max_bytes: usize,
) -> Result<FetchedPage, FetchError> {
    let status_code = response.status().as_u16();
    let mut content = Vec::with_capacity(max_bytes.min(INITIAL_BUFFER_CAP));
    let mut truncated = false;

    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| classify_error(e, &url))?
    {
        let room = max_bytes.saturating_sub(content.len());
        if chunk.len() > room {
            truncated = true;
        }
        content.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    Ok(FetchedPage {
        content,
        status_code,
        effective_url: url.to_string(),
        truncated,
    })
}

fn classify_error(error: reqwest::Error, url: &Url) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else if error.is_connect() {
        FetchError::Unreachable {
            url: url.to_string(),
            message: "Connection refused".to_string(),
        }
    } else {
        FetchError::Unreachable {
            url: url.to_string(),
            message: error.to_string(),
        }
    }
}
