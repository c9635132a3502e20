use crate::config::ImageProxyConfig;
use url::Url;

const DEFAULT_PROXY_BASE: &str = "https://images.weserv.nl";

/// Rewrites an image URL to go through the configured image proxy
///
/// An image is proxied when the proxy is enabled and either its host contains
/// one of the configured host patterns or the URL points at a
/// `viewimage.php` endpoint. Hosts that refuse hotlinking are the usual reason
/// to list them. Every other URL is returned unchanged.
pub fn proxy_image(image_url: &str, config: &ImageProxyConfig) -> String {
    if image_url.is_empty() || !config.enabled {
        return image_url.to_string();
    }

    let host = match Url::parse(image_url) {
        Ok(parsed) => match parsed.host_str() {
            Some(h) => h.to_ascii_lowercase(),
            None => return image_url.to_string(),
        },
        Err(_) => return image_url.to_string(),
    };

    let host_listed = config
        .hosts
        .iter()
        .filter(|pattern| !pattern.is_empty())
        .any(|pattern| host.contains(pattern.to_ascii_lowercase().as_str()));

    if !host_listed && !image_url.contains("viewimage.php") {
        return image_url.to_string();
    }

    let base = if config.base.is_empty() {
        DEFAULT_PROXY_BASE
    } else {
        config.base.trim_end_matches('/')
    };

    let mut proxied = format!("{}?url={}", base, urlencoding::encode(image_url));
    if !config.query.is_empty() {
        proxied.push('&');
        proxied.push_str(&config.query);
    }
    proxied
}
