use url::Url;

/// Resolves a possibly relative URL found in a page against the page's URL
///
/// - absolute `http://` / `https://` candidates are returned unchanged
/// - protocol-relative `//host/path` candidates get `https:`
/// - anything else is joined with `base` per RFC 3986
///
/// If `base` cannot be parsed the candidate is returned as-is.
///
/// # Examples
///
/// ```
/// use link_embed::url::resolve_against;
///
/// let base = "https://example.com/path/page.html";
/// assert_eq!(resolve_against(base, "/img/a.png"), "https://example.com/img/a.png");
/// assert_eq!(resolve_against(base, "img/a.png"), "https://example.com/path/img/a.png");
/// ```
pub fn resolve_against(base: &str, candidate: &str) -> String {
    if candidate.is_empty() {
        return String::new();
    }

    if candidate.starts_with("http://") || candidate.starts_with("https://") {
        return candidate.to_string();
    }

    if candidate.starts_with("//") {
        return format!("https:{}", candidate);
    }

    match Url::parse(base).and_then(|b| b.join(candidate)) {
        Ok(resolved) => resolved.to_string(),
        Err(e) => {
            tracing::debug!("Could not resolve {} against {}: {}", candidate, base, e);
            candidate.to_string()
        }
    }
}
