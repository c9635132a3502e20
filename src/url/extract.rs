use regex::Regex;
use std::sync::OnceLock;

fn url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"https?://[^\s<>"']+"#).expect("valid URL regex"))
}

/// Finds every `http(s)://` link in a piece of message text
///
/// Links are returned in order of appearance, each cleaned with [`clean_url`].
///
/// # Examples
///
/// ```
/// use link_embed::url::extract_urls;
///
/// let urls = extract_urls("see (https://example.com/path). thanks");
/// assert_eq!(urls, vec!["https://example.com/path".to_string()]);
/// ```
pub fn extract_urls(text: &str) -> Vec<String> {
    url_pattern()
        .find_iter(text)
        .map(|m| clean_url(m.as_str()))
        .filter(|u| !u.is_empty())
        .collect()
}

/// Strips punctuation that belongs to the surrounding sentence
///
/// Trailing `] , . ! ? ; :` are removed, as is a trailing `)` whenever the URL
/// has more closing than opening parentheses. Balanced links such as
/// `https://en.wikipedia.org/wiki/Rust_(programming_language)` survive.
pub fn clean_url(raw: &str) -> String {
    let mut url = raw;

    loop {
        let Some(last) = url.chars().last() else {
            break;
        };

        let strip = match last {
            ']' | ',' | '.' | '!' | '?' | ';' | ':' => true,
            ')' => url.matches(')').count() > url.matches('(').count(),
            _ => false,
        };

        if !strip {
            break;
        }
        url = &url[..url.len() - last.len_utf8()];
    }

    url.to_string()
}
