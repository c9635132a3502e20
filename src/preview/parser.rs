//! HTML metadata parser
//!
//! Reads the document title and the Open Graph / Twitter Card `<meta>` tags
//! found in `<head>`.
//!
//! # Field Sources
//!
//! | Field | Sources, in order of preference |
//! |-------|---------------------------------|
//! | title | `<title>`, `og:title`, `twitter:title` |
//! | description | first of `og:description`, `twitter:description`, `description` |
//! | image | first of `og:image`, `og:image:url`, `og:image:secure_url`, `twitter:image`, `twitter:image:src` |
//! | site name | `og:site_name` |

use crate::preview::{MetadataParser, Preview};
use scraper::{Html, Selector};

/// [`MetadataParser`] built on `scraper`
///
/// # Example
///
/// ```
/// use link_embed::preview::HtmlMetadataParser;
/// use link_embed::MetadataParser;
///
/// let html = br#"<html><head><title>Test</title></head><body></body></html>"#;
/// let preview = HtmlMetadataParser.parse(html).unwrap();
/// assert_eq!(preview.title.as_deref(), Some("Test"));
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlMetadataParser;

impl HtmlMetadataParser {
    pub fn new() -> Self {
        Self
    }
}

impl MetadataParser for HtmlMetadataParser {
    fn parse(&self, content: &[u8]) -> Option<Preview> {
        // A range fetch can split a multi-byte character at the tail
        let html = String::from_utf8_lossy(content);
        parse_metadata(&html)
    }
}

/// Parses an HTML document into a [`Preview`]
fn parse_metadata(html: &str) -> Option<Preview> {
    let document = Html::parse_document(html);

    let mut preview = Preview {
        title: extract_title(&document),
        ..Preview::default()
    };

    let meta_selector = Selector::parse("head meta").ok()?;
    for element in document.select(&meta_selector) {
        let attrs = element.value();
        let key = attrs
            .attr("property")
            .filter(|p| !p.is_empty())
            .or_else(|| attrs.attr("name"))
            .unwrap_or("");
        let content = attrs.attr("content").unwrap_or("");

        if key.is_empty() || content.is_empty() {
            continue;
        }

        apply_meta(&mut preview, &key.to_ascii_lowercase(), content);
    }

    if preview.is_empty() {
        None
    } else {
        Some(preview)
    }
}

/// Extracts the page title from the HTML document
fn extract_title(document: &Html) -> Option<String> {
    let title_selector = Selector::parse("title").ok()?;

    document
        .select(&title_selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn apply_meta(preview: &mut Preview, key: &str, content: &str) {
    let slot = match key {
        "og:title" | "twitter:title" => &mut preview.title,
        "og:description" | "twitter:description" | "description" => &mut preview.description,
        "og:image" | "og:image:url" | "og:image:secure_url" | "twitter:image"
        | "twitter:image:src" => &mut preview.image_url,
        "og:site_name" => &mut preview.site_name,
        _ => return,
    };

    if slot.is_none() {
        *slot = Some(content.to_string());
    }
}
