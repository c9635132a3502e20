//! Preview model, HTML metadata extraction and card rendering
//!
//! - [`Preview`] is the structured summary of a page
//! - [`MetadataParser`] turns a (possibly truncated) byte buffer into a preview
//! - [`PreviewCard`] and [`CardSink`] are the user-visible side of the pipeline

mod card;
mod parser;

pub use card::{CardId, CardSink, JsonLinesSink, PreviewCard};
pub use parser::HtmlMetadataParser;

use serde::{Deserialize, Serialize};

/// Structured summary of a fetched document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preview {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_name: Option<String>,
}

impl Preview {
    /// True when no field carries any content
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.image_url.is_none()
            && self.site_name.is_none()
    }
}

/// Extracts a [`Preview`] from raw document bytes
///
/// Returning `None` means the buffer did not contain enough to build a
/// preview. For a truncated buffer the caller may retry with more bytes.
pub trait MetadataParser: Send + Sync {
    fn parse(&self, content: &[u8]) -> Option<Preview>;
}
