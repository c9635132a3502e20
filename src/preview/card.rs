//! Preview cards and the sinks that publish them

use crate::preview::Preview;
use crate::EmbedError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Rendered preview for one URL
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewCard {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Site name, shown under the card
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    pub generated_at: DateTime<Utc>,
}

impl PreviewCard {
    /// Builds a card for `url` from a preview; empty fields are left out
    pub fn build(preview: &Preview, url: &str) -> Self {
        fn non_empty(value: &Option<String>) -> Option<String> {
            value.as_ref().filter(|v| !v.is_empty()).cloned()
        }

        Self {
            url: url.to_string(),
            title: non_empty(&preview.title),
            description: non_empty(&preview.description),
            footer: non_empty(&preview.site_name),
            thumbnail: non_empty(&preview.image_url),
            generated_at: Utc::now(),
        }
    }
}

/// Handle to a card that has been published
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CardId(pub u64);

/// Where cards go
///
/// Implemented by the chat-platform side. `post` returns `None` when the card
/// could not be published.
pub trait CardSink: Send + Sync {
    fn post(&self, message_id: u64, card: &PreviewCard) -> Option<CardId>;

    fn retract(&self, card_id: CardId);
}

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum SinkEvent<'a> {
    Post {
        card_id: CardId,
        message_id: u64,
        #[serde(flatten)]
        card: &'a PreviewCard,
    },
    Retract {
        card_id: CardId,
    },
}

/// [`CardSink`] writing one JSON object per event to a writer
pub struct JsonLinesSink<W: Write + Send> {
    out: Mutex<W>,
    next_id: AtomicU64,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
            next_id: AtomicU64::new(1),
        }
    }

    /// Consumes the sink and returns the underlying writer
    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(|e| e.into_inner())
    }

    fn write_event(&self, event: &SinkEvent<'_>) -> Result<(), EmbedError> {
        let line = serde_json::to_string(event)?;
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        writeln!(out, "{}", line)?;
        out.flush()?;
        Ok(())
    }
}

impl<W: Write + Send> CardSink for JsonLinesSink<W> {
    fn post(&self, message_id: u64, card: &PreviewCard) -> Option<CardId> {
        let card_id = CardId(self.next_id.fetch_add(1, Ordering::Relaxed));
        match self.write_event(&SinkEvent::Post {
            card_id,
            message_id,
            card,
        }) {
            Ok(()) => Some(card_id),
            Err(e) => {
                tracing::error!("Failed to write card for {}: {}", card.url, e);
                None
            }
        }
    }

    fn retract(&self, card_id: CardId) {
        if let Err(e) = self.write_event(&SinkEvent::Retract { card_id }) {
            tracing::error!("Failed to write retraction for card {}: {}", card_id.0, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_preview() -> Preview {
        Preview {
            title: Some("Hello".to_string()),
            description: Some("World".to_string()),
            image_url: Some("https://img.example/x.png".to_string()),
            site_name: Some("Site".to_string()),
        }
    }

    #[test]
    fn test_build_copies_fields() {
        let card = PreviewCard::build(&full_preview(), "https://example.com");

        assert_eq!(card.url, "https://example.com");
        assert_eq!(card.title.as_deref(), Some("Hello"));
        assert_eq!(card.description.as_deref(), Some("World"));
        assert_eq!(card.footer.as_deref(), Some("Site"));
        assert_eq!(card.thumbnail.as_deref(), Some("https://img.example/x.png"));
    }

    #[test]
    fn test_build_skips_empty_fields() {
        let preview = Preview {
            title: Some("Only title".to_string()),
            description: Some(String::new()),
            ..Preview::default()
        };
        let card = PreviewCard::build(&preview, "https://example.com");

        assert!(card.description.is_none());
        assert!(card.footer.is_none());
        assert!(card.thumbnail.is_none());
    }

    #[test]
    fn test_json_lines_sink_output() {
        let sink = JsonLinesSink::new(Vec::new());
        let card = PreviewCard::build(&full_preview(), "https://example.com");

        let first = sink.post(7, &card).unwrap();
        let second = sink.post(8, &card).unwrap();
        assert_ne!(first, second);
        sink.retract(first);

        let output = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<serde_json::Value> = output
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["event"], "post");
        assert_eq!(lines[0]["message_id"], 7);
        assert_eq!(lines[0]["title"], "Hello");
        assert_eq!(lines[0]["footer"], "Site");
        assert_eq!(lines[2]["event"], "retract");
        assert_eq!(lines[2]["card_id"], first.0);
    }
}
