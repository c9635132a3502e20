//! Integration tests for the preview pipeline
//!
//! These tests use wiremock to create mock HTTP servers and drive messages
//! through the orchestrator end-to-end.

use link_embed::config::Config;
use link_embed::preview::{CardId, CardSink};
use link_embed::{
    HtmlMetadataParser, InboundMessage, ManualClock, MessageId, Orchestrator, PreviewCard,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Sink that remembers everything it was asked to do
#[derive(Default)]
struct RecordingSink {
    posted: Mutex<Vec<(MessageId, PreviewCard)>>,
    retracted: Mutex<Vec<CardId>>,
}

impl RecordingSink {
    fn cards(&self) -> Vec<(MessageId, PreviewCard)> {
        self.posted.lock().unwrap().clone()
    }
}

impl CardSink for RecordingSink {
    fn post(&self, message_id: MessageId, card: &PreviewCard) -> Option<CardId> {
        let mut posted = self.posted.lock().unwrap();
        posted.push((message_id, card.clone()));
        Some(CardId(posted.len() as u64))
    }

    fn retract(&self, card_id: CardId) {
        self.retracted.lock().unwrap().push(card_id);
    }
}

/// Creates a configuration suited to a local mock server
fn create_test_config() -> Config {
    let mut config = Config::default();
    config.embed.delay_seconds = 0;
    config.rate_limit.requests_per_second = 10.0;
    config.http.timeout_ms = 2000;
    config.http.block_private_addresses = false;
    config.workers.max_concurrency = 2;
    config
}

fn start_pipeline(
    config: &Config,
    clock: Arc<ManualClock>,
) -> (Orchestrator, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let orchestrator = Orchestrator::with_components(
        config,
        Arc::clone(&sink) as Arc<dyn CardSink>,
        clock,
        Arc::new(HtmlMetadataParser::new()),
    )
    .expect("Failed to start pipeline");
    (orchestrator, sink)
}

async fn settle(orchestrator: &Orchestrator) {
    tokio::time::timeout(Duration::from_secs(10), orchestrator.wait_idle())
        .await
        .expect("pipeline did not go idle");
}

fn article(title: &str) -> String {
    format!(
        r#"<html><head>
        <title>{}</title>
        <meta property="og:description" content="About {}">
        <meta property="og:site_name" content="Mock Site">
        </head><body><p>Body</p></body></html>"#,
        title, title
    )
}

async fn mount_article(server: &MockServer, route: &str, title: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(article(title))
                .insert_header("content-type", "text/html"),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_rate_limit_with_frozen_clock() {
    let server = MockServer::start().await;
    mount_article(&server, "/a", "A").await;
    mount_article(&server, "/b", "B").await;
    mount_article(&server, "/c", "C").await;

    let mut config = create_test_config();
    config.rate_limit.requests_per_second = 2.0;
    let clock = Arc::new(ManualClock::new());
    let (orchestrator, sink) = start_pipeline(&config, Arc::clone(&clock));

    for (id, route) in [(1, "/a"), (2, "/b")] {
        let message = InboundMessage::new(id, format!("look {}{}", server.uri(), route));
        assert!(orchestrator.on_message(&message).unwrap());
    }
    settle(&orchestrator).await;

    // Bucket is empty and the clock does not move: the third URL is dropped
    let third = InboundMessage::new(3, format!("{}/c", server.uri()));
    orchestrator.on_message(&third).unwrap();
    settle(&orchestrator).await;

    let cards = sink.cards();
    assert_eq!(cards.len(), 2);
    assert!(cards.iter().all(|(id, _)| *id != 3));

    // One second refills the bucket
    clock.advance(Duration::from_secs(1));
    let retry = InboundMessage::new(4, format!("{}/c", server.uri()));
    orchestrator.on_message(&retry).unwrap();
    settle(&orchestrator).await;

    let cards = sink.cards();
    assert_eq!(cards.len(), 3);
    let (id, card) = &cards[2];
    assert_eq!(*id, 4);
    assert_eq!(card.title.as_deref(), Some("C"));
    assert_eq!(card.description.as_deref(), Some("About C"));
    assert_eq!(card.footer.as_deref(), Some("Mock Site"));

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_cache_hit_skips_fetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cached"))
        .respond_with(ResponseTemplate::new(200).set_body_string(article("Cached")))
        .expect(1)
        .mount(&server)
        .await;

    let config = create_test_config();
    let (orchestrator, sink) = start_pipeline(&config, Arc::new(ManualClock::new()));
    let url = format!("{}/cached", server.uri());

    orchestrator
        .on_message(&InboundMessage::new(1, url.clone()))
        .unwrap();
    settle(&orchestrator).await;
    assert!(orchestrator.cache().get(&url).is_some());

    orchestrator
        .on_message(&InboundMessage::new(2, format!("again: {}", url)))
        .unwrap();
    settle(&orchestrator).await;

    let cards = sink.cards();
    assert_eq!(cards.len(), 2);
    assert_eq!(cards[1].1.title.as_deref(), Some("Cached"));

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_expired_cache_entry_is_refetched() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ttl"))
        .respond_with(ResponseTemplate::new(200).set_body_string(article("Fresh")))
        .expect(2)
        .mount(&server)
        .await;

    let mut config = create_test_config();
    config.cache.ttl_minutes = 1;
    let clock = Arc::new(ManualClock::new());
    let (orchestrator, sink) = start_pipeline(&config, Arc::clone(&clock));
    let url = format!("{}/ttl", server.uri());

    orchestrator
        .on_message(&InboundMessage::new(1, url.clone()))
        .unwrap();
    settle(&orchestrator).await;

    clock.advance(Duration::from_secs(61));
    orchestrator
        .on_message(&InboundMessage::new(2, url.clone()))
        .unwrap();
    settle(&orchestrator).await;

    assert_eq!(sink.cards().len(), 2);
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_progressive_growth_stops_at_cap() {
    let server = MockServer::start().await;
    // No metadata anywhere, and larger than every budget
    let body = format!("<html><body>{}</body></html>", "x".repeat(64 * 1024));

    for budget in [1024usize, 2048, 4096, 8192, 16384] {
        Mock::given(method("GET"))
            .and(path("/big"))
            .and(header("range", format!("bytes=0-{}", budget - 1).as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_string(body.clone()))
            .expect(1)
            .mount(&server)
            .await;
    }

    let mut config = create_test_config();
    config.http.initial_range_bytes = 1024;
    config.http.max_html_bytes = 16384;
    config.http.range_growth_factor = 2.0;
    let (orchestrator, sink) = start_pipeline(&config, Arc::new(ManualClock::new()));

    orchestrator
        .on_message(&InboundMessage::new(1, format!("{}/big", server.uri())))
        .unwrap();
    settle(&orchestrator).await;

    assert!(sink.cards().is_empty());
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 5);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_full_partial_responses_grow_to_cap() {
    let server = MockServer::start().await;
    let body = format!("<html><body>{}</body></html>", "x".repeat(64 * 1024));

    // Each range is honoured with exactly the bytes asked for
    for budget in [1024usize, 2048, 4096, 8192, 16384] {
        Mock::given(method("GET"))
            .and(path("/ranged"))
            .and(header("range", format!("bytes=0-{}", budget - 1).as_str()))
            .respond_with(
                ResponseTemplate::new(206)
                    .insert_header(
                        "content-range",
                        format!("bytes 0-{}/{}", budget - 1, body.len()).as_str(),
                    )
                    .set_body_string(body[..budget].to_string()),
            )
            .expect(1)
            .mount(&server)
            .await;
    }

    let mut config = create_test_config();
    config.http.initial_range_bytes = 1024;
    config.http.max_html_bytes = 16384;
    config.http.range_growth_factor = 2.0;
    let (orchestrator, sink) = start_pipeline(&config, Arc::new(ManualClock::new()));

    orchestrator
        .on_message(&InboundMessage::new(1, format!("{}/ranged", server.uri())))
        .unwrap();
    settle(&orchestrator).await;

    assert!(sink.cards().is_empty());
    assert_eq!(server.received_requests().await.unwrap().len(), 5);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_short_partial_response_stops_growth() {
    let server = MockServer::start().await;
    let body = "<html><body>tiny</body></html>";
    Mock::given(method("GET"))
        .and(path("/short-range"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header(
                    "content-range",
                    format!("bytes 0-{}/{}", body.len() - 1, body.len()).as_str(),
                )
                .set_body_string(body),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut config = create_test_config();
    config.http.initial_range_bytes = 1024;
    config.http.max_html_bytes = 16384;
    let (orchestrator, sink) = start_pipeline(&config, Arc::new(ManualClock::new()));

    orchestrator
        .on_message(&InboundMessage::new(1, format!("{}/short-range", server.uri())))
        .unwrap();
    settle(&orchestrator).await;

    assert!(sink.cards().is_empty());
    assert_eq!(server.received_requests().await.unwrap().len(), 1);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_progressive_growth_finds_late_title() {
    let server = MockServer::start().await;
    let body = format!(
        "<html><head><!-- {} --><title>Late</title></head><body></body></html>",
        "p".repeat(1500)
    );
    Mock::given(method("GET"))
        .and(path("/late"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .expect(2)
        .mount(&server)
        .await;

    let mut config = create_test_config();
    config.http.initial_range_bytes = 1024;
    config.http.max_html_bytes = 64 * 1024;
    let (orchestrator, sink) = start_pipeline(&config, Arc::new(ManualClock::new()));

    orchestrator
        .on_message(&InboundMessage::new(1, format!("{}/late", server.uri())))
        .unwrap();
    settle(&orchestrator).await;

    let cards = sink.cards();
    assert_eq!(cards.len(), 1);
    assert_eq!(cards[0].1.title.as_deref(), Some("Late"));

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_complete_page_without_metadata_is_not_refetched() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bare"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html><body>hi</body></html>"))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = create_test_config();
    config.http.initial_range_bytes = 1024;
    let (orchestrator, sink) = start_pipeline(&config, Arc::new(ManualClock::new()));

    orchestrator
        .on_message(&InboundMessage::new(1, format!("{}/bare", server.uri())))
        .unwrap();
    settle(&orchestrator).await;

    assert!(sink.cards().is_empty());
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_redirect_caches_both_urls_and_resolves_image() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/short"))
        .respond_with(ResponseTemplate::new(301).insert_header("Location", "/articles/long"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/articles/long"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<html><head><title>Long</title>
            <meta property="og:image" content="img/cover.png"></head></html>"#,
        ))
        .mount(&server)
        .await;

    let config = create_test_config();
    let (orchestrator, sink) = start_pipeline(&config, Arc::new(ManualClock::new()));
    let short = format!("{}/short", server.uri());
    let long = format!("{}/articles/long", server.uri());

    orchestrator
        .on_message(&InboundMessage::new(1, short.clone()))
        .unwrap();
    settle(&orchestrator).await;

    let cards = sink.cards();
    assert_eq!(cards.len(), 1);
    assert_eq!(cards[0].1.url, short);
    assert_eq!(
        cards[0].1.thumbnail.as_deref(),
        Some(format!("{}/articles/img/cover.png", server.uri()).as_str())
    );

    assert!(orchestrator.cache().get(&short).is_some());
    assert!(orchestrator.cache().get(&long).is_some());

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_error_status_yields_no_card() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_string(article("Missing")))
        .expect(1)
        .mount(&server)
        .await;

    let config = create_test_config();
    let (orchestrator, sink) = start_pipeline(&config, Arc::new(ManualClock::new()));

    orchestrator
        .on_message(&InboundMessage::new(1, format!("{}/gone", server.uri())))
        .unwrap();
    settle(&orchestrator).await;

    assert!(sink.cards().is_empty());
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_private_address_never_contacted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(article("Internal")))
        .expect(0)
        .mount(&server)
        .await;

    let mut config = create_test_config();
    config.http.block_private_addresses = true;
    let (orchestrator, sink) = start_pipeline(&config, Arc::new(ManualClock::new()));

    orchestrator
        .on_message(&InboundMessage::new(1, format!("{}/admin", server.uri())))
        .unwrap();
    orchestrator
        .on_message(&InboundMessage::new(
            2,
            "http://169.254.169.254/latest/meta-data/",
        ))
        .unwrap();
    settle(&orchestrator).await;

    assert!(sink.cards().is_empty());
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_embed_during_grace_period_cancels() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(article("Too late")))
        .expect(0)
        .mount(&server)
        .await;

    let mut config = create_test_config();
    config.embed.delay_seconds = 1;
    let (orchestrator, sink) = start_pipeline(&config, Arc::new(ManualClock::new()));

    let message = InboundMessage::new(1, format!("{}/post", server.uri()));
    orchestrator.on_message(&message).unwrap();
    assert_eq!(orchestrator.pending_jobs(), 1);

    orchestrator.on_message_updated(&InboundMessage {
        has_embeds: true,
        ..message
    });
    assert_eq!(orchestrator.pending_jobs(), 0);

    // Past the original deadline
    tokio::time::sleep(Duration::from_millis(1200)).await;
    settle(&orchestrator).await;

    assert!(sink.cards().is_empty());
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_late_embed_retracts_card() {
    let server = MockServer::start().await;
    mount_article(&server, "/news", "News").await;

    let config = create_test_config();
    let (orchestrator, sink) = start_pipeline(&config, Arc::new(ManualClock::new()));

    let message = InboundMessage::new(9, format!("{}/news", server.uri()));
    orchestrator.on_message(&message).unwrap();
    settle(&orchestrator).await;
    assert_eq!(sink.cards().len(), 1);

    orchestrator.on_message_updated(&InboundMessage {
        has_embeds: true,
        ..message
    });

    assert_eq!(*sink.retracted.lock().unwrap(), vec![CardId(1)]);
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_urls_in_message_fetched_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/dup"))
        .respond_with(ResponseTemplate::new(200).set_body_string(article("Dup")))
        .expect(1)
        .mount(&server)
        .await;

    let config = create_test_config();
    let (orchestrator, sink) = start_pipeline(&config, Arc::new(ManualClock::new()));
    let url = format!("{}/dup", server.uri());

    orchestrator
        .on_message(&InboundMessage::new(1, format!("{} and again {}.", url, url)))
        .unwrap();
    settle(&orchestrator).await;

    assert_eq!(sink.cards().len(), 1);
    orchestrator.shutdown().await;
}
