//! Pipeline orchestration
//!
//! The orchestrator turns chat events into preview cards:
//! - Registering one delayed job per message
//! - Cancelling it when the platform attaches its own embed or the message
//!   is deleted, and retracting any card already posted
//! - Running each URL through rate limit, cache and progressive fetch
//! - Caching parsed previews and posting cards through a [`CardSink`]

use crate::cache::MetadataCache;
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, HttpConfig, ImageProxyConfig};
use crate::fetch::{FetchError, FetchResult, Fetcher, FetcherSettings};
use crate::limiter::RateLimiter;
use crate::pipeline::progressive::{first_attempt, next_attempt};
use crate::pipeline::{DelayScheduler, InboundMessage, MessageId, WorkerPool};
use crate::preview::{CardId, CardSink, HtmlMetadataParser, MetadataParser, Preview, PreviewCard};
use crate::url::{extract_urls, parse_http_url, proxy_image, resolve_against};
use lru::LruCache;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How many messages' posted cards and supersession marks are remembered
const MESSAGE_MEMORY: usize = 4096;

/// Poll interval of [`Orchestrator::wait_idle`]
const IDLE_POLL: Duration = Duration::from_millis(25);

/// Keeps the orchestrator busy while any copy is alive
///
/// One is created per scheduled message and shared by the job and every
/// fetch it starts, so dropping the last copy means the message is finished,
/// cancelled or discarded.
struct WorkGuard {
    active: Arc<AtomicUsize>,
}

impl WorkGuard {
    fn new(active: &Arc<AtomicUsize>) -> Arc<Self> {
        active.fetch_add(1, Ordering::SeqCst);
        Arc::new(Self {
            active: Arc::clone(active),
        })
    }
}

impl Drop for WorkGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Fetch context for one URL of one message
struct UrlTask {
    message_id: MessageId,
    url: String,
    _work: Arc<WorkGuard>,
}

/// Per-message bookkeeping, guarded by one lock so that posting and
/// retracting cannot interleave
struct MessageLedger {
    superseded: LruCache<MessageId, ()>,
    posted: LruCache<MessageId, Vec<CardId>>,
}

struct Inner {
    http: HttpConfig,
    image_proxy: ImageProxyConfig,
    limiter: RateLimiter,
    cache: MetadataCache,
    fetcher: Fetcher<Arc<UrlTask>>,
    pool: Arc<WorkerPool>,
    parser: Arc<dyn MetadataParser>,
    sink: Arc<dyn CardSink>,
    ledger: Mutex<MessageLedger>,
    active: Arc<AtomicUsize>,
}

/// Main pipeline coordinator
pub struct Orchestrator {
    inner: Arc<Inner>,
    scheduler: DelayScheduler<MessageId>,
    delay: Duration,
}

impl Orchestrator {
    /// Creates an orchestrator on the system clock with the HTML parser
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Arguments
    ///
    /// * `config` - Validated configuration
    /// * `sink` - Where cards are posted and retracted
    pub fn new(config: &Config, sink: Arc<dyn CardSink>) -> crate::Result<Self> {
        Self::with_components(
            config,
            sink,
            Arc::new(SystemClock),
            Arc::new(HtmlMetadataParser::new()),
        )
    }

    /// Creates an orchestrator with an explicit clock and parser
    ///
    /// The clock drives the rate limiter and the cache TTL. The grace period
    /// always runs on Tokio time.
    pub fn with_components(
        config: &Config,
        sink: Arc<dyn CardSink>,
        clock: Arc<dyn Clock>,
        parser: Arc<dyn MetadataParser>,
    ) -> crate::Result<Self> {
        // Nothing is spawned if the HTTP client cannot be built
        let fetcher = Fetcher::new(&FetcherSettings {
            http: config.http.clone(),
            io_drivers: config.workers.io_drivers,
        })?;
        let pool = Arc::new(WorkerPool::new(config.workers.effective_concurrency()));
        let scheduler = DelayScheduler::new(Arc::clone(&pool));

        let memory = NonZeroUsize::new(MESSAGE_MEMORY).unwrap_or(NonZeroUsize::MIN);
        let inner = Inner {
            http: config.http.clone(),
            image_proxy: config.image_proxy.clone(),
            limiter: RateLimiter::with_clock(
                config.rate_limit.requests_per_second,
                Arc::clone(&clock),
            ),
            cache: MetadataCache::with_clock(
                config.cache.max_size,
                Duration::from_secs(config.cache.ttl_minutes.saturating_mul(60)),
                clock,
            ),
            fetcher,
            pool,
            parser,
            sink,
            ledger: Mutex::new(MessageLedger {
                superseded: LruCache::new(memory),
                posted: LruCache::new(memory),
            }),
            active: Arc::new(AtomicUsize::new(0)),
        };

        tracing::info!(
            "Pipeline ready: delay {}s, {} worker(s), {} req/s, cache {} entries",
            config.embed.delay_seconds,
            inner.pool.size(),
            config.rate_limit.requests_per_second,
            config.cache.max_size
        );

        Ok(Self {
            inner: Arc::new(inner),
            scheduler,
            delay: Duration::from_secs(config.embed.delay_seconds),
        })
    }

    /// Handles a new message
    ///
    /// Bot messages, messages that already carry embeds and messages without
    /// URLs are ignored. Otherwise one job is scheduled under the message id
    /// that previews every distinct URL in it.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - A job was scheduled
    /// * `Ok(false)` - The message was ignored
    /// * `Err(EmbedError::SchedulerClosed)` - The pipeline is shut down
    pub fn on_message(&self, message: &InboundMessage) -> crate::Result<bool> {
        if message.from_bot {
            return Ok(false);
        }

        if message.has_embeds {
            tracing::debug!("Ignoring message with existing embeds: {}", message.id);
            return Ok(false);
        }

        let mut seen = HashSet::new();
        let urls: Vec<String> = extract_urls(&message.content)
            .into_iter()
            .filter(|url| match parse_http_url(url) {
                Ok(_) => true,
                Err(e) => {
                    tracing::debug!("Skipping {}: {}", url, e);
                    false
                }
            })
            .filter(|url| seen.insert(url.clone()))
            .collect();
        if urls.is_empty() {
            return Ok(false);
        }

        tracing::info!(
            "Scheduling {} URL(s) from message {}",
            urls.len(),
            message.id
        );

        let inner = Arc::clone(&self.inner);
        let work = WorkGuard::new(&self.inner.active);
        let message_id = message.id;
        self.scheduler.schedule(message_id, self.delay, async move {
            for url in urls {
                inner.process_url(message_id, url, &work);
            }
        })?;

        Ok(true)
    }

    /// Handles an edited message
    ///
    /// If the platform attached its own embed, the pending job is cancelled
    /// and any card already posted for the message is retracted.
    pub fn on_message_updated(&self, message: &InboundMessage) {
        if message.from_bot || !message.has_embeds {
            return;
        }

        tracing::info!(
            "Message updated with embed, cancelling job for: {}",
            message.id
        );
        self.supersede(message.id);
    }

    /// Handles a deleted message
    pub fn on_message_deleted(&self, message_id: MessageId) {
        tracing::info!("Message deleted, cancelling job for: {}", message_id);
        self.supersede(message_id);
    }

    fn supersede(&self, message_id: MessageId) {
        self.scheduler.cancel(&message_id);

        let cards = {
            let mut ledger = self.inner.lock_ledger();
            ledger.superseded.put(message_id, ());
            ledger.posted.pop(&message_id).unwrap_or_default()
        };

        for card_id in cards {
            self.inner.sink.retract(card_id);
            tracing::info!("Retracted card {} for message {}", card_id.0, message_id);
        }
    }

    /// True when no message is waiting, running or being fetched
    pub fn is_idle(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst) == 0
    }

    /// Resolves once the pipeline has no work left
    pub async fn wait_idle(&self) {
        while !self.is_idle() {
            tokio::time::sleep(IDLE_POLL).await;
        }
    }

    /// Messages whose job has not fired yet
    pub fn pending_jobs(&self) -> usize {
        self.scheduler.pending_len()
    }

    pub fn cache(&self) -> &MetadataCache {
        &self.inner.cache
    }

    /// Stops the scheduler, then the fetcher, then the worker pool
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down pipeline");
        self.scheduler.shutdown().await;
        self.inner.fetcher.shutdown().await;
        self.inner.pool.shutdown().await;
        tracing::info!("Pipeline stopped");
    }
}

impl Inner {
    fn lock_ledger(&self) -> std::sync::MutexGuard<'_, MessageLedger> {
        self.ledger.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_live(&self, message_id: MessageId) -> bool {
        !self.lock_ledger().superseded.contains(&message_id)
    }

    /// Rate limit, cache lookup, then the first fetch attempt
    fn process_url(self: &Arc<Self>, message_id: MessageId, url: String, work: &Arc<WorkGuard>) {
        if !self.is_live(message_id) {
            return;
        }

        if !self.limiter.try_acquire() {
            tracing::warn!("Rate limit exceeded. Dropping request for URL: {}", url);
            return;
        }

        tracing::debug!("Processing URL: {}", url);

        if let Some(preview) = self.cache.get(&url) {
            tracing::debug!("Cache hit for URL: {}", url);
            self.post(message_id, &url, &preview);
            return;
        }

        let budget = first_attempt(self.http.initial_range_bytes, self.http.max_html_bytes);
        tracing::debug!("Cache miss. Fetching {} bytes of {}", budget, url);

        let task = Arc::new(UrlTask {
            message_id,
            url,
            _work: Arc::clone(work),
        });
        self.start_attempt(task, budget);
    }

    fn start_attempt(self: &Arc<Self>, task: Arc<UrlTask>, max_bytes: usize) {
        let inner = Arc::clone(self);
        let url = task.url.clone();

        self.fetcher.fetch(url, max_bytes, true, task, move |result| {
            let pool = Arc::clone(&inner.pool);
            let submitted = pool.submit(async move {
                inner.on_fetched(result, max_bytes);
            });
            if let Err(e) = submitted {
                tracing::debug!("Dropping fetch result: {}", e);
            }
        });
    }

    /// Continuation of a fetch attempt, run on a worker
    fn on_fetched(self: &Arc<Self>, result: FetchResult<Arc<UrlTask>>, max_bytes: usize) {
        let FetchResult {
            outcome,
            context: task,
        } = result;

        let page = match outcome {
            Ok(page) => page,
            Err(FetchError::ShuttingDown) => return,
            Err(e) if e.is_blocked() => {
                tracing::debug!("Refusing to preview {}: {}", task.url, e);
                return;
            }
            Err(e) => {
                tracing::warn!("Failed to fetch {}: {}", task.url, e);
                return;
            }
        };

        if !page.is_success() {
            tracing::info!("{} answered HTTP {}, skipping", task.url, page.status_code);
            return;
        }

        if !self.is_live(task.message_id) {
            tracing::debug!("Message {} superseded, dropping {}", task.message_id, task.url);
            return;
        }

        if let Some(preview) = self.parser.parse(&page.content) {
            self.complete(&task, preview, &page.effective_url);
            return;
        }

        // Grow only while the body was cut short. A complete body parses the
        // same at any budget (see "Budget growth" in DESIGN.md).
        let partial = page.truncated || (page.status_code == 206 && page.content.len() >= max_bytes);
        if !partial {
            tracing::debug!("No preview metadata in {}", task.url);
            return;
        }

        match next_attempt(max_bytes, self.http.range_growth_factor, self.http.max_html_bytes) {
            Some(next) => {
                tracing::debug!(
                    "Metadata incomplete, increasing range to {} bytes for URL: {}",
                    next,
                    task.url
                );
                self.start_attempt(task, next);
            }
            None => {
                tracing::warn!(
                    "Could not parse metadata within {} bytes from: {}",
                    max_bytes,
                    task.url
                );
            }
        }
    }

    /// Caches a parsed preview under the requested and effective URLs, then posts it
    fn complete(&self, task: &UrlTask, mut preview: Preview, effective_url: &str) {
        if let Some(image) = preview.image_url.take() {
            let resolved = resolve_against(effective_url, &image);
            preview.image_url = Some(resolved).filter(|s| !s.is_empty());
        }

        self.cache.put(&task.url, preview.clone());
        if !effective_url.is_empty() && effective_url != task.url {
            self.cache.put(effective_url, preview.clone());
        }

        self.post(task.message_id, &task.url, &preview);
    }

    fn post(&self, message_id: MessageId, url: &str, preview: &Preview) {
        let mut card = PreviewCard::build(preview, url);
        card.thumbnail = card
            .thumbnail
            .map(|image| proxy_image(&image, &self.image_proxy));

        let mut ledger = self.lock_ledger();
        if ledger.superseded.contains(&message_id) {
            tracing::info!(
                "Platform already attached an embed. Skipping card for: {}",
                url
            );
            return;
        }

        if let Some(card_id) = self.sink.post(message_id, &card) {
            tracing::info!("Posted card {} for {}", card_id.0, url);
            if let Some(cards) = ledger.posted.get_mut(&message_id) {
                cards.push(card_id);
            } else {
                ledger.posted.put(message_id, vec![card_id]);
            }
        }
    }
}
