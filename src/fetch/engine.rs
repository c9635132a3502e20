//! Fetch engine
//!
//! A [`Fetcher`] owns a small number of I/O driver tasks. Each driver accepts
//! requests from its own queue and polls every transfer it has started from a
//! single loop, so hundreds of slow servers cost a handful of tasks. Requests
//! are spread across drivers round-robin.

use crate::config::HttpConfig;
use crate::fetch::transfer::{run_transfer, TransferSettings};
use crate::fetch::{FetchError, FetchResult};
use futures::stream::{FuturesUnordered, StreamExt};
use reqwest::{redirect::Policy, Client};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Upper bound on how long a driver sleeps with nothing to do
const IDLE_TICK: Duration = Duration::from_millis(500);

/// Completion callback invoked exactly once per request
pub type FetchCallback<C> = Box<dyn FnOnce(FetchResult<C>) + Send + 'static>;

struct FetchRequest<C> {
    url: String,
    max_bytes: usize,
    use_range: bool,
    context: C,
    callback: FetchCallback<C>,
}

/// Knobs a [`Fetcher`] is built from
#[derive(Debug, Clone)]
pub struct FetcherSettings {
    pub http: HttpConfig,
    /// Number of driver tasks; 0 is treated as 1
    pub io_drivers: usize,
}

/// Builds the HTTP client shared by all drivers
///
/// Redirects are disabled here because every hop has to pass the SSRF guard.
///
/// # Arguments
///
/// * `config` - HTTP settings (user agent, timeout)
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(config: &HttpConfig) -> Result<Client, reqwest::Error> {
    let timeout = Duration::from_millis(config.timeout_ms);

    Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(timeout)
        .connect_timeout(timeout)
        .redirect(Policy::none()) // Handle redirects manually
        .gzip(true)
        .brotli(true)
        .build()
}

/// Asynchronous, callback-based HTTP fetcher
///
/// `C` is the caller's context type. It is moved into the request and handed
/// back in the [`FetchResult`] without being inspected.
pub struct Fetcher<C> {
    intakes: Vec<mpsc::UnboundedSender<FetchRequest<C>>>,
    next_driver: AtomicUsize,
    shutdown: CancellationToken,
    drivers: Mutex<Vec<JoinHandle<()>>>,
}

impl<C: Send + 'static> Fetcher<C> {
    /// Starts the driver tasks
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(settings: &FetcherSettings) -> Result<Self, reqwest::Error> {
        let client = build_http_client(&settings.http)?;
        let transfer = Arc::new(TransferSettings {
            max_redirects: settings.http.max_redirects,
            block_private_addresses: settings.http.block_private_addresses,
        });
        let shutdown = CancellationToken::new();
        let count = settings.io_drivers.max(1);

        let mut intakes = Vec::with_capacity(count);
        let mut drivers = Vec::with_capacity(count);
        for id in 0..count {
            let (tx, rx) = mpsc::unbounded_channel();
            intakes.push(tx);
            drivers.push(tokio::spawn(drive(
                id,
                client.clone(),
                Arc::clone(&transfer),
                rx,
                shutdown.clone(),
            )));
        }

        tracing::debug!("Started {} fetch driver(s)", count);

        Ok(Self {
            intakes,
            next_driver: AtomicUsize::new(0),
            shutdown,
            drivers: Mutex::new(drivers),
        })
    }

    /// Starts fetching `url` and returns immediately
    ///
    /// `callback` runs exactly once on a driver task with the outcome and
    /// `context`. After shutdown it still runs, with
    /// [`FetchError::ShuttingDown`]. A panicking callback is logged and does
    /// not affect other transfers.
    ///
    /// # Arguments
    ///
    /// * `url` - Absolute http(s) URL
    /// * `max_bytes` - Most body bytes to keep
    /// * `use_range` - Send `Range: bytes=0-{max_bytes-1}`
    /// * `context` - Returned untouched in the result
    /// * `callback` - Completion handler
    pub fn fetch<F>(
        &self,
        url: impl Into<String>,
        max_bytes: usize,
        use_range: bool,
        context: C,
        callback: F,
    ) where
        F: FnOnce(FetchResult<C>) + Send + 'static,
    {
        let request = FetchRequest {
            url: url.into(),
            max_bytes,
            use_range,
            context,
            callback: Box::new(callback),
        };

        if self.shutdown.is_cancelled() {
            reject(request);
            return;
        }

        let index = self.next_driver.fetch_add(1, Ordering::Relaxed) % self.intakes.len();
        if let Err(mpsc::error::SendError(request)) = self.intakes[index].send(request) {
            reject(request);
        }
    }

    /// Stops accepting work, lets in-flight transfers finish and waits for
    /// the drivers to exit
    ///
    /// Requests still queued are completed with `ShuttingDown`.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let drivers = {
            let mut guard = self.drivers.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *guard)
        };

        for handle in drivers {
            if let Err(e) = handle.await {
                tracing::warn!("Fetch driver ended abnormally: {}", e);
            }
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl<C> Drop for Fetcher<C> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Completes a request that never reached a driver, off the caller's stack
fn reject<C: Send + 'static>(request: FetchRequest<C>) {
    let FetchRequest {
        url,
        context,
        callback,
        ..
    } = request;
    tracing::debug!("Rejecting fetch of {}: shutting down", url);

    let result = FetchResult {
        outcome: Err(FetchError::ShuttingDown),
        context,
    };

    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move { complete(callback, result) });
        }
        Err(_) => complete(callback, result),
    }
}

fn complete<C>(callback: FetchCallback<C>, result: FetchResult<C>) {
    if catch_unwind(AssertUnwindSafe(move || callback(result))).is_err() {
        tracing::error!("Fetch completion callback panicked");
    }
}

async fn run_request<C>(
    client: Client,
    settings: Arc<TransferSettings>,
    request: FetchRequest<C>,
) -> (FetchResult<C>, FetchCallback<C>) {
    let FetchRequest {
        url,
        max_bytes,
        use_range,
        context,
        callback,
    } = request;

    let outcome = run_transfer(&client, &settings, &url, max_bytes, use_range).await;
    match &outcome {
        Ok(page) => tracing::trace!(
            "Fetched {} ({} bytes, status {}, truncated: {})",
            page.effective_url,
            page.content.len(),
            page.status_code,
            page.truncated
        ),
        Err(e) => tracing::debug!("Fetch of {} failed: {}", url, e),
    }

    (FetchResult { outcome, context }, callback)
}

/// Driver loop: accept requests, poll transfers, fire callbacks
async fn drive<C: Send + 'static>(
    id: usize,
    client: Client,
    settings: Arc<TransferSettings>,
    mut intake: mpsc::UnboundedReceiver<FetchRequest<C>>,
    shutdown: CancellationToken,
) {
    let mut in_flight = FuturesUnordered::new();
    let mut accepting = true;

    loop {
        tokio::select! {
            _ = shutdown.cancelled(), if accepting => {
                accepting = false;
                intake.close();

                let mut rejected = 0usize;
                while let Ok(request) = intake.try_recv() {
                    rejected += 1;
                    complete(
                        request.callback,
                        FetchResult {
                            outcome: Err(FetchError::ShuttingDown),
                            context: request.context,
                        },
                    );
                }

                tracing::debug!(
                    "Fetch driver {} stopping: {} in flight, {} rejected",
                    id,
                    in_flight.len(),
                    rejected
                );
            }
            received = intake.recv(), if accepting => match received {
                Some(request) => {
                    in_flight.push(run_request(client.clone(), Arc::clone(&settings), request));
                }
                None => accepting = false,
            },
            Some((result, callback)) = in_flight.next(), if !in_flight.is_empty() => {
                complete(callback, result);
            }
            _ = tokio::time::sleep(IDLE_TICK) => {}
        }

        if !accepting && in_flight.is_empty() {
            break;
        }
    }

    tracing::trace!("Fetch driver {} exited", id);
}
