//! Fixed-size worker pool for continuation work
//!
//! Workers pull boxed futures from one shared FIFO queue and run each to
//! completion on Tokio's blocking thread pool, so CPU-bound units such as
//! HTML parsing never occupy the runtime threads that drive network I/O.
//! Shutdown lets running units finish and discards the rest.

use crate::EmbedError;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A unit of work
pub type Job = BoxFuture<'static, ()>;

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Job>>>;

pub struct WorkerPool {
    sender: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    receiver: SharedReceiver,
    outstanding: Arc<AtomicUsize>,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl WorkerPool {
    /// Starts `size` workers (at least one)
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let (tx, rx) = mpsc::unbounded_channel();
        let receiver: SharedReceiver = Arc::new(tokio::sync::Mutex::new(rx));
        let outstanding = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();

        let workers = (0..size)
            .map(|id| {
                tokio::spawn(work(
                    id,
                    Arc::clone(&receiver),
                    Arc::clone(&outstanding),
                    shutdown.clone(),
                ))
            })
            .collect();

        tracing::debug!("Started worker pool with {} worker(s)", size);

        Self {
            sender: Mutex::new(Some(tx)),
            receiver,
            outstanding,
            shutdown,
            workers: Mutex::new(workers),
            size,
        }
    }

    /// Queues `job`
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The job will run unless the pool shuts down first
    /// * `Err(EmbedError::PoolClosed)` - The pool no longer accepts work
    pub fn submit<F>(&self, job: F) -> Result<(), EmbedError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.shutdown.is_cancelled() {
            return Err(EmbedError::PoolClosed);
        }

        let guard = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        let sender = guard.as_ref().ok_or(EmbedError::PoolClosed)?;

        self.outstanding.fetch_add(1, Ordering::SeqCst);
        if sender.send(job.boxed()).is_err() {
            self.outstanding.fetch_sub(1, Ordering::SeqCst);
            return Err(EmbedError::PoolClosed);
        }
        Ok(())
    }

    /// Units queued or running
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Stops the pool
    ///
    /// Waits for running units, then drops every unit that had not started.
    /// Subsequent `submit` calls fail with `PoolClosed`.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        let workers = {
            let mut guard = self.workers.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *guard)
        };
        for handle in workers {
            if let Err(e) = handle.await {
                tracing::warn!("Worker ended abnormally: {}", e);
            }
        }

        let mut discarded = 0usize;
        let mut rx = self.receiver.lock().await;
        while rx.try_recv().is_ok() {
            discarded += 1;
            self.outstanding.fetch_sub(1, Ordering::SeqCst);
        }
        if discarded > 0 {
            tracing::info!("Worker pool discarded {} queued job(s) at shutdown", discarded);
        }
    }
}

async fn work(
    id: usize,
    receiver: SharedReceiver,
    outstanding: Arc<AtomicUsize>,
    shutdown: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            job = async { receiver.lock().await.recv().await } => job,
        };

        let Some(job) = next else {
            break;
        };

        let runtime = Handle::current();
        let finished = tokio::task::spawn_blocking(move || {
            runtime.block_on(AssertUnwindSafe(job).catch_unwind())
        })
        .await;
        if !matches!(finished, Ok(Ok(()))) {
            tracing::error!("Job panicked on worker {}", id);
        }
        outstanding.fetch_sub(1, Ordering::SeqCst);
    }

    tracing::trace!("Worker {} exited", id);
}
