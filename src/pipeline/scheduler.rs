//! Delay scheduler
//!
//! Holds at most one pending action per key and hands it to the
//! [`WorkerPool`] once its delay has elapsed, unless it was cancelled first.
//!
//! - Due times live in a min-heap ordered by `(due, insertion sequence)`
//! - Cancelled and superseded heap nodes are skipped lazily when popped
//! - A single coordinator task sleeps until the soonest deadline or until
//!   woken by `schedule`/`cancel`
//! - Dispatch to the pool happens after the state lock is released
//!
//! Cancellation is best-effort: an action already handed to the pool runs.

use crate::pipeline::WorkerPool;
use crate::EmbedError;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::cmp::Ordering;
use std::collections::hash_map::Entry;
use std::collections::{BinaryHeap, HashMap};
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Due time used when `now + delay` overflows
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 3600);

/// Heap node pointing at a pending job
#[derive(Debug)]
struct Due<K> {
    at: Instant,
    seq: u64,
    key: K,
}

// Reverse comparison so the earliest deadline is popped first from BinaryHeap;
// equal deadlines pop in insertion order
impl<K> Ord for Due<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<K> PartialOrd for Due<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K> PartialEq for Due<K> {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl<K> Eq for Due<K> {}

struct PendingJob {
    seq: u64,
    action: BoxFuture<'static, ()>,
}

struct SchedulerState<K> {
    jobs: HashMap<K, PendingJob>,
    heap: BinaryHeap<Due<K>>,
    next_seq: u64,
    closed: bool,
}

struct Shared<K> {
    state: Mutex<SchedulerState<K>>,
    /// Jobs removed from `jobs` but not yet accepted by the pool
    dispatching: AtomicUsize,
    wake: Notify,
    shutdown: CancellationToken,
    pool: Arc<WorkerPool>,
}

/// Runs one action per key after a delay, unless cancelled
pub struct DelayScheduler<K> {
    shared: Arc<Shared<K>>,
    coordinator: Mutex<Option<JoinHandle<()>>>,
}

impl<K> DelayScheduler<K>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
{
    /// Starts the coordinator task; due actions are submitted to `pool`
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(SchedulerState {
                jobs: HashMap::new(),
                heap: BinaryHeap::new(),
                next_seq: 0,
                closed: false,
            }),
            dispatching: AtomicUsize::new(0),
            wake: Notify::new(),
            shutdown: CancellationToken::new(),
            pool,
        });

        let coordinator = tokio::spawn(coordinate(Arc::clone(&shared)));

        Self {
            shared,
            coordinator: Mutex::new(Some(coordinator)),
        }
    }

    /// Arms `action` to run `delay` from now under `key`
    ///
    /// Scheduling a key that is already pending replaces its due time and
    /// action in place.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The action is pending
    /// * `Err(EmbedError::SchedulerClosed)` - The scheduler was shut down
    pub fn schedule<F>(&self, key: K, delay: Duration, action: F) -> Result<(), EmbedError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let now = Instant::now();
        let at = now.checked_add(delay).unwrap_or(now + FAR_FUTURE);
        {
            let mut state = self.lock_state();
            if state.closed {
                return Err(EmbedError::SchedulerClosed);
            }

            let seq = state.next_seq;
            state.next_seq += 1;

            let replaced = state
                .jobs
                .insert(
                    key.clone(),
                    PendingJob {
                        seq,
                        action: action.boxed(),
                    },
                )
                .is_some();
            state.heap.push(Due { at, seq, key: key.clone() });

            if replaced {
                tracing::debug!("Rescheduled {:?} in {:?}", key, delay);
            } else {
                tracing::debug!("Scheduled {:?} in {:?}", key, delay);
            }
        }

        self.shared.wake.notify_one();
        Ok(())
    }

    /// Cancels the pending action for `key`
    ///
    /// Returns `true` if an action was pending. An action that has already
    /// been handed to the worker pool is not affected.
    pub fn cancel(&self, key: &K) -> bool {
        let removed = self.lock_state().jobs.remove(key).is_some();
        if removed {
            tracing::debug!("Cancelled {:?}", key);
            self.shared.wake.notify_one();
        }
        removed
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.lock_state().jobs.contains_key(key)
    }

    /// Actions not yet accepted by the worker pool
    pub fn pending_len(&self) -> usize {
        let pending = self.lock_state().jobs.len();
        pending + self.shared.dispatching.load(AtomicOrdering::SeqCst)
    }

    /// Stops the coordinator and discards every pending action
    pub async fn shutdown(&self) {
        let discarded = {
            let mut state = self.lock_state();
            state.closed = true;
            state.heap.clear();
            let count = state.jobs.len();
            state.jobs.clear();
            count
        };
        self.shared.shutdown.cancel();

        let coordinator = self
            .coordinator
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = coordinator {
            if let Err(e) = handle.await {
                tracing::warn!("Scheduler coordinator ended abnormally: {}", e);
            }
        }

        if discarded > 0 {
            tracing::info!("Scheduler discarded {} pending job(s) at shutdown", discarded);
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SchedulerState<K>> {
        self.shared.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<K> Drop for DelayScheduler<K> {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

/// Coordinator loop
async fn coordinate<K>(shared: Arc<Shared<K>>)
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
{
    loop {
        let (due, next_deadline) = {
            let mut state = shared.state.lock().unwrap_or_else(|e| e.into_inner());
            let now = Instant::now();
            let mut due = Vec::new();

            while let Some(top) = state.heap.peek() {
                if top.at > now {
                    break;
                }
                let Some(node) = state.heap.pop() else {
                    break;
                };

                // Stale nodes belong to cancelled or rescheduled jobs
                if let Entry::Occupied(entry) = state.jobs.entry(node.key) {
                    if entry.get().seq == node.seq {
                        let (key, job) = entry.remove_entry();
                        due.push((key, job.action));
                    }
                }
            }

            shared
                .dispatching
                .fetch_add(due.len(), AtomicOrdering::SeqCst);
            (due, state.heap.peek().map(|top| top.at))
        };

        for (key, action) in due {
            tracing::debug!("Dispatching {:?}", key);
            if let Err(e) = shared.pool.submit(action) {
                tracing::warn!("Dropping job {:?}: {}", key, e);
            }
            shared.dispatching.fetch_sub(1, AtomicOrdering::SeqCst);
        }

        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            _ = shared.wake.notified() => {}
            _ = sleep_until(next_deadline) => {}
        }
    }

    tracing::trace!("Scheduler coordinator exited");
}

/// Sleeps until `deadline`, or forever when there is none
async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
