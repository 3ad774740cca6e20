//! Tracking for fire-and-forget concurrent work.
//!
//! The dispatch pipeline spawns tasks it does not await inline: per-feed
//! processing, slow media enrichment, event deliveries. [`TaskRegistry`]
//! groups those under a [`TaskCategory`] so callers can bulk-wait for a
//! batch to settle or bulk-cancel on shutdown, without holding individual
//! handles. [`IntervalTimer`] drives the heartbeat's periodic tick.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{oneshot, Notify};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;

/// Grouping for tracked tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskCategory {
    /// Per-feed processing that must settle within its batch call.
    Dispatch,
    /// Low-priority enrichment that may finish long after its batch.
    SlowApi,
    /// Event deliveries to subscribers.
    Hook,
}

impl TaskCategory {
    pub const ALL: [TaskCategory; 3] =
        [TaskCategory::Dispatch, TaskCategory::SlowApi, TaskCategory::Hook];
}

/// Result of [`TaskRegistry::wait_all`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOutcome {
    /// Tasks tracked at call time that finished during the wait.
    pub done: usize,
    /// Tasks still running when the wait returned (nonzero only on
    /// timeout).
    pub pending: usize,
}

type TaskMap = HashMap<TaskCategory, HashMap<u64, AbortHandle>>;

/// Registry of in-flight tracked tasks, grouped by category.
///
/// Cheap to clone; clones share bookkeeping. Completed tasks remove
/// themselves, so the per-category sets stay bounded by the number of
/// tasks actually in flight.
///
/// A panic inside a tracked task is treated as a programming defect: it is
/// logged at error level and the process exits, rather than being
/// swallowed with the join handle.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: Arc<Mutex<TaskMap>>,
    next_id: Arc<AtomicU64>,
    changed: Arc<Notify>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TaskMap> {
        // Held only for map operations, never across an await; a poisoned
        // lock means a panic escaped the exit path below.
        self.tasks.lock().expect("task registry lock poisoned")
    }

    /// Spawn `fut` and record it under `category`.
    ///
    /// The returned handle resolves to the future's output and may be
    /// dropped freely; bookkeeping is independent of it.
    pub fn track<F>(&self, category: TaskCategory, fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let tasks = Arc::clone(&self.tasks);
        let changed = Arc::clone(&self.changed);
        let (registered_tx, registered_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            // Bookkeeping barrier: the task must not complete (and try to
            // self-remove) before its abort handle is recorded.
            let _ = registered_rx.await;
            let result = AssertUnwindSafe(fut).catch_unwind().await;
            if let Ok(mut guard) = tasks.lock() {
                if let Some(group) = guard.get_mut(&category) {
                    group.remove(&id);
                }
            }
            changed.notify_waiters();
            match result {
                Ok(output) => output,
                Err(_) => {
                    tracing::error!(
                        ?category,
                        task = id,
                        "tracked task panicked; terminating process"
                    );
                    std::process::exit(70);
                }
            }
        });

        self.lock()
            .entry(category)
            .or_default()
            .insert(id, handle.abort_handle());
        let _ = registered_tx.send(());
        handle
    }

    /// Number of in-flight tasks in `categories` (all categories when
    /// empty).
    pub fn pending(&self, categories: &[TaskCategory]) -> usize {
        let guard = self.lock();
        if categories.is_empty() {
            guard.values().map(HashMap::len).sum()
        } else {
            categories
                .iter()
                .map(|cat| guard.get(cat).map_or(0, HashMap::len))
                .sum()
        }
    }

    /// Wait until every tracked task in `categories` (all when empty) has
    /// completed, up to `timeout` (`None` waits unboundedly).
    ///
    /// On timeout the outcome reports the remaining tasks as `pending`;
    /// nothing is cancelled and no error is raised. Tasks tracked while
    /// the wait is in progress are waited on as well.
    pub async fn wait_all(
        &self,
        categories: &[TaskCategory],
        timeout: Option<Duration>,
    ) -> WaitOutcome {
        let initial = self.pending(categories);
        let drain = async {
            loop {
                // Register interest before checking, so a completion
                // between the check and the await is not missed.
                let notified = self.changed.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.pending(categories) == 0 {
                    break;
                }
                notified.await;
            }
        };
        match timeout {
            None => drain.await,
            Some(limit) => {
                let _ = tokio::time::timeout(limit, drain).await;
            }
        }
        let pending = self.pending(categories);
        WaitOutcome {
            done: initial.saturating_sub(pending),
            pending,
        }
    }

    /// Abort every unfinished tracked task in `categories` (all when
    /// empty) and discard their bookkeeping.
    ///
    /// Outstanding joins on cancelled tasks observe a cancelled
    /// [`JoinError`](tokio::task::JoinError), never a panic.
    pub fn cancel_all(&self, categories: &[TaskCategory]) {
        let mut guard = self.lock();
        let targets: Vec<TaskCategory> = if categories.is_empty() {
            guard.keys().copied().collect()
        } else {
            categories.to_vec()
        };
        for cat in targets {
            if let Some(group) = guard.remove(&cat) {
                for handle in group.into_values() {
                    handle.abort();
                }
            }
        }
        drop(guard);
        self.changed.notify_waiters();
    }
}

/// Decision returned by an [`IntervalTimer`] tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerTick {
    /// Fire again after the regular interval.
    Continue,
    /// Fire again after a one-off shorter (or longer) pause.
    ContinueAfter(Duration),
    /// Stop the timer for good.
    Stop,
}

/// Periodically invokes an async closure until it asks to stop.
pub struct IntervalTimer {
    handle: JoinHandle<()>,
    last_fire: Arc<Mutex<Option<Instant>>>,
}

impl IntervalTimer {
    /// Start a timer that first fires after `delay`, then re-fires per the
    /// closure's [`TimerTick`] decisions (`Continue` means `interval`).
    pub fn spawn<F, Fut>(interval: Duration, delay: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = TimerTick> + Send,
    {
        let last_fire = Arc::new(Mutex::new(None));
        let fired = Arc::clone(&last_fire);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            loop {
                let decision = tick().await;
                if let Ok(mut guard) = fired.lock() {
                    *guard = Some(Instant::now());
                }
                match decision {
                    TimerTick::Stop => break,
                    TimerTick::Continue => tokio::time::sleep(interval).await,
                    TimerTick::ContinueAfter(pause) => tokio::time::sleep(pause).await,
                }
            }
        });
        Self { handle, last_fire }
    }

    /// When the closure last completed, if it has fired at all.
    pub fn last_fire(&self) -> Option<Instant> {
        self.last_fire.lock().ok().and_then(|guard| *guard)
    }

    /// Whether the timer loop has ended (stopped or cancelled).
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel the timer. Safe to call on a finished timer.
    pub fn stop(&self) {
        self.handle.abort();
    }
}
