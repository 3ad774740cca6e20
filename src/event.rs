//! Typed pub/sub for feed lifecycle events.
//!
//! Events are one tagged enum ([`FeedEvent`]); subscribers register per
//! [`EventKind`] and are invoked in registration order. [`EventHub::emit`]
//! never blocks the emitter: delivery runs as a task tracked under
//! [`TaskCategory::Hook`], and a failing subscriber is logged, never
//! propagated back into the dispatch pipeline.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::task::JoinHandle;

use crate::error::ApiError;
use crate::model::{BatchId, FeedContent, SharedContent};
use crate::task::{TaskCategory, TaskRegistry};

/// A feed lifecycle event.
///
/// `Processed` and `MediaUpdated` share the same [`SharedContent`] — the
/// model is updated in place, and subscribers holding the ref from
/// `Processed` observe the media refresh announced by `MediaUpdated`.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// All required processing for a feed finished (slow media enrichment
    /// excluded). Fires exactly once per dispatched feed.
    Processed {
        batch: BatchId,
        content: SharedContent,
    },
    /// A feed was discarded by a drop rule or unparsable markup. Fires
    /// instead of `Processed`, never alongside it.
    Dropped {
        batch: BatchId,
        content: Arc<FeedContent>,
    },
    /// The slow media task replaced a feed's media list. Always delivered
    /// after that feed's `Processed`.
    MediaUpdated {
        batch: BatchId,
        content: SharedContent,
    },
    /// The heartbeat failed; terminal when `will_retry` is false.
    HeartbeatFailed {
        error: Arc<ApiError>,
        will_retry: bool,
    },
}

impl FeedEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            FeedEvent::Processed { .. } => EventKind::Processed,
            FeedEvent::Dropped { .. } => EventKind::Dropped,
            FeedEvent::MediaUpdated { .. } => EventKind::MediaUpdated,
            FeedEvent::HeartbeatFailed { .. } => EventKind::HeartbeatFailed,
        }
    }

    /// The batch this event belongs to; heartbeat events have none.
    pub fn batch(&self) -> Option<BatchId> {
        match self {
            FeedEvent::Processed { batch, .. }
            | FeedEvent::Dropped { batch, .. }
            | FeedEvent::MediaUpdated { batch, .. } => Some(*batch),
            FeedEvent::HeartbeatFailed { .. } => None,
        }
    }
}

/// Subscription key for [`FeedEvent`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Processed,
    Dropped,
    MediaUpdated,
    HeartbeatFailed,
}

/// Token returned by [`EventHub::subscribe`], usable to unsubscribe.
pub type SubscriberId = u64;

type HandlerFn = dyn Fn(FeedEvent) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync;

#[derive(Clone)]
struct Subscriber {
    id: SubscriberId,
    handler: Arc<HandlerFn>,
}

type SubscriberMap = HashMap<EventKind, Vec<Subscriber>>;

/// Pub/sub hub for [`FeedEvent`]s. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct EventHub {
    subscribers: Arc<Mutex<SubscriberMap>>,
    registry: TaskRegistry,
    next_id: Arc<AtomicU64>,
}

impl EventHub {
    /// Create a hub whose deliveries are tracked in `registry` under
    /// [`TaskCategory::Hook`].
    pub fn new(registry: TaskRegistry) -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            registry,
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SubscriberMap> {
        self.subscribers.lock().expect("event hub lock poisoned")
    }

    /// Register an async handler for one event kind. Handlers for the same
    /// kind run in registration order; a handler's `Err` is logged and
    /// does not stop later handlers.
    pub fn subscribe<F, Fut>(&self, kind: EventKind, handler: F) -> SubscriberId
    where
        F: Fn(FeedEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handler: Arc<HandlerFn> = Arc::new(move |event| handler(event).boxed());
        self.lock()
            .entry(kind)
            .or_default()
            .push(Subscriber { id, handler });
        id
    }

    /// Remove a subscription. Returns whether it was still registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut guard = self.lock();
        let before: usize = guard.values().map(Vec::len).sum();
        for subs in guard.values_mut() {
            subs.retain(|sub| sub.id != id);
        }
        let after: usize = guard.values().map(Vec::len).sum();
        after < before
    }

    /// Schedule delivery of `event` to all currently registered handlers
    /// of its kind and return immediately.
    ///
    /// The returned handle resolves once every handler has run; the
    /// dispatch pipeline uses it to sequence events for the same feed.
    pub fn emit(&self, event: FeedEvent) -> JoinHandle<()> {
        let subs: Vec<Subscriber> = self
            .lock()
            .get(&event.kind())
            .cloned()
            .unwrap_or_default();
        self.registry.track(TaskCategory::Hook, async move {
            for sub in subs {
                if let Err(error) = (sub.handler)(event.clone()).await {
                    tracing::warn!(
                        kind = ?event.kind(),
                        subscriber = sub.id,
                        error = %error,
                        "event handler failed"
                    );
                }
            }
        })
    }
}
