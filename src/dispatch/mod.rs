//! Feed dispatcher: paging, the per-feed decision tree, and event fan-out.
//!
//! The dispatcher pulls pages from the listing endpoint and decides, per
//! feed, which secondary fetches are needed. Cheap decisions (drop rules,
//! the markup gate) run inline in listing order; everything that touches
//! the network runs as one sequential async task per feed, tracked under
//! [`TaskCategory::Dispatch`]. Per-feed tasks complete in any order —
//! consumers must not expect `Processed` events in feed order, only that
//! each feed's own events stay ordered.

pub mod media;

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::RwLock;

use crate::api::{DetailPayload, FeedPage, QzoneApi};
use crate::config::FeedConfig;
use crate::error::{ApiError, ErrorStack};
use crate::event::{EventHub, FeedEvent};
use crate::markup::{MarkupContent, MarkupInfo};
use crate::model::{BatchId, FeedContent, Forward, RawFeed, SharedContent};
use crate::task::{TaskCategory, TaskRegistry, WaitOutcome};
use crate::{emoji, model};

/// Async predicate marking a feed as out of range; once it fires, no
/// further pages are fetched (the current page still gets its final pass).
pub type StopPredicate = Arc<dyn Fn(&RawFeed) -> BoxFuture<'static, bool> + Send + Sync>;

/// Outcome of the synchronous head of the decision tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DispatchOutcome {
    Dispatched,
    Dropped,
}

impl DispatchOutcome {
    fn dispatched(self) -> bool {
        self == DispatchOutcome::Dispatched
    }
}

/// Orchestrates feed fetching and per-feed processing.
///
/// Owns the batch counter, the event hub and the task registry; cheap to
/// share behind an [`Arc`].
pub struct FeedDispatcher {
    api: Arc<dyn QzoneApi>,
    hub: EventHub,
    registry: TaskRegistry,
    config: Arc<FeedConfig>,
    next_batch: AtomicU64,
    stop_predicate: Mutex<Option<StopPredicate>>,
}

impl FeedDispatcher {
    pub fn new(api: Arc<dyn QzoneApi>, config: FeedConfig) -> Self {
        let registry = TaskRegistry::new();
        let hub = EventHub::new(registry.clone());
        Self {
            api,
            hub,
            registry,
            config: Arc::new(config),
            next_batch: AtomicU64::new(0),
            stop_predicate: Mutex::new(None),
        }
    }

    pub fn api(&self) -> &Arc<dyn QzoneApi> {
        &self.api
    }

    /// The hub carrying this dispatcher's lifecycle events.
    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    /// Install a predicate consulted for every listed feed; when it
    /// returns true the fetch loop stops paging after the current page.
    pub fn set_stop_predicate<F, Fut>(&self, predicate: F)
    where
        F: Fn(&RawFeed) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let predicate: StopPredicate = Arc::new(move |feed| predicate(feed).boxed());
        *self
            .stop_predicate
            .lock()
            .expect("stop predicate lock poisoned") = Some(predicate);
    }

    async fn stop_requested(&self, feed: &RawFeed) -> bool {
        let predicate = self
            .stop_predicate
            .lock()
            .expect("stop predicate lock poisoned")
            .clone();
        match predicate {
            Some(predicate) => predicate(feed).await,
            None => false,
        }
    }

    fn new_batch(&self) -> BatchId {
        BatchId(self.next_batch.fetch_add(1, Ordering::Relaxed))
    }

    /// Page through the listing until `count` non-dropped feeds have been
    /// dispatched or the listing runs out.
    ///
    /// Dropped feeds do not count toward `count`; the return value is the
    /// number of feeds actually dispatched. Transient page errors are
    /// logged and the page is skipped, up to the configured ceiling;
    /// login/cancellation errors abort the call immediately. Already
    /// dispatched feeds keep processing either way.
    pub async fn fetch_by_count(&self, count: usize) -> Result<usize, ApiError> {
        let batch = self.new_batch();
        tracing::debug!(%batch, count, "fetching feeds by count");

        let mut dispatched = 0;
        let mut attach_info = String::new();
        let mut errors = ErrorStack::new(self.config.page_error_limit);

        for page in 0..self.config.max_pages {
            let listing = match self.api.fetch_page(&attach_info).await {
                Ok(listing) => listing,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    tracing::warn!(page, error = %err, "error fetching page");
                    errors.push(err)?;
                    continue;
                }
            };
            let FeedPage {
                feeds,
                attach_info: next,
                has_more,
            } = listing;
            attach_info = next;

            let mut stop_fetching = !has_more;
            for feed in feeds {
                if dispatched >= count {
                    stop_fetching = true;
                    break;
                }
                if self.stop_requested(&feed).await {
                    stop_fetching = true;
                    continue;
                }
                if self.dispatch_feed(feed, batch).dispatched() {
                    dispatched += 1;
                }
            }

            if stop_fetching || dispatched >= count {
                break;
            }
        }

        tracing::debug!(%batch, dispatched, "feed batch dispatched");
        Ok(dispatched)
    }

    /// Page through the listing dispatching feeds whose timestamp lies in
    /// `[anchor − window, anchor]` (`anchor` defaults to now).
    ///
    /// Feeds newer than the anchor are skipped without ending the scan. A
    /// feed older than the window, or one matching the stop predicate,
    /// exhausts the window: no further pages, but the remaining feeds of
    /// the current page still get their final pass.
    pub async fn fetch_by_time_window(
        &self,
        window: Duration,
        anchor: Option<i64>,
    ) -> Result<usize, ApiError> {
        let batch = self.new_batch();
        let anchor = anchor.unwrap_or_else(|| Utc::now().timestamp());
        let horizon = anchor - window.as_secs() as i64;
        tracing::debug!(%batch, anchor, horizon, "fetching feeds by time window");

        let mut dispatched = 0;
        let mut attach_info = String::new();
        let mut errors = ErrorStack::new(self.config.page_error_limit);

        for page in 0..self.config.max_pages {
            let listing = match self.api.fetch_page(&attach_info).await {
                Ok(listing) => listing,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    tracing::warn!(page, error = %err, "error fetching page");
                    errors.push(err)?;
                    continue;
                }
            };
            let FeedPage {
                feeds,
                attach_info: next,
                has_more,
            } = listing;
            attach_info = next;

            let mut stop_fetching = !has_more;
            for feed in feeds {
                if feed.abstime > anchor {
                    continue;
                }
                if feed.abstime < horizon || self.stop_requested(&feed).await {
                    stop_fetching = true;
                    continue;
                }
                if self.dispatch_feed(feed, batch).dispatched() {
                    dispatched += 1;
                }
            }

            if stop_fetching {
                break;
            }
        }

        tracing::debug!(%batch, dispatched, "feed batch dispatched");
        Ok(dispatched)
    }

    /// Wait for in-flight work (all categories) to settle.
    pub async fn wait_settled(&self, timeout: Option<Duration>) -> WaitOutcome {
        self.registry.wait_all(&[], timeout).await
    }

    /// Cancel all in-flight dispatch, slow-api and hook tasks.
    pub fn stop(&self) {
        tracing::warn!("feed dispatcher stopping, cancelling tracked tasks");
        self.registry.cancel_all(&[]);
    }

    fn hit_drop_rule(&self, feed: &RawFeed) -> bool {
        if self.config.drop_uins.contains(&feed.uin) {
            tracing::info!(uin = feed.uin, "advertisement rule hit");
            return true;
        }
        if self
            .config
            .drop_fid_prefixes
            .iter()
            .any(|prefix| feed.fid.starts_with(prefix.as_str()))
        {
            tracing::info!(fid = %feed.fid, "advertisement rule hit");
            return true;
        }
        false
    }

    /// Synchronous head of the per-feed decision tree.
    ///
    /// Drop rules and the markup gate resolve here, in listing order, so
    /// batch accounting is exact; the asynchronous tail runs as a tracked
    /// task.
    fn dispatch_feed(&self, feed: RawFeed, batch: BatchId) -> DispatchOutcome {
        let mut model = FeedContent::from_raw(&feed);

        if self.hit_drop_rule(&feed) {
            self.hub.emit(FeedEvent::Dropped {
                batch,
                content: Arc::new(model),
            });
            return DispatchOutcome::Dropped;
        }

        let info = match MarkupInfo::parse(&feed.html) {
            Ok(info) => info,
            Err(err) => {
                tracing::debug!(fid = %feed.fid, error = %err, "dropping feed with unparsable markup");
                self.hub.emit(FeedEvent::Dropped {
                    batch,
                    content: Arc::new(model),
                });
                return DispatchOutcome::Dropped;
            }
        };
        model.apply_markup_info(&info);

        let content: SharedContent = Arc::new(RwLock::new(model));
        let worker = FeedWorker {
            api: Arc::clone(&self.api),
            hub: self.hub.clone(),
            registry: self.registry.clone(),
            config: Arc::clone(&self.config),
            batch,
        };
        self.registry.track(TaskCategory::Dispatch, async move {
            if let Err(err) = worker.process(feed, info, content).await {
                // Fatal classes end this feed's task; transient ones were
                // already handled closer to the failing call.
                tracing::warn!(error = %err, "feed task ended early");
            }
        });
        DispatchOutcome::Dispatched
    }
}

/// Everything one per-feed task needs, detached from the dispatcher's
/// lifetime.
struct FeedWorker {
    api: Arc<dyn QzoneApi>,
    hub: EventHub,
    registry: TaskRegistry,
    config: Arc<FeedConfig>,
    batch: BatchId,
}

impl FeedWorker {
    /// Asynchronous tail of the decision tree: follow-up enrichment,
    /// detail shortcut, markup path, album scheduling.
    async fn process(
        self,
        mut feed: RawFeed,
        mut info: MarkupInfo,
        content: SharedContent,
    ) -> Result<(), ApiError> {
        let mut prefetched: Option<DetailPayload> = None;

        // An incomplete listing payload gets one enrichment round before
        // the rest of the tree runs; `has_more` never clearing must not
        // loop us forever, hence the single round.
        if feed.has_more {
            match self.api.fetch_detail(feed.uin, &feed.fid).await {
                Ok(detail) => {
                    if let Some(full) = detail.html.clone() {
                        match MarkupInfo::parse(&full) {
                            Ok(enriched) => {
                                feed.html = full;
                                info = enriched;
                                content.write().await.apply_markup_info(&info);
                            }
                            Err(err) => {
                                // The feed already counted as dispatched;
                                // keep the original markup instead of
                                // late-dropping it.
                                tracing::debug!(fid = %feed.fid, error = %err, "enriched markup unparsable, keeping original");
                            }
                        }
                    }
                    prefetched = Some(detail);
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    tracing::warn!(fid = %feed.fid, error = %err, "follow-up detail fetch failed");
                }
            }
        }

        // Detail shortcut: for allow-listed app sources and URL-shaped
        // forwards, the detail payload carries everything and markup
        // content parsing is skipped entirely.
        let forward_is_url = {
            let model = content.read().await;
            model
                .curkey
                .as_deref()
                .map(model::is_http_url)
                .unwrap_or(false)
        };
        if self.config.detail_appids.contains(&feed.appid) || forward_is_url {
            let detail = match prefetched.take() {
                Some(detail) => Ok(detail),
                None => self.api.fetch_detail(feed.uin, &feed.fid).await,
            };
            match detail {
                Ok(detail) if detail.usable() => {
                    {
                        let mut model = content.write().await;
                        model.apply_detail(&detail);
                        model.content = emoji::translate(&model.content);
                        model.nickname = emoji::translate(&model.nickname);
                    }
                    self.hub.emit(FeedEvent::Processed {
                        batch: self.batch,
                        content,
                    });
                    return Ok(());
                }
                Ok(_) => {
                    tracing::debug!(fid = %feed.fid, "detail payload unusable, falling back to markup");
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    tracing::warn!(fid = %feed.fid, error = %err, "detail fetch failed, falling back to markup");
                }
            }
        }

        // Default path: parse content out of markup, completing truncated
        // markup first.
        let markup = if info.complete {
            feed.html.clone()
        } else {
            match self
                .api
                .fetch_full_content(feed.uin, &feed.fid, info.feeds_type)
                .await
            {
                Ok(Some(full)) => full,
                Ok(None) => feed.html.clone(),
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    tracing::warn!(fid = %feed.fid, error = %err, "full content fetch failed, parsing truncated markup");
                    feed.html.clone()
                }
            }
        };

        let parsed = MarkupContent::parse(&markup, feed.uin);
        {
            let mut model = content.write().await;
            model.apply_markup_content(&parsed);
            if let Some(unikey) = &info.unikey {
                model.forward = Forward::Key(unikey.clone());
            }
        }

        let processed_delivery = self.hub.emit(FeedEvent::Processed {
            batch: self.batch,
            content: Arc::clone(&content),
        });

        // Album enrichment is optional content and must never delay the
        // terminal event above.
        if let Some(album) = parsed.album {
            if !parsed.pictures.is_empty() {
                tracing::info!(fid = %feed.fid, album = %album.album_id, "media update task registered");
                self.registry.track(
                    TaskCategory::SlowApi,
                    media::enrich_media(
                        Arc::clone(&self.api),
                        self.hub.clone(),
                        content,
                        self.batch,
                        album,
                        parsed.pictures.len(),
                        processed_delivery,
                    ),
                );
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::PicturePayload;
    use async_trait::async_trait;

    struct EmptyListing;

    #[async_trait]
    impl QzoneApi for EmptyListing {
        async fn fetch_page(&self, _attach_info: &str) -> Result<FeedPage, ApiError> {
            Ok(FeedPage::default())
        }

        async fn fetch_detail(&self, _uin: u64, _fid: &str) -> Result<DetailPayload, ApiError> {
            Ok(DetailPayload::default())
        }

        async fn fetch_full_content(
            &self,
            _uin: u64,
            _fid: &str,
            _feeds_type: u8,
        ) -> Result<Option<String>, ApiError> {
            Ok(None)
        }

        async fn fetch_album(
            &self,
            _album: &crate::api::AlbumRef,
            _count: usize,
        ) -> Result<Vec<PicturePayload>, ApiError> {
            Ok(Vec::new())
        }

        async fn poll_new_feed_count(&self) -> Result<u32, ApiError> {
            Ok(0)
        }
    }

    fn raw(fid: &str, uin: u64) -> RawFeed {
        RawFeed {
            appid: 0,
            typeid: 0,
            fid: fid.into(),
            abstime: 0,
            uin,
            nickname: String::new(),
            html: r#"<i name="feed_data" data-unikey="u1"></i>"#.into(),
            curkey: None,
            unikey: None,
            topic_id: String::new(),
            is_liked: false,
            has_more: false,
        }
    }

    #[tokio::test]
    async fn test_batch_ids_increase_per_call() {
        let dispatcher = FeedDispatcher::new(Arc::new(EmptyListing), FeedConfig::default());
        assert_eq!(dispatcher.new_batch(), BatchId(0));
        assert_eq!(dispatcher.new_batch(), BatchId(1));
        assert_eq!(dispatcher.new_batch(), BatchId(2));
    }

    #[tokio::test]
    async fn test_drop_rules_match_uin_and_fid_prefix() {
        let dispatcher = FeedDispatcher::new(Arc::new(EmptyListing), FeedConfig::default());
        assert!(dispatcher.hit_drop_rule(&raw("f1", 20_050_606)));
        assert!(dispatcher.hit_drop_rule(&raw("advertisement_x", 1)));
        assert!(!dispatcher.hit_drop_rule(&raw("f1", 1)));
    }

    #[tokio::test]
    async fn test_empty_listing_dispatches_nothing() {
        let dispatcher = FeedDispatcher::new(Arc::new(EmptyListing), FeedConfig::default());
        let got = dispatcher.fetch_by_count(10).await.unwrap();
        assert_eq!(got, 0);
    }
}
