//! Slow-path media enrichment.
//!
//! Album listings on the platform lag behind the feeds that reference
//! them, so resolution runs as a low-priority background task with a long
//! retry schedule. Media is optional content: when every attempt fails,
//! the task ends silently — no event, no error to the batch caller. Tests
//! assert that silence; it is the contract, not an accident.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::api::{AlbumRef, QzoneApi};
use crate::error::ApiError;
use crate::event::{EventHub, FeedEvent};
use crate::model::{BatchId, SharedContent, VisualMedia};

/// Attempt ceiling for one album resolution.
pub const MAX_ATTEMPTS: u32 = 12;

/// Fetch an album's photo listing with retry.
///
/// Before attempt `i` (0-based) the task sleeps `2^i − 1` seconds, so the
/// first attempt is immediate and the schedule stretches to roughly half
/// an hour in total. Login/cancellation aborts immediately; every other
/// error class is logged and retried. Returns `None` when aborted or
/// exhausted.
pub async fn resolve_album(
    api: &dyn QzoneApi,
    album: &AlbumRef,
    expected: usize,
) -> Option<Vec<VisualMedia>> {
    for attempt in 0..MAX_ATTEMPTS {
        let backoff = Duration::from_secs((1u64 << attempt) - 1);
        if !backoff.is_zero() {
            tracing::debug!(
                album = %album.album_id,
                attempt,
                backoff_secs = backoff.as_secs(),
                "waiting before album fetch"
            );
            tokio::time::sleep(backoff).await;
        }

        match api.fetch_album(album, expected).await {
            Ok(pictures) => {
                return Some(
                    pictures
                        .into_iter()
                        .map(VisualMedia::from_picture)
                        .collect(),
                );
            }
            Err(err @ ApiError::RateLimited { .. }) => {
                tracing::info!(album = %album.album_id, attempt, error = %err, "album not ready, retrying");
            }
            Err(ApiError::Corrupt(reason)) => {
                tracing::warn!(album = %album.album_id, attempt, reason, "corrupt album payload, retrying");
            }
            Err(err) if err.is_fatal() => {
                tracing::warn!(album = %album.album_id, error = %err, "album fetch aborted");
                return None;
            }
            Err(err) => {
                tracing::info!(album = %album.album_id, attempt, error = %err, "album fetch failed, retrying");
            }
        }
    }

    tracing::debug!(
        album = %album.album_id,
        attempts = MAX_ATTEMPTS,
        "album enrichment abandoned"
    );
    None
}

/// Body of the tracked slow-api task: resolve the album, swap the feed's
/// media list, announce the update.
///
/// `processed_delivery` is the join handle of the feed's `Processed`
/// delivery; awaiting it first guarantees `MediaUpdated` never overtakes
/// `Processed` for the same feed.
pub(crate) async fn enrich_media(
    api: Arc<dyn QzoneApi>,
    hub: EventHub,
    content: SharedContent,
    batch: BatchId,
    album: AlbumRef,
    expected: usize,
    processed_delivery: JoinHandle<()>,
) {
    let _ = processed_delivery.await;
    if let Some(media) = resolve_album(api.as_ref(), &album, expected).await {
        content.write().await.media = media;
        hub.emit(FeedEvent::MediaUpdated { batch, content });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{DetailPayload, FeedPage, PicturePayload};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Album endpoint stub: a scripted list of failures, then success.
    struct AlbumApi {
        attempts: AtomicUsize,
        failures: usize,
        failure: fn() -> ApiError,
    }

    impl AlbumApi {
        fn failing_forever(failure: fn() -> ApiError) -> Self {
            Self {
                attempts: AtomicUsize::new(0),
                failures: usize::MAX,
                failure,
            }
        }

        fn failing_n_times(failures: usize, failure: fn() -> ApiError) -> Self {
            Self {
                attempts: AtomicUsize::new(0),
                failures,
                failure,
            }
        }

        fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl QzoneApi for AlbumApi {
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
            _album: &AlbumRef,
            count: usize,
        ) -> Result<Vec<PicturePayload>, ApiError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.failures {
                return Err((self.failure)());
            }
            Ok((0..count)
                .map(|i| PicturePayload {
                    url: format!("https://p.example/{i}.jpg"),
                    thumbnail: None,
                    height: 100,
                    width: 100,
                })
                .collect())
        }

        async fn poll_new_feed_count(&self) -> Result<u32, ApiError> {
            Ok(0)
        }
    }

    fn album() -> AlbumRef {
        AlbumRef {
            album_id: "alb1".into(),
            host_uin: 9,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_transient_failure_exhausts_silently() {
        let api = AlbumApi::failing_forever(|| ApiError::HttpStatus(502));
        let media = resolve_album(&api, &album(), 3).await;
        assert!(media.is_none());
        assert_eq!(api.attempts(), MAX_ATTEMPTS as usize);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_ready_code_keeps_retrying() {
        let api = AlbumApi::failing_n_times(2, || ApiError::server(crate::error::NOT_READY_CODE, "not ready"));
        let media = resolve_album(&api, &album(), 2).await.unwrap();
        assert_eq!(media.len(), 2);
        assert_eq!(api.attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_error_aborts_immediately() {
        let api = AlbumApi::failing_forever(|| ApiError::LoginExpired);
        let media = resolve_album(&api, &album(), 3).await;
        assert!(media.is_none());
        assert_eq!(api.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_corrupt_payload_retries() {
        let api = AlbumApi::failing_n_times(1, || ApiError::Corrupt("bad photo".into()));
        let media = resolve_album(&api, &album(), 1).await.unwrap();
        assert_eq!(media.len(), 1);
        assert_eq!(api.attempts(), 2);
    }
}
