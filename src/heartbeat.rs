//! Session keepalive and incremental refetch.
//!
//! The monitor polls the session-liveness endpoint on a fixed interval.
//! A successful poll resets the failure counter and, when the platform
//! reports new feeds, schedules a `fetch_by_count` for them. Transient
//! failures shorten the next poll to the retry interval; a fatal failure
//! or the retry ceiling ends the loop for good with a single terminal
//! `HeartbeatFailed` event.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;

use crate::config::HeartbeatConfig;
use crate::dispatch::FeedDispatcher;
use crate::error::ApiError;
use crate::event::FeedEvent;
use crate::task::{IntervalTimer, TaskCategory, TimerTick};

/// Lifecycle of the heartbeat loop. Owned exclusively by the monitor;
/// observable through [`HeartbeatMonitor::watch_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatState {
    /// Not started, or stopped by [`HeartbeatMonitor::stop`].
    Idle,
    /// Polling normally.
    Polling,
    /// Last poll failed transiently; polling again on the retry interval.
    RetryableFailure,
    /// Terminal failure; the loop has ended and will not resume.
    Failed,
}

/// Periodic session keepalive bound to a [`FeedDispatcher`].
pub struct HeartbeatMonitor {
    dispatcher: Arc<FeedDispatcher>,
    config: HeartbeatConfig,
    state: watch::Sender<HeartbeatState>,
    failures: AtomicU32,
    timer: Mutex<Option<IntervalTimer>>,
}

impl HeartbeatMonitor {
    /// Create a monitor using the dispatcher's configured heartbeat
    /// settings. Events go out through the dispatcher's hub.
    pub fn new(dispatcher: Arc<FeedDispatcher>) -> Arc<Self> {
        let config = dispatcher.config().heartbeat.clone();
        Self::with_config(dispatcher, config)
    }

    pub fn with_config(dispatcher: Arc<FeedDispatcher>, config: HeartbeatConfig) -> Arc<Self> {
        let (state, _) = watch::channel(HeartbeatState::Idle);
        Arc::new(Self {
            dispatcher,
            config,
            state,
            failures: AtomicU32::new(0),
            timer: Mutex::new(None),
        })
    }

    pub fn state(&self) -> HeartbeatState {
        *self.state.borrow()
    }

    /// Watch state transitions (e.g. to await `Failed` in a supervisor).
    pub fn watch_state(&self) -> watch::Receiver<HeartbeatState> {
        self.state.subscribe()
    }

    /// Begin periodic polling; the first poll fires immediately. Calling
    /// `start` on a running monitor is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut guard = self.timer.lock().expect("heartbeat timer lock poisoned");
        if guard.as_ref().is_some_and(|timer| !timer.is_finished()) {
            tracing::warn!("heartbeat already running");
            return;
        }
        let monitor = Arc::clone(self);
        *guard = Some(IntervalTimer::spawn(
            self.config.interval(),
            Duration::ZERO,
            move || {
                let monitor = Arc::clone(&monitor);
                async move { monitor.poll_once().await }
            },
        ));
    }

    /// One poll of the liveness endpoint, with failure classification.
    ///
    /// Exposed so embedders with their own scheduler can drive the
    /// heartbeat manually; [`start`](Self::start) calls this on a timer.
    pub async fn poll_once(&self) -> TimerTick {
        self.set_state(HeartbeatState::Polling);

        match self.dispatcher.api().poll_new_feed_count().await {
            Ok(count) => {
                self.failures.store(0, Ordering::Relaxed);
                tracing::debug!(count, "heartbeat ok");
                if count > 0 {
                    let dispatcher = Arc::clone(&self.dispatcher);
                    self.dispatcher
                        .registry()
                        .track(TaskCategory::Dispatch, async move {
                            match dispatcher.fetch_by_count(count as usize).await {
                                Ok(got) => {
                                    tracing::debug!(
                                        requested = count,
                                        got,
                                        "heartbeat-triggered fetch finished"
                                    );
                                }
                                Err(err) => {
                                    tracing::warn!(error = %err, "heartbeat-triggered fetch failed");
                                }
                            }
                        });
                }
                TimerTick::Continue
            }
            Err(err) if err.is_fatal() => {
                tracing::warn!(error = %err, "fatal error in heartbeat, stopping");
                self.fail_terminal(err);
                TimerTick::Stop
            }
            Err(err) => {
                let failures = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
                if failures >= self.config.max_retries {
                    tracing::error!(failures, error = %err, "heartbeat retry ceiling reached, stopping");
                    self.fail_terminal(err);
                    TimerTick::Stop
                } else {
                    tracing::warn!(failures, error = %err, "transient error in heartbeat, retrying");
                    self.set_state(HeartbeatState::RetryableFailure);
                    self.dispatcher.hub().emit(FeedEvent::HeartbeatFailed {
                        error: Arc::new(err),
                        will_retry: true,
                    });
                    TimerTick::ContinueAfter(self.config.retry_interval())
                }
            }
        }
    }

    fn fail_terminal(&self, err: ApiError) {
        self.dispatcher.hub().emit(FeedEvent::HeartbeatFailed {
            error: Arc::new(err),
            will_retry: false,
        });
        self.set_state(HeartbeatState::Failed);
    }

    fn set_state(&self, state: HeartbeatState) {
        self.state.send_replace(state);
    }

    /// Cancel the polling loop and all tracked dispatch tasks
    /// unconditionally.
    pub fn stop(&self) {
        tracing::warn!("heartbeat stopping");
        if let Some(timer) = self
            .timer
            .lock()
            .expect("heartbeat timer lock poisoned")
            .take()
        {
            timer.stop();
        }
        if self.state() != HeartbeatState::Failed {
            self.set_state(HeartbeatState::Idle);
        }
        self.dispatcher.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{AlbumRef, DetailPayload, FeedPage, PicturePayload, QzoneApi};
    use crate::config::FeedConfig;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Liveness endpoint stub driven by a script of results.
    struct PollApi {
        polls: AtomicUsize,
        script: Vec<Result<u32, fn() -> ApiError>>,
    }

    impl PollApi {
        fn new(script: Vec<Result<u32, fn() -> ApiError>>) -> Self {
            Self {
                polls: AtomicUsize::new(0),
                script,
            }
        }

        fn polls(&self) -> usize {
            self.polls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl QzoneApi for PollApi {
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
            _count: usize,
        ) -> Result<Vec<PicturePayload>, ApiError> {
            Ok(Vec::new())
        }

        async fn poll_new_feed_count(&self) -> Result<u32, ApiError> {
            let poll = self.polls.fetch_add(1, Ordering::SeqCst);
            match self.script.get(poll) {
                Some(Ok(count)) => Ok(*count),
                Some(Err(failure)) => Err(failure()),
                None => Ok(0),
            }
        }
    }

    fn monitor_with(script: Vec<Result<u32, fn() -> ApiError>>) -> (Arc<HeartbeatMonitor>, Arc<PollApi>) {
        let api = Arc::new(PollApi::new(script));
        let dispatcher = Arc::new(FeedDispatcher::new(
            Arc::clone(&api) as Arc<dyn QzoneApi>,
            FeedConfig::default(),
        ));
        (HeartbeatMonitor::new(dispatcher), api)
    }

    #[tokio::test]
    async fn test_success_resets_failures_and_continues() {
        let (monitor, _api) = monitor_with(vec![Err(|| ApiError::HttpStatus(500)), Ok(0)]);
        assert_eq!(monitor.poll_once().await, TimerTick::ContinueAfter(Duration::from_secs(5)));
        assert_eq!(monitor.state(), HeartbeatState::RetryableFailure);
        assert_eq!(monitor.poll_once().await, TimerTick::Continue);
        assert_eq!(monitor.state(), HeartbeatState::Polling);
        assert_eq!(monitor.failures.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_fatal_error_stops_immediately() {
        let (monitor, _api) = monitor_with(vec![Err(|| ApiError::LoginExpired)]);
        assert_eq!(monitor.poll_once().await, TimerTick::Stop);
        assert_eq!(monitor.state(), HeartbeatState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_ceiling_stops_loop() {
        let (monitor, api) = monitor_with(vec![
            Err(|| ApiError::HttpStatus(500)),
            Err(|| ApiError::HttpStatus(500)),
            Err(|| ApiError::HttpStatus(500)),
        ]);
        let monitor = HeartbeatMonitor::with_config(
            Arc::clone(&monitor.dispatcher),
            HeartbeatConfig {
                interval_secs: 300,
                retry_interval_secs: 1,
                max_retries: 3,
            },
        );
        monitor.start();

        let mut state = monitor.watch_state();
        while *state.borrow() != HeartbeatState::Failed {
            state.changed().await.unwrap();
        }
        // The loop is done; no further polls may happen.
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(api.polls(), 3);
    }
}
