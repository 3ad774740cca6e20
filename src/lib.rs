//! Feed fetching and event dispatch for a Qzone-style social platform.
//!
//! This crate sits between an external platform API client and whatever
//! consumes feeds (a bot, a bridge, an archiver). It owns the messy
//! middle: paging the listing, deciding per feed which secondary fetches
//! are worth making, normalizing the results into one content model, and
//! announcing lifecycle events to subscribers.
//!
//! # Architecture
//!
//! - [`api`] — the [`QzoneApi`](api::QzoneApi) trait: the five operations
//!   consumed from the platform client, and their payload types
//! - [`dispatch`] — the [`FeedDispatcher`](dispatch::FeedDispatcher):
//!   batch fetching and the per-feed decision tree, plus slow-path media
//!   resolution
//! - [`heartbeat`] — session keepalive polling that triggers incremental
//!   refetches
//! - [`event`] — typed pub/sub for `Processed` / `Dropped` /
//!   `MediaUpdated` / `HeartbeatFailed`
//! - [`task`] — bookkeeping for the fire-and-forget tasks the above spawn
//! - [`model`], [`markup`], [`emoji`] — the canonical content model and
//!   the normalization helpers that fill it
//!
//! # Example
//!
//! ```ignore
//! let dispatcher = Arc::new(FeedDispatcher::new(client, FeedConfig::default()));
//! dispatcher.hub().subscribe(EventKind::Processed, |event| async move {
//!     if let FeedEvent::Processed { batch, content } = event {
//!         println!("{batch}: {}", content.read().await.content);
//!     }
//!     Ok(())
//! });
//!
//! let got = dispatcher.fetch_by_count(10).await?;
//! dispatcher.wait_settled(None).await;
//!
//! let heartbeat = HeartbeatMonitor::new(Arc::clone(&dispatcher));
//! heartbeat.start();
//! ```

pub mod api;
pub mod config;
pub mod dispatch;
pub mod emoji;
pub mod error;
pub mod event;
pub mod heartbeat;
pub mod markup;
pub mod model;
pub mod task;

pub use api::{AlbumRef, DetailPayload, FeedPage, PicturePayload, QzoneApi, VideoPayload};
pub use config::{ConfigError, FeedConfig, HeartbeatConfig};
pub use dispatch::{media::resolve_album, FeedDispatcher, StopPredicate};
pub use error::{ApiError, ErrorStack, MalformedContent};
pub use event::{EventHub, EventKind, FeedEvent, SubscriberId};
pub use heartbeat::{HeartbeatMonitor, HeartbeatState};
pub use markup::{MarkupContent, MarkupInfo};
pub use model::{BatchId, FeedContent, Forward, RawFeed, SharedContent, VisualMedia};
pub use task::{IntervalTimer, TaskCategory, TaskRegistry, TimerTick, WaitOutcome};
