//! Canonical feed content model.
//!
//! A [`RawFeed`] is what the listing endpoint hands over: immutable, with
//! its displayable content still buried in markup. The dispatcher
//! normalizes each one into a [`FeedContent`], which starts as bare
//! identity fields and is filled in incrementally as detail, markup
//! content and media resolution complete. Consumers receive the model
//! behind [`SharedContent`] and must tolerate partial state until the
//! feed's terminal event fires.

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::RwLock;

use crate::api::{DetailPayload, OriginalFeed, OriginalPost, PicturePayload, VideoPayload};
use crate::markup::{MarkupContent, MarkupInfo};

/// Correlates every event emitted by one top-level fetch call.
///
/// Allocated at call start, monotonically increasing, never reused. The
/// same feed can therefore appear under different batch ids across calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchId(pub u64);

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch#{}", self.0)
    }
}

/// One record from the active-feeds listing, as received.
#[derive(Debug, Clone, Deserialize)]
pub struct RawFeed {
    pub appid: i32,
    #[serde(default)]
    pub typeid: i32,
    /// Feed id. A long hex string for common feeds (appid 311); a short
    /// shared placeholder for other app sources, so never a sufficient
    /// identifier on its own.
    pub fid: String,
    /// Creation time, unix seconds.
    pub abstime: i64,
    /// Owner uin.
    pub uin: u64,
    #[serde(default)]
    pub nickname: String,
    /// Raw feed markup.
    pub html: String,
    /// Identifier of this feed itself; may be a URL.
    #[serde(default)]
    pub curkey: Option<String>,
    /// Identifier of the original content; may be a URL.
    #[serde(default)]
    pub unikey: Option<String>,
    #[serde(default)]
    pub topic_id: String,
    #[serde(default)]
    pub is_liked: bool,
    /// Listing payload is itself incomplete; a follow-up detail call can
    /// enrich it.
    #[serde(default)]
    pub has_more: bool,
}

/// A resolved photo or video reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisualMedia {
    pub height: u32,
    pub width: u32,
    /// URL of the raw photo / video stream.
    pub raw: String,
    pub is_video: bool,
    pub thumbnail: Option<String>,
}

impl VisualMedia {
    pub fn from_picture(pic: PicturePayload) -> Self {
        Self {
            height: pic.height,
            width: pic.width,
            thumbnail: pic.thumbnail.or_else(|| Some(pic.url.clone())),
            raw: pic.url,
            is_video: false,
        }
    }

    pub fn from_video(video: &VideoPayload) -> Self {
        Self {
            height: video.height,
            width: video.width,
            thumbnail: Some(video.cover_url.clone()),
            raw: video.video_url.clone(),
            is_video: true,
        }
    }

    /// Provisional entry built from a markup thumbnail, before the album
    /// has been resolved.
    pub fn from_thumbnail(src: &str) -> Self {
        Self {
            height: 0,
            width: 0,
            raw: src.to_string(),
            is_video: false,
            thumbnail: Some(src.to_string()),
        }
    }
}

/// Reference to the content a feed forwards, if any.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Forward {
    /// Not a forward (or not resolved yet).
    #[default]
    None,
    /// Only the original's key (often a URL) is known.
    Key(String),
    /// The original post, embedded.
    Post(Box<FeedContent>),
}

/// Normalized feed with its content.
///
/// Identity fields are set at construction; `content`, `media`, `forward`
/// and `detail` are filled as the asynchronous legs of dispatch complete.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedContent {
    pub appid: i32,
    pub typeid: i32,
    pub fid: String,
    pub abstime: i64,
    pub uin: u64,
    pub nickname: String,
    pub curkey: Option<String>,
    pub unikey: Option<String>,
    pub topic_id: String,
    pub is_liked: bool,
    /// Displayable text, emoji codes already translated on the detail
    /// path.
    pub content: String,
    /// Media list. Replaced wholesale when resolution completes, never
    /// appended piecemeal.
    pub media: Vec<VisualMedia>,
    pub forward: Forward,
    /// Raw detail payload, kept when the detail path supplied it.
    pub detail: Option<DetailPayload>,
}

impl FeedContent {
    /// Extract identity and timestamp fields from a raw feed. Infallible;
    /// content fields start unset.
    pub fn from_raw(feed: &RawFeed) -> Self {
        Self {
            appid: feed.appid,
            typeid: feed.typeid,
            fid: feed.fid.clone(),
            abstime: feed.abstime,
            uin: feed.uin,
            nickname: feed.nickname.clone(),
            curkey: feed.curkey.clone(),
            unikey: feed.unikey.clone(),
            topic_id: feed.topic_id.clone(),
            is_liked: feed.is_liked,
            ..Default::default()
        }
    }

    /// Overlay the structural info extracted from markup. Markup keys win
    /// over whatever the listing payload carried.
    pub fn apply_markup_info(&mut self, info: &MarkupInfo) {
        if info.curkey.is_some() {
            self.curkey = info.curkey.clone();
        }
        if info.unikey.is_some() {
            self.unikey = info.unikey.clone();
        }
    }

    /// Apply a full detail payload: text, media, and the forwarded
    /// original. Idempotent for identical input — every field is
    /// replaced, not extended.
    pub fn apply_detail(&mut self, detail: &DetailPayload) {
        self.content = detail.summary.clone();

        match &detail.original {
            Some(OriginalPost::Feed(original)) => {
                self.forward = Forward::Post(Box::new(FeedContent::from_original(original)));
            }
            Some(OriginalPost::Share { unikey }) => {
                self.forward = Forward::Key(unikey.clone());
            }
            None => {}
        }

        let mut media: Vec<VisualMedia> = detail
            .pictures
            .iter()
            .cloned()
            .map(VisualMedia::from_picture)
            .collect();
        if let Some(video) = &detail.video {
            media.insert(0, VisualMedia::from_video(video));
        }
        if !media.is_empty() {
            self.media = media;
        }

        self.detail = Some(detail.clone());
    }

    /// Apply content parsed out of feed markup: display text plus
    /// provisional thumbnail media. Idempotent for identical input.
    pub fn apply_markup_content(&mut self, content: &MarkupContent) {
        self.content = content.text.clone();
        if !content.pictures.is_empty() {
            self.media = content
                .pictures
                .iter()
                .map(|src| VisualMedia::from_thumbnail(src))
                .collect();
        }
    }

    fn from_original(original: &OriginalFeed) -> Self {
        let mut media: Vec<VisualMedia> = original
            .pictures
            .iter()
            .cloned()
            .map(VisualMedia::from_picture)
            .collect();
        if let Some(video) = &original.video {
            media.insert(0, VisualMedia::from_video(video));
        }
        Self {
            appid: original.appid,
            typeid: original.typeid,
            fid: original.fid.clone(),
            abstime: original.abstime,
            uin: original.uin,
            nickname: original.nickname.clone(),
            curkey: original.curkey.clone(),
            unikey: original.unikey.clone(),
            content: original.summary.clone(),
            media,
            ..Default::default()
        }
    }

    /// Chronological sort key: `(abstime, uin)`. Distinct feeds can share
    /// a key, so this is a sorting aid, not an identity.
    pub fn sort_key(&self) -> (i64, u64) {
        (self.abstime, self.uin)
    }
}

/// Content model shared between the per-feed task, the slow media task and
/// subscribers.
pub type SharedContent = Arc<RwLock<FeedContent>>;

/// Whether `s` parses as an absolute http(s) URL.
pub(crate) fn is_http_url(s: &str) -> bool {
    url::Url::parse(s)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}
