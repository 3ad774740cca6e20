//! Contract consumed from the external Qzone API client.
//!
//! The transport, login flow and endpoint plumbing live in a separate
//! client crate; this module pins down exactly what the dispatch layer
//! needs from it: five async operations and the payload shapes they
//! return. All operations surface errors through the classified
//! [`ApiError`](crate::error::ApiError) space.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::ApiError;
use crate::model::RawFeed;

/// One page of the active-feeds listing.
#[derive(Debug, Clone, Default)]
pub struct FeedPage {
    /// Feeds in listing order (newest first on the live platform).
    pub feeds: Vec<RawFeed>,
    /// Opaque continuation token to pass into the next page fetch.
    pub attach_info: String,
    /// Whether the listing has more pages after this one.
    pub has_more: bool,
}

/// A single photo entry as returned by the detail and album endpoints.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PicturePayload {
    /// URL of the largest available rendition.
    pub url: String,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub width: u32,
}

impl PicturePayload {
    /// A picture is only usable when its URL is a well-formed http(s) URL.
    pub fn valid_url(&self) -> bool {
        crate::model::is_http_url(&self.url)
    }
}

/// A video entry embedded in a detail payload.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VideoPayload {
    pub video_url: String,
    pub cover_url: String,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub width: u32,
}

/// The original post behind a forwarded feed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum OriginalPost {
    /// Full original feed embedded in the detail payload.
    Feed(Box<OriginalFeed>),
    /// Bare share reference; only the original's key is known.
    Share { unikey: String },
}

/// Identity and content of a forwarded post's original.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OriginalFeed {
    pub appid: i32,
    #[serde(default)]
    pub typeid: i32,
    pub fid: String,
    pub abstime: i64,
    pub uin: u64,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub curkey: Option<String>,
    #[serde(default)]
    pub unikey: Option<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub pictures: Vec<PicturePayload>,
    #[serde(default)]
    pub video: Option<VideoPayload>,
}

/// Full detail payload for a single feed.
///
/// Everything is optional: the endpoint answers for any feed it knows, and
/// sparse answers are normal for shares and plain text posts.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DetailPayload {
    /// Plain-text summary (may still contain emoji codes).
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub pictures: Vec<PicturePayload>,
    #[serde(default)]
    pub video: Option<VideoPayload>,
    #[serde(default)]
    pub original: Option<OriginalPost>,
    /// Full feed markup, present when the listing payload was truncated.
    #[serde(default)]
    pub html: Option<String>,
}

impl DetailPayload {
    /// Whether this payload can replace markup parsing entirely.
    ///
    /// An empty payload, or one carrying broken picture URLs, is not
    /// trusted; the caller falls back to the markup path instead.
    pub fn usable(&self) -> bool {
        let has_content =
            !self.summary.is_empty() || !self.pictures.is_empty() || self.original.is_some();
        has_content && self.pictures.iter().all(PicturePayload::valid_url)
    }
}

/// Pointer to a photo gallery that needs a secondary fetch to enumerate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumRef {
    pub album_id: String,
    /// Owner of the album (needed by the album endpoint).
    pub host_uin: u64,
}

/// The five operations the dispatch layer consumes from the platform
/// client.
///
/// Implementations are expected to handle login/session renewal
/// internally and surface an unrecoverable session as
/// [`ApiError::LoginExpired`]; transport-level retry is likewise the
/// client's business.
#[async_trait]
pub trait QzoneApi: Send + Sync + 'static {
    /// Fetch one page of the active-feeds listing. Pass the previous
    /// page's `attach_info` to continue, or `""` for the first page.
    async fn fetch_page(&self, attach_info: &str) -> Result<FeedPage, ApiError>;

    /// Fetch the full detail payload for one feed.
    async fn fetch_detail(&self, uin: u64, fid: &str) -> Result<DetailPayload, ApiError>;

    /// Fetch untruncated feed markup. `Ok(None)` means the platform had
    /// nothing better than what the listing already returned.
    async fn fetch_full_content(
        &self,
        uin: u64,
        fid: &str,
        feeds_type: u8,
    ) -> Result<Option<String>, ApiError>;

    /// Enumerate the photos of an album. `count` is the number of photos
    /// the feed markup claimed.
    async fn fetch_album(
        &self,
        album: &AlbumRef,
        count: usize,
    ) -> Result<Vec<PicturePayload>, ApiError>;

    /// Session-liveness poll; returns the number of new feeds since the
    /// last poll.
    async fn poll_new_feed_count(&self) -> Result<u32, ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detail_payload_usable() {
        let empty = DetailPayload::default();
        assert!(!empty.usable());

        let text_only = DetailPayload {
            summary: "hello".into(),
            ..Default::default()
        };
        assert!(text_only.usable());

        let bad_pic = DetailPayload {
            summary: "hello".into(),
            pictures: vec![PicturePayload {
                url: "not a url".into(),
                thumbnail: None,
                height: 0,
                width: 0,
            }],
            ..Default::default()
        };
        assert!(!bad_pic.usable());
    }

    #[test]
    fn test_detail_payload_deserializes_sparse_json() {
        let detail: DetailPayload =
            serde_json::from_str(r#"{"summary": "a post"}"#).unwrap();
        assert_eq!(detail.summary, "a post");
        assert!(detail.pictures.is_empty());
        assert!(detail.original.is_none());

        let detail: DetailPayload = serde_json::from_str(
            r#"{
                "summary": "fwd",
                "original": {"unikey": "http://qzone.example/orig"}
            }"#,
        )
        .unwrap();
        match detail.original {
            Some(OriginalPost::Share { unikey }) => {
                assert_eq!(unikey, "http://qzone.example/orig");
            }
            other => panic!("expected share reference, got {other:?}"),
        }
    }
}
