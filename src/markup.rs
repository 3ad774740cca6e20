//! Structural extraction from feed markup.
//!
//! Feed payloads embed their metadata in a small, stable markup dialect:
//! an `<i name="feed_data">` element carries the structural attributes
//! (`data-unikey`, `data-curkey`, `data-feedstype`), display text lives in
//! `div.f-info` blocks, thumbnails sit under `div.img-box`, and a gallery
//! is announced through `data-albumid`/`data-hostuin` attributes. A
//! truncated feed contains a `qz_toggle` expand link.
//!
//! Only the handful of hooks the dispatcher needs is extracted here; the
//! markup grammar itself is the platform's business, not ours.

use std::sync::OnceLock;

use scraper::{Html, Selector};

use crate::api::AlbumRef;
use crate::error::MalformedContent;

struct Selectors {
    feed_data: Selector,
    toggle: Selector,
    info_text: Selector,
    pictures: Selector,
    album: Selector,
}

fn selectors() -> &'static Selectors {
    static SELECTORS: OnceLock<Selectors> = OnceLock::new();
    SELECTORS.get_or_init(|| Selectors {
        feed_data: Selector::parse(r#"i[name="feed_data"]"#).expect("static selector"),
        toggle: Selector::parse(r#"a[data-cmd="qz_toggle"]"#).expect("static selector"),
        info_text: Selector::parse("div.f-info").expect("static selector"),
        pictures: Selector::parse("div.img-box img").expect("static selector"),
        album: Selector::parse("[data-albumid]").expect("static selector"),
    })
}

/// Minimal structural info every processable feed must expose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkupInfo {
    /// Whether the markup already contains the full content. Truncated
    /// feeds need a full-content fetch before parsing.
    pub complete: bool,
    /// Platform content-kind discriminator, passed back verbatim to the
    /// full-content endpoint.
    pub feeds_type: u8,
    pub unikey: Option<String>,
    pub curkey: Option<String>,
}

impl MarkupInfo {
    /// Extract structural info from feed markup.
    ///
    /// Fails with [`MalformedContent`] when the `feed_data` element is
    /// missing or carries neither key — such feeds cannot be identified
    /// and are routed to the dropped path by the dispatcher.
    pub fn parse(html: &str) -> Result<Self, MalformedContent> {
        let doc = Html::parse_fragment(html);
        let sel = selectors();

        let data = doc
            .select(&sel.feed_data)
            .next()
            .ok_or_else(|| MalformedContent("no feed_data element".into()))?;

        let attr = |name: &str| {
            data.value()
                .attr(name)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_owned)
        };

        let unikey = attr("data-unikey");
        let curkey = attr("data-curkey");
        if unikey.is_none() && curkey.is_none() {
            return Err(MalformedContent("feed_data carries no unikey/curkey".into()));
        }

        let feeds_type = data
            .value()
            .attr("data-feedstype")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0);

        let complete = doc.select(&sel.toggle).next().is_none();

        Ok(Self {
            complete,
            feeds_type,
            unikey,
            curkey,
        })
    }
}

/// Displayable content extracted from feed markup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkupContent {
    /// Concatenated display text.
    pub text: String,
    /// Thumbnail picture URLs, in markup order.
    pub pictures: Vec<String>,
    /// Gallery pointer, when the feed references an album.
    pub album: Option<AlbumRef>,
}

impl MarkupContent {
    /// Extract display content from feed markup. Never fails: a feed
    /// without text blocks simply yields empty content.
    ///
    /// `host_uin` is the fallback album owner when the markup does not
    /// name one.
    pub fn parse(html: &str, host_uin: u64) -> Self {
        let doc = Html::parse_fragment(html);
        let sel = selectors();

        let text = doc
            .select(&sel.info_text)
            .map(|el| {
                el.text()
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        let pictures = doc
            .select(&sel.pictures)
            .filter_map(|img| img.value().attr("src"))
            .map(str::to_owned)
            .collect();

        let album = doc.select(&sel.album).next().and_then(|el| {
            let album_id = el.value().attr("data-albumid")?.trim();
            if album_id.is_empty() {
                return None;
            }
            let host = el
                .value()
                .attr("data-hostuin")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(host_uin);
            Some(AlbumRef {
                album_id: album_id.to_owned(),
                host_uin: host,
            })
        });

        Self {
            text,
            pictures,
            album,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const COMPLETE_FEED: &str = r#"
        <i name="feed_data" data-unikey="http://qzone.example/u/1/f1"
           data-curkey="f1" data-feedstype="2"></i>
        <div class="f-info">hello <b>world</b></div>
        <div class="img-box" data-albumid="alb9" data-hostuin="77">
            <img src="https://p.example/t1.jpg">
            <img src="https://p.example/t2.jpg">
        </div>
    "#;

    #[test]
    fn test_info_extraction() {
        let info = MarkupInfo::parse(COMPLETE_FEED).unwrap();
        assert!(info.complete);
        assert_eq!(info.feeds_type, 2);
        assert_eq!(info.unikey.as_deref(), Some("http://qzone.example/u/1/f1"));
        assert_eq!(info.curkey.as_deref(), Some("f1"));
    }

    #[test]
    fn test_truncated_feed_is_incomplete() {
        let html = r#"
            <i name="feed_data" data-unikey="u1"></i>
            <div class="f-info">partial text</div>
            <a data-cmd="qz_toggle">expand</a>
        "#;
        let info = MarkupInfo::parse(html).unwrap();
        assert!(!info.complete);
        assert_eq!(info.feeds_type, 0);
    }

    #[test]
    fn test_missing_feed_data_is_malformed() {
        assert!(MarkupInfo::parse("<div class=\"f-info\">text</div>").is_err());
    }

    #[test]
    fn test_feed_data_without_keys_is_malformed() {
        let html = r#"<i name="feed_data" data-feedstype="0"></i>"#;
        let err = MarkupInfo::parse(html).unwrap_err();
        assert!(err.to_string().contains("unikey"));
    }

    #[test]
    fn test_content_extraction() {
        let content = MarkupContent::parse(COMPLETE_FEED, 1);
        assert_eq!(content.text, "hello world");
        assert_eq!(
            content.pictures,
            vec!["https://p.example/t1.jpg", "https://p.example/t2.jpg"]
        );
        assert_eq!(
            content.album,
            Some(AlbumRef {
                album_id: "alb9".into(),
                host_uin: 77
            })
        );
    }

    #[test]
    fn test_album_host_falls_back_to_feed_owner() {
        let html = r#"
            <i name="feed_data" data-unikey="u1"></i>
            <div class="img-box" data-albumid="alb1"><img src="https://p.example/t.jpg"></div>
        "#;
        let content = MarkupContent::parse(html, 4242);
        assert_eq!(content.album.unwrap().host_uin, 4242);
    }

    #[test]
    fn test_textless_feed_yields_empty_content() {
        let content = MarkupContent::parse(r#"<i name="feed_data" data-unikey="u1"></i>"#, 1);
        assert!(content.text.is_empty());
        assert!(content.pictures.is_empty());
        assert!(content.album.is_none());
    }
}
