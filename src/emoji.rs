//! Emoji-code translation.
//!
//! Platform text encodes emoji two ways: an inline tag (`[em]e100[/em]`)
//! and, inside markup, an `<img>` pointing at the emoji CDN
//! (`http://qzonestyle.example/qzone/em/e100.png`). Both forms translate
//! to a bracketed name when the id is known; unknown ids normalize to the
//! tag form so downstream text stays readable either way.

use std::sync::OnceLock;

use regex::Regex;

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[em\]e(\d+)\[/em\]").expect("static regex"))
}

fn url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"https?://[\w.]+/qzone/em/e(\d+)\.\w{3}").expect("static regex"))
}

/// The ids that show up in virtually all feed text. Anything rarer keeps
/// its numeric tag.
const EMOJI_NAMES: &[(u32, &str)] = &[
    (100, "微笑"),
    (101, "撇嘴"),
    (102, "色"),
    (103, "发呆"),
    (104, "得意"),
    (105, "流泪"),
    (106, "害羞"),
    (107, "闭嘴"),
    (108, "睡"),
    (109, "大哭"),
    (110, "尴尬"),
    (111, "发怒"),
    (112, "调皮"),
    (113, "呲牙"),
    (114, "惊讶"),
    (115, "难过"),
    (116, "酷"),
    (118, "抓狂"),
    (120, "偷笑"),
    (121, "可爱"),
    (123, "傲慢"),
    (125, "困"),
    (128, "咒骂"),
    (129, "疑问"),
    (130, "嘘"),
    (131, "晕"),
    (173, "心"),
    (174, "心碎"),
    (175, "礼物"),
    (176, "太阳"),
];

fn name_of(id: u32) -> Option<&'static str> {
    EMOJI_NAMES
        .binary_search_by_key(&id, |(eid, _)| *eid)
        .ok()
        .map(|idx| EMOJI_NAMES[idx].1)
}

fn render(id: u32) -> String {
    match name_of(id) {
        Some(name) => format!("[{name}]"),
        None => format!("[em]e{id}[/em]"),
    }
}

/// Translate all emoji codes in `text` to plain text.
///
/// Idempotent: text without codes (including already-translated text)
/// passes through unchanged.
pub fn translate(text: &str) -> String {
    let pass = url_re().replace_all(text, |caps: &regex::Captures<'_>| {
        // The capture is \d+, parse cannot fail within u32 range of real ids.
        caps[1].parse::<u32>().map(render).unwrap_or_default()
    });
    tag_re()
        .replace_all(&pass, |caps: &regex::Captures<'_>| {
            caps[1].parse::<u32>().map(render).unwrap_or_default()
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_tag_form_translates() {
        assert_eq!(translate("hi [em]e100[/em]!"), "hi [微笑]!");
    }

    #[test]
    fn test_url_form_translates() {
        let text = "look http://qzonestyle.gtimg.cn/qzone/em/e105.png here";
        assert_eq!(translate(text), "look [流泪] here");
    }

    #[test]
    fn test_unknown_id_normalizes_to_tag() {
        assert_eq!(translate("[em]e40004[/em]"), "[em]e40004[/em]");
        assert_eq!(
            translate("http://qzonestyle.gtimg.cn/qzone/em/e40004.gif"),
            "[em]e40004[/em]"
        );
    }

    #[test]
    fn test_plain_text_unchanged() {
        let text = "no emoji here, just [brackets] and http://example.com/a.png";
        assert_eq!(translate(text), text);
    }

    #[test]
    fn test_idempotent() {
        let once = translate("a [em]e113[/em] b [em]e99999[/em]");
        assert_eq!(translate(&once), once);
    }

    #[test]
    fn test_table_is_sorted_for_binary_search() {
        let mut sorted = EMOJI_NAMES.to_vec();
        sorted.sort_by_key(|(id, _)| *id);
        assert_eq!(sorted, EMOJI_NAMES);
    }
}
