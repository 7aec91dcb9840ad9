//! Plain-text normalization of wikitext field values.

use regex::Regex;
use std::sync::LazyLock;

static COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?(-->|$)").unwrap());
static REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<ref[^>]*/>|<ref[^>]*>.*?</ref\s*>").unwrap()
});
static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"</?[a-zA-Z][^<>]*>").unwrap());
static FILE_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\[\[\s*(file|image|category)\s*:[^\[\]]*\]\]").unwrap());
static INTERNAL_LINK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[\[([^\[\]]*)\]\]").unwrap());
static EXTERNAL_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(?:https?:)?//[^\s\]]+(?:\s+([^\]]*))?\]").unwrap());
static EMPHASIS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"'{2,}").unwrap());
static MAGIC_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"__[A-Z]+__").unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+").unwrap());

/// Display text of a `[[target|label]]` link body: the text after the last
/// `|`, or the whole body when there is no separator.
pub fn link_display_text(inner: &str) -> &str {
    let text = match inner.rfind('|') {
        Some(pos) => &inner[pos + 1..],
        None => inner,
    };
    text.trim()
}

/// Strip link syntax, comments, references and HTML from a wikitext fragment.
///
/// Line breaks are preserved so callers can still split paragraphs.
pub fn strip_markup(raw: &str) -> String {
    let text = COMMENT.replace_all(raw, "");
    let text = REF.replace_all(&text, "");
    let text = HTML_TAG.replace_all(&text, "");
    let text = FILE_LINK.replace_all(&text, "");

    // Innermost links first so nested link bodies collapse outward
    let mut text = text.into_owned();
    loop {
        let next = INTERNAL_LINK
            .replace_all(&text, |caps: &regex::Captures| {
                link_display_text(&caps[1]).to_string()
            })
            .into_owned();
        if next == text {
            break;
        }
        text = next;
    }

    let text = EXTERNAL_LINK.replace_all(&text, |caps: &regex::Captures| {
        caps.get(1).map(|m| m.as_str().trim().to_string()).unwrap_or_default()
    });
    let text = EMPHASIS.replace_all(&text, "");
    let text = MAGIC_WORD.replace_all(&text, "");
    let text = decode_entities(&text);

    text.lines()
        .map(|line| WHITESPACE.replace_all(line.trim(), " ").into_owned())
        .collect::<Vec<_>>()
        .join("\n")
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Normalize a listing argument: strip markup and collapse whitespace.
///
/// Empty results and the literal token "None" are treated as absent.
pub fn clean_field(raw: &str) -> Option<String> {
    let text = strip_markup(raw);
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() || text == "None" {
        None
    } else {
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_display_text() {
        assert_eq!(link_display_text("Louvre|the Louvre"), "the Louvre");
        assert_eq!(link_display_text("Louvre"), "Louvre");
        assert_eq!(link_display_text("a|b|c"), "c");
    }

    #[test]
    fn test_strip_markup_links_and_html() {
        let raw = "Visit [[Paris/Louvre|the Louvre]] and [[Orsay]]<!-- hidden --> <b>today</b>";
        assert_eq!(strip_markup(raw), "Visit the Louvre and Orsay today");
    }

    #[test]
    fn test_strip_markup_external_links_and_refs() {
        let raw = "See [https://example.org the site]<ref>source</ref> or [http://x.org].";
        assert_eq!(strip_markup(raw), "See the site or .");
    }

    #[test]
    fn test_strip_markup_drops_files_and_emphasis() {
        let raw = "[[File:Tower.jpg|thumb|A tower]]'''Big''' ''tower''";
        assert_eq!(strip_markup(raw), "Big tower");
    }

    #[test]
    fn test_clean_field_absent_values() {
        assert_eq!(clean_field(""), None);
        assert_eq!(clean_field("   "), None);
        assert_eq!(clean_field("None"), None);
        assert_eq!(clean_field(" 10  Main St "), Some("10 Main St".to_string()));
    }
}
