//! Rendering of platform text with tagged entities into linked HTML

use regex::Regex;
use std::sync::OnceLock;

/// A span of the source text replaced by pre-rendered markup
///
/// Offsets are byte offsets into the source text.
#[derive(Debug, Clone, PartialEq)]
pub struct TextEntity {
    pub start: usize,
    pub end: usize,
    pub html: String,
}

impl TextEntity {
    /// Build from code-point offsets, as reported by most platform APIs
    pub fn from_chars(text: &str, start: usize, end: usize, html: String) -> Option<Self> {
        let start = char_to_byte(text, start)?;
        let end = char_to_byte(text, end)?;
        (start < end).then_some(Self { start, end, html })
    }

    /// Build from UTF-16 offset and length (Facebook message tags)
    pub fn from_utf16(text: &str, offset: usize, length: usize, html: String) -> Option<Self> {
        let start = utf16_to_byte(text, offset)?;
        let end = utf16_to_byte(text, offset + length)?;
        (start < end).then_some(Self { start, end, html })
    }

    pub fn source<'a>(&self, text: &'a str) -> &'a str {
        &text[self.start..self.end]
    }
}

fn char_to_byte(text: &str, index: usize) -> Option<usize> {
    text.char_indices()
        .map(|(b, _)| b)
        .chain(std::iter::once(text.len()))
        .nth(index)
}

fn utf16_to_byte(text: &str, index: usize) -> Option<usize> {
    let mut units = 0;
    for (byte, c) in text.char_indices() {
        if units == index {
            return Some(byte);
        }
        units += c.len_utf16();
    }
    (units == index).then_some(text.len())
}

/// `<a href>` with escaped target and label
pub fn link(href: &str, label: &str) -> String {
    format!(
        r#"<a href="{}">{}</a>"#,
        html_escape::encode_double_quoted_attribute(href),
        html_escape::encode_text(label)
    )
}

/// Replace entity spans with their markup and escape everything else
///
/// Overlapping entities are dropped in favour of the one starting first.
pub fn render(text: &str, mut entities: Vec<TextEntity>) -> String {
    entities.sort_by_key(|e| (e.start, std::cmp::Reverse(e.end)));

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for entity in entities {
        if entity.start < cursor || entity.end > text.len() {
            continue;
        }
        out.push_str(&html_escape::encode_text(&text[cursor..entity.start]));
        out.push_str(&entity.html);
        cursor = entity.end;
    }
    out.push_str(&html_escape::encode_text(&text[cursor..]));
    out
}

fn url_regex() -> &'static Regex {
    static URL: OnceLock<Regex> = OnceLock::new();
    URL.get_or_init(|| {
        Regex::new(r#"(?i)\b(?:https?://|www\.)[^\s<>"']+"#).expect("valid URL pattern")
    })
}

/// Entities for bare URLs in `text`
pub fn url_entities(text: &str) -> Vec<TextEntity> {
    url_regex()
        .find_iter(text)
        .filter_map(|m| {
            let raw = m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?', ')']);
            if raw.is_empty() {
                return None;
            }
            let href = if raw.starts_with("www.") {
                format!("https://{}", raw)
            } else {
                raw.to_string()
            };
            Some(TextEntity {
                start: m.start(),
                end: m.start() + raw.len(),
                html: link(&href, raw),
            })
        })
        .collect()
}

/// Escape text and turn bare URLs into links
pub fn highlight_urls(text: &str) -> String {
    render(text, url_entities(text))
}
