use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

pub const DEFAULT_EXCERPT_CHARS: usize = 160;

static BLOCK_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<!--\s*/?wp:[^>]*-->").expect("valid block comment regex"));
static NEXTPAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<!--\s*nextpage\s*-->").expect("valid nextpage regex"));
static CLASS_ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<(p|h[1-6])(\s[^>]*?)?\s+class=(?:"[^"]*"|'[^']*')"#)
        .expect("valid class attribute regex")
});
static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid html tag regex"));
static BLANK_LINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n\s*").expect("valid paragraph regex"));
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));
static WP_DATETIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4})-(\d{2})-(\d{2})[ T](\d{2}):(\d{2}):(\d{2})$")
        .expect("valid datetime regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PostStatus {
    Published,
    Scheduled,
    Draft,
    Trash,
}

impl PostStatus {
    pub fn from_wordpress(status: &str) -> Self {
        match status.trim() {
            "publish" => Self::Published,
            "future" => Self::Scheduled,
            "trash" => Self::Trash,
            _ => Self::Draft,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Published => "PUBLISHED",
            Self::Scheduled => "SCHEDULED",
            Self::Draft => "DRAFT",
            Self::Trash => "TRASH",
        }
    }
}

/// Turn an unescaped `post_content` into HTML the portal can render.
///
/// Gutenberg block delimiters are dropped, page breaks become `<hr/>` and
/// editor classes on paragraphs and headings are removed. Bodies without any
/// markup are wrapped into `<p>` paragraphs split on blank lines.
pub fn clean_content(raw: &str) -> String {
    if raw.trim().is_empty() {
        return String::new();
    }

    let normalized = raw.replace("\r\n", "\n").replace('\r', "");
    let without_blocks = BLOCK_COMMENT.replace_all(&normalized, "");
    let with_breaks = NEXTPAGE.replace_all(&without_blocks, "<hr/>");
    let without_classes = CLASS_ATTRIBUTE.replace_all(&with_breaks, "<${1}${2}");
    let content = without_classes.trim();

    if HTML_TAG.is_match(content) {
        return content.to_string();
    }

    BLANK_LINES
        .split(content)
        .map(str::trim)
        .filter(|paragraph| !paragraph.is_empty())
        .map(|paragraph| format!("<p>{}</p>", paragraph.replace('\n', "<br>")))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Plain-text summary of at most `max_chars` characters, cut on a word
/// boundary and suffixed with `...` when shortened.
pub fn generate_excerpt(html: &str, max_chars: usize) -> String {
    let stripped = HTML_TAG.replace_all(html, " ");
    let text = WHITESPACE.replace_all(&stripped, " ");
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let cut = text
        .char_indices()
        .nth(max_chars)
        .map(|(index, _)| index)
        .unwrap_or(text.len());
    let head = &text[..cut];
    let head = match head.rfind(char::is_whitespace) {
        Some(boundary) if boundary > 0 => head[..boundary].trim_end(),
        _ => head,
    };
    format!("{head}...")
}

/// URL slug: lowercase ASCII letters and digits joined by single dashes.
/// Punctuation is dropped rather than turned into a separator.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;
    for ch in text.chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch);
        } else if ch.is_whitespace() || ch == '-' || ch == '_' {
            pending_dash = true;
        }
    }
    slug
}

/// Convert a WordPress `Y-m-d H:i:s` value to an ISO-8601 UTC timestamp.
/// The zero date WordPress stores for unscheduled drafts yields `None`.
pub fn wordpress_timestamp(value: &str) -> Option<String> {
    let captures = WP_DATETIME.captures(value.trim())?;
    let field = |index: usize| captures.get(index).map(|m| m.as_str()).unwrap_or("00");
    if field(1) == "0000" || field(2) == "00" || field(3) == "00" {
        return None;
    }
    Some(format!(
        "{}-{}-{}T{}:{}:{}Z",
        field(1),
        field(2),
        field(3),
        field(4),
        field(5),
        field(6)
    ))
}
