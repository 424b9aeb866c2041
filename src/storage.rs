//! Confluence storage-format conversion.
//!
//! Turns a page's storage XHTML into searchable plain text. Code macros are
//! kept as Markdown fences (and lifted out as `code` elements), headings are
//! lifted out as `heading` elements, and every other tag is dropped.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{ElementKind, PageElement};

/// Result of converting one storage body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Converted {
    pub text: String,
    pub elements: Vec<PageElement>,
}

static CODE_MACRO_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?s)<ac:structured-macro\b[^>]*\bac:name="(?:code|noformat)"[^>]*>(.*?)</ac:structured-macro>"#,
    )
    .expect("valid regex")
});

static LANGUAGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)<ac:parameter\b[^>]*\bac:name="language"[^>]*>(.*?)</ac:parameter>"#)
        .expect("valid regex")
});

static PLAIN_BODY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<ac:plain-text-body>\s*(?:<!\[CDATA\[(.*?)\]\]>|(.*?))\s*</ac:plain-text-body>")
        .expect("valid regex")
});

static HEADING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<h([1-6])\b[^>]*>(.*?)</h[1-6]>").expect("valid regex"));

static PRE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<pre\b[^>]*>(.*?)</pre>").expect("valid regex"));

static BLOCK_TAG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)</?(?:p|div|br|li|ul|ol|tr|table|h[1-6]|blockquote|ac:task|hr)\b[^>]*/?>")
        .expect("valid regex")
});

static CELL_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)</t[dh]>").expect("valid regex"));

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"));

static CDATA_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<!\[CDATA\[(.*?)\]\]>").expect("valid regex"));

static FENCE_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x00CODE(\d+)\x00").expect("valid regex"));

/// Convert storage XHTML to text plus extracted elements.
pub fn convert(storage: &str) -> Converted {
    // Code bodies must survive tag stripping untouched, so they are swapped
    // out for placeholder tokens first and restored at the end.
    let mut code_blocks: Vec<(Option<String>, String)> = Vec::new();

    let with_tokens = CODE_MACRO_RE.replace_all(storage, |caps: &regex::Captures| {
        let inner = &caps[1];
        let language = LANGUAGE_RE
            .captures(inner)
            .map(|c| decode_entities(c[1].trim()))
            .filter(|l| !l.is_empty());
        // CDATA bodies are literal; bare bodies are escaped XHTML.
        let body = PLAIN_BODY_RE
            .captures(inner)
            .and_then(|c| match (c.get(1), c.get(2)) {
                (Some(cdata), _) => Some(cdata.as_str().to_string()),
                (None, Some(bare)) => Some(decode_entities(bare.as_str())),
                (None, None) => None,
            })
            .unwrap_or_default();
        code_blocks.push((language, body));
        format!("\n\x00CODE{}\x00\n", code_blocks.len() - 1)
    });

    let with_tokens = PRE_RE.replace_all(&with_tokens, |caps: &regex::Captures| {
        let body = decode_entities(&TAG_RE.replace_all(&caps[1], ""));
        code_blocks.push((None, body));
        format!("\n\x00CODE{}\x00\n", code_blocks.len() - 1)
    });

    // Headings are recorded in document order relative to code blocks.
    let mut ordered: Vec<(usize, PageElement)> = Vec::new();
    for caps in HEADING_RE.captures_iter(&with_tokens) {
        let offset = caps.get(0).map(|m| m.start()).unwrap_or(0);
        let text = collapse_inline(&decode_entities(&TAG_RE.replace_all(&caps[2], "")));
        if !text.is_empty() {
            ordered.push((
                offset,
                PageElement {
                    kind: ElementKind::Heading,
                    language: None,
                    content: text,
                    position: 0,
                },
            ));
        }
    }
    for m in FENCE_TOKEN_RE.captures_iter(&with_tokens) {
        let offset = m.get(0).map(|m| m.start()).unwrap_or(0);
        let idx: usize = m[1].parse().unwrap_or(usize::MAX);
        if let Some((language, body)) = code_blocks.get(idx) {
            ordered.push((
                offset,
                PageElement {
                    kind: ElementKind::Code,
                    language: language.clone(),
                    content: body.clone(),
                    position: 0,
                },
            ));
        }
    }
    ordered.sort_by_key(|(offset, _)| *offset);
    let elements = ordered
        .into_iter()
        .enumerate()
        .map(|(i, (_, mut el))| {
            el.position = i as i64;
            el
        })
        .collect();

    let text = CDATA_RE.replace_all(&with_tokens, "$1");
    let text = CELL_TAG_RE.replace_all(&text, " | ");
    let text = BLOCK_TAG_RE.replace_all(&text, "\n");
    let text = TAG_RE.replace_all(&text, "");
    let text = decode_entities(&text);
    let text = collapse_whitespace(&text);

    let text = FENCE_TOKEN_RE
        .replace_all(&text, |caps: &regex::Captures| {
            let idx: usize = caps[1].parse().unwrap_or(usize::MAX);
            match code_blocks.get(idx) {
                Some((language, body)) => format!(
                    "```{}\n{}\n```",
                    language.as_deref().unwrap_or(""),
                    body.trim_end_matches('\n')
                ),
                None => String::new(),
            }
        })
        .into_owned();

    Converted {
        text: text.trim().to_string(),
        elements,
    }
}

/// Decode the handful of entities Confluence emits in storage bodies.
pub fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let mut out = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&rsquo;", "'")
        .replace("&lsquo;", "'")
        .replace("&rdquo;", "\"")
        .replace("&ldquo;", "\"")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&hellip;", "...");
    // `&amp;` last so escaped entities are not decoded twice
    out = out.replace("&amp;", "&");
    out
}

fn collapse_inline(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Collapse runs of spaces within lines and runs of blank lines, leaving
/// placeholder tokens on their own lines.
fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines() {
        let line = collapse_inline(line);
        if line.is_empty() {
            blank_run += 1;
            if blank_run == 1 && !out.is_empty() {
                out.push('\n');
            }
            continue;
        }
        blank_run = 0;
        out.push_str(&line);
        out.push('\n');
    }
    out
}
