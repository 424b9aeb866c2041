//! Query routing.
//!
//! Decides whether a chat query should go through the retrieval cascade or be
//! answered directly, and whether it looks code-related (which enables the
//! code-block stage of the cascade).

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;

/// Why a query is answered without retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectReason {
    Empty,
    SmallTalk,
    AboutAssistant,
    NoKeywords,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "route", rename_all = "snake_case")]
pub enum Route {
    Direct { reason: DirectReason },
    Retrieve { code: bool, keywords: Vec<String> },
}

impl Route {
    pub fn label(&self) -> &'static str {
        match self {
            Route::Direct { .. } => "direct",
            Route::Retrieve { .. } => "retrieve",
        }
    }
}

const SMALL_TALK: &[&str] = &[
    "hi",
    "hello",
    "hey",
    "hey there",
    "hi there",
    "hello there",
    "yo",
    "thanks",
    "thank you",
    "thx",
    "ty",
    "ok",
    "okay",
    "cool",
    "great",
    "nice",
    "bye",
    "goodbye",
    "see you",
    "good morning",
    "good afternoon",
    "good evening",
    "how are you",
    "how are you doing",
    "whats up",
    "sup",
];

const ABOUT_ASSISTANT: &[&str] = &[
    "who are you",
    "what are you",
    "what can you do",
    "what do you do",
    "help",
    "what is your name",
    "whats your name",
];

const STOPWORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "all", "am", "an", "and", "any", "are", "as", "at",
    "be", "because", "been", "before", "being", "below", "between", "both", "but", "by", "can",
    "could", "did", "do", "does", "doing", "down", "during", "each", "few", "for", "from",
    "further", "had", "has", "have", "having", "he", "her", "here", "hers", "him", "his", "how",
    "i", "if", "in", "into", "is", "it", "its", "itself", "just", "me", "more", "most", "my",
    "no", "nor", "not", "now", "of", "off", "on", "once", "only", "or", "other", "our", "ours",
    "out", "over", "own", "please", "same", "she", "should", "so", "some", "such", "tell",
    "than", "that", "the", "their", "them", "then", "there", "these", "they", "this", "those",
    "through", "to", "too", "under", "until", "up", "use", "very", "was", "we", "were", "what",
    "when", "where", "which", "while", "who", "whom", "why", "will", "with", "would", "you",
    "your", "yours", "explain", "show", "give", "know", "need", "want", "get",
];

const CODE_WORDS: &[&str] = &[
    "code", "snippet", "function", "command", "commands", "script", "syntax", "api", "cli",
    "config", "compile", "build", "import", "class", "method", "example", "dtsi", "yaml", "json",
    "bash", "shell", "python", "cpp", "makefile", "cmake",
];

static STOPWORD_SET: Lazy<HashSet<&'static str>> = Lazy::new(|| STOPWORDS.iter().copied().collect());

static TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\p{L}\p{N}_]+(?:[.\-][\p{L}\p{N}_]+)*").expect("valid regex"));

static CODE_SHAPE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)
        ::                                   # path separator
        | \w\(\)?                            # call
        | ->                                 # arrow
        | (?:^|\s)--?[a-zA-Z][\w-]*          # cli flag
        | \b[a-z0-9]+_[a-z0-9_]+\b           # snake_case
        | \b[a-z]+[A-Z][a-zA-Z0-9]*\b        # camelCase
        | \b[\w-]+\.(?:py|sh|rs|c|cc|cpp|h|hpp|js|ts|java|go|json|ya?ml|toml|xml|dtsi?|cfg|conf|ini|mk)\b
        ",
    )
    .expect("valid regex")
});

/// Route a chat query.
pub fn route(query: &str) -> Route {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Route::Direct {
            reason: DirectReason::Empty,
        };
    }

    let normalized = normalize(trimmed);
    if SMALL_TALK.contains(&normalized.as_str()) || normalized.starts_with("thank") {
        return Route::Direct {
            reason: DirectReason::SmallTalk,
        };
    }
    if ABOUT_ASSISTANT.contains(&normalized.as_str()) {
        return Route::Direct {
            reason: DirectReason::AboutAssistant,
        };
    }

    let keywords = keywords(trimmed);
    if keywords.is_empty() {
        return Route::Direct {
            reason: DirectReason::NoKeywords,
        };
    }

    Route::Retrieve {
        code: is_code_query(trimmed),
        keywords,
    }
}

/// Lowercased search terms with stopwords removed, deduplicated in order.
pub fn keywords(query: &str) -> Vec<String> {
    let lower = query.to_lowercase();
    let mut seen = HashSet::new();
    TOKEN_RE
        .find_iter(&lower)
        .map(|m| m.as_str())
        .filter(|t| t.chars().count() >= 2 && !STOPWORD_SET.contains(t))
        .filter(|t| seen.insert(t.to_string()))
        .map(str::to_string)
        .collect()
}

/// Whether the query asks about code: code vocabulary, backticks, or code-shaped tokens.
pub fn is_code_query(query: &str) -> bool {
    if query.contains('`') {
        return true;
    }
    let lower = query.to_lowercase();
    if TOKEN_RE
        .find_iter(&lower)
        .any(|m| CODE_WORDS.contains(&m.as_str()))
    {
        return true;
    }
    CODE_SHAPE_RE.is_match(query)
}

fn normalize(query: &str) -> String {
    query
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
