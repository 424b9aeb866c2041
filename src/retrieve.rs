//! Retrieval cascade.
//!
//! Stages run in a fixed order and the first stage that yields anything wins:
//!
//! ```text
//! text index (FTS5, bm25 with per-field weights)
//!   └─ empty ─▶ code blocks (regex, only for code-related queries)
//!                 └─ empty ─▶ page content (regex)
//!                               └─ empty ─▶ page titles (regex)
//! ```
//!
//! The regex stages have no relevance score; hits come back most recently
//! updated first. Results from different stages are never merged.

use anyhow::Result;
use futures::TryStreamExt;
use regex::{Regex, RegexBuilder};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::collections::{HashMap, HashSet};

use crate::config::{Config, RetrievalConfig};
use crate::db;
use crate::models::Page;
use crate::pages;
use crate::router;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    TextIndex,
    CodeBlocks,
    Content,
    Title,
    None,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::TextIndex => "text_index",
            Stage::CodeBlocks => "code_blocks",
            Stage::Content => "content",
            Stage::Title => "title",
            Stage::None => "none",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Hit {
    pub page: Page,
    /// bm25-derived score (higher is better); only set by the text index stage.
    pub score: Option<f64>,
    pub snippet: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Retrieval {
    pub stage: Stage,
    pub hits: Vec<Hit>,
}

impl Retrieval {
    fn empty() -> Self {
        Self {
            stage: Stage::None,
            hits: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// A page id found by one stage, with the text its snippet comes from.
struct Candidate {
    page_id: String,
    score: Option<f64>,
    snippet: String,
}

/// Search with a free-text query, deriving keywords and code-ness from it
/// unless `code` is given explicitly.
pub async fn retrieve_query(
    pool: &SqlitePool,
    config: &RetrievalConfig,
    query: &str,
    code: Option<bool>,
    limit: Option<i64>,
) -> Result<Retrieval> {
    let keywords = router::keywords(query);
    let code = code.unwrap_or_else(|| router::is_code_query(query));
    retrieve(pool, config, &keywords, code, limit.unwrap_or(config.limit)).await
}

/// Run the cascade for already extracted keywords.
pub async fn retrieve(
    pool: &SqlitePool,
    config: &RetrievalConfig,
    keywords: &[String],
    code: bool,
    limit: i64,
) -> Result<Retrieval> {
    if keywords.is_empty() || limit < 1 {
        return Ok(Retrieval::empty());
    }
    let limit = limit as usize;

    let candidates = text_index_stage(pool, config, keywords, limit).await?;
    if !candidates.is_empty() {
        return finish(pool, Stage::TextIndex, candidates).await;
    }

    let pattern = keyword_regex(keywords)?;

    if code {
        let candidates = code_stage(pool, &pattern, limit, config.snippet_chars).await?;
        if !candidates.is_empty() {
            return finish(pool, Stage::CodeBlocks, candidates).await;
        }
    }

    let candidates = column_stage(pool, "content", &pattern, limit, config.snippet_chars).await?;
    if !candidates.is_empty() {
        return finish(pool, Stage::Content, candidates).await;
    }

    let candidates = column_stage(pool, "title", &pattern, limit, config.snippet_chars).await?;
    if !candidates.is_empty() {
        return finish(pool, Stage::Title, candidates).await;
    }

    tracing::debug!(?keywords, "retrieval cascade found nothing");
    Ok(Retrieval::empty())
}

async fn finish(pool: &SqlitePool, stage: Stage, candidates: Vec<Candidate>) -> Result<Retrieval> {
    let ids: Vec<String> = candidates.iter().map(|c| c.page_id.clone()).collect();
    let mut loaded: HashMap<String, Page> = pages::load_pages(pool, &ids)
        .await?
        .into_iter()
        .map(|p| (p.page_id.clone(), p))
        .collect();

    // A page deleted between the stage query and the load is dropped.
    let hits = candidates
        .into_iter()
        .filter_map(|cand| {
            loaded.remove(&cand.page_id).map(|page| Hit {
                page,
                score: cand.score,
                snippet: cand.snippet,
            })
        })
        .collect::<Vec<_>>();

    tracing::debug!(stage = stage.as_str(), hits = hits.len(), "retrieval cascade hit");
    Ok(Retrieval { stage, hits })
}

// ============ Text index ============

/// FTS5 query matching any of the keywords (each as a quoted phrase).
pub fn fts_query(keywords: &[String]) -> String {
    keywords
        .iter()
        .map(|k| format!("\"{}\"", k.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" OR ")
}

async fn text_index_stage(
    pool: &SqlitePool,
    config: &RetrievalConfig,
    keywords: &[String],
    limit: usize,
) -> Result<Vec<Candidate>> {
    // bm25 takes one weight per column, including the unindexed page_id.
    let sql = format!(
        r#"
        SELECT page_id,
               bm25(pages_fts, 0.0, {title}, {content}, {code}) AS rank,
               snippet(pages_fts, 2, '', '', '...', 32) AS snippet
        FROM pages_fts
        WHERE pages_fts MATCH ?
        ORDER BY rank
        LIMIT ?
        "#,
        title = config.title_weight,
        content = config.content_weight,
        code = config.code_weight,
    );

    let rows = sqlx::query(&sql)
        .bind(fts_query(keywords))
        .bind(limit as i64)
        .fetch_all(pool)
        .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let rank: f64 = row.get("rank");
            Candidate {
                page_id: row.get("page_id"),
                score: Some(-rank), // negate so higher = better
                snippet: row.get("snippet"),
            }
        })
        .collect())
}

// ============ Regex fallbacks ============

/// Case-insensitive alternation of the escaped keywords.
pub fn keyword_regex(keywords: &[String]) -> Result<Regex> {
    let alternation = keywords
        .iter()
        .map(|k| regex::escape(k))
        .collect::<Vec<_>>()
        .join("|");
    Ok(RegexBuilder::new(&alternation)
        .case_insensitive(true)
        .build()?)
}

async fn code_stage(
    pool: &SqlitePool,
    pattern: &Regex,
    limit: usize,
    snippet_chars: usize,
) -> Result<Vec<Candidate>> {
    // Streamed so the scan stops once `limit` pages matched.
    let mut rows = sqlx::query(
        r#"
        SELECT e.page_id AS page_id, e.content AS content
        FROM page_elements e
        JOIN pages p ON p.page_id = e.page_id
        WHERE e.kind = 'code'
        ORDER BY p.updated_at DESC, p.page_id ASC, e.position ASC
        "#,
    )
    .fetch(pool);

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    while let Some(row) = rows.try_next().await? {
        let page_id: String = row.get("page_id");
        if seen.contains(&page_id) {
            continue;
        }
        let content: String = row.get("content");
        if let Some(m) = pattern.find(&content) {
            seen.insert(page_id.clone());
            out.push(Candidate {
                page_id,
                score: None,
                snippet: snippet_around(&content, m.start(), snippet_chars),
            });
            if out.len() >= limit {
                break;
            }
        }
    }
    Ok(out)
}

async fn column_stage(
    pool: &SqlitePool,
    column: &'static str,
    pattern: &Regex,
    limit: usize,
    snippet_chars: usize,
) -> Result<Vec<Candidate>> {
    let sql = format!(
        "SELECT page_id, {} AS text, content FROM pages ORDER BY updated_at DESC, page_id ASC",
        column
    );
    let mut rows = sqlx::query(&sql).fetch(pool);

    let mut out = Vec::new();
    while let Some(row) = rows.try_next().await? {
        let text: String = row.get("text");
        if pattern.is_match(&text) {
            let content: String = row.get("content");
            let start = pattern.find(&content).map(|m| m.start()).unwrap_or(0);
            out.push(Candidate {
                page_id: row.get("page_id"),
                score: None,
                snippet: snippet_around(&content, start, snippet_chars),
            });
            if out.len() >= limit {
                break;
            }
        }
    }
    Ok(out)
}

/// Up to `max_chars` characters of `text` starting a little before `byte_start`.
pub fn snippet_around(text: &str, byte_start: usize, max_chars: usize) -> String {
    let byte_start = byte_start.min(text.len());
    let char_pos = text
        .char_indices()
        .take_while(|(i, _)| *i < byte_start)
        .count();
    let lead = max_chars / 4;
    let from = char_pos.saturating_sub(lead);

    let piece: String = text.chars().skip(from).take(max_chars).collect();
    let mut snippet = piece.split_whitespace().collect::<Vec<_>>().join(" ");
    if from > 0 {
        snippet.insert_str(0, "...");
    }
    if text.chars().count() > from + max_chars {
        snippet.push_str("...");
    }
    snippet
}

/// CLI entry point: run the cascade and print the hits.
pub async fn run_search(config: &Config, query: &str, limit: Option<i64>, code: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    let code = if code { Some(true) } else { None };
    let retrieval = retrieve_query(&pool, &config.retrieval, query, code, limit).await?;

    if retrieval.is_empty() {
        println!("No results.");
        pool.close().await;
        return Ok(());
    }

    println!("stage: {}", retrieval.stage.as_str());
    println!();
    for (i, hit) in retrieval.hits.iter().enumerate() {
        let date = chrono::DateTime::from_timestamp(hit.page.updated_at, 0)
            .map(|dt| dt.format("%Y-%m-%d").to_string())
            .unwrap_or_default();

        match hit.score {
            Some(score) => println!("{}. [{:.2}] {}", i + 1, score, hit.page.title),
            None => println!("{}. {}", i + 1, hit.page.title),
        }
        println!("    updated: {}", date);
        println!("    url: {}", hit.page.url);
        println!("    excerpt: \"{}\"", hit.snippet.replace('\n', " ").trim());
        println!("    id: {}", hit.page.page_id);
        println!();
    }

    pool.close().await;
    Ok(())
}
