//! Page store.
//!
//! Pages, their extracted elements, and the `pages_fts` text index are kept
//! in step: every write replaces all three inside one transaction.

use anyhow::{bail, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use std::collections::HashMap;

use crate::config::Config;
use crate::db;
use crate::models::{ElementKind, Page, PageElement, RemotePage};
use crate::storage::Converted;

/// What an upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, Serialize)]
pub struct PageSummary {
    pub page_id: String,
    pub title: String,
    pub url: String,
    pub space_key: Option<String>,
    pub updated_at: i64,
}

pub fn content_hash(title: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update([0u8]);
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Store a converted page, replacing any previous copy.
pub async fn upsert_page(
    pool: &SqlitePool,
    remote: &RemotePage,
    converted: &Converted,
) -> Result<UpsertOutcome> {
    if remote.page_id.trim().is_empty() {
        bail!("invalid page: empty page id");
    }

    let hash = content_hash(&remote.title, &converted.text);

    let existing: Option<String> =
        sqlx::query_scalar("SELECT content_hash FROM pages WHERE page_id = ?")
            .bind(&remote.page_id)
            .fetch_optional(pool)
            .await?;

    let outcome = match existing.as_deref() {
        None => UpsertOutcome::Inserted,
        Some(h) if h == hash => return Ok(UpsertOutcome::Unchanged),
        Some(_) => UpsertOutcome::Updated,
    };

    let now = chrono::Utc::now().timestamp();
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO pages (page_id, title, url, space_key, version, parent_id, content, content_hash, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(page_id) DO UPDATE SET
            title = excluded.title,
            url = excluded.url,
            space_key = excluded.space_key,
            version = excluded.version,
            parent_id = excluded.parent_id,
            content = excluded.content,
            content_hash = excluded.content_hash,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&remote.page_id)
    .bind(&remote.title)
    .bind(&remote.url)
    .bind(&remote.space_key)
    .bind(remote.version)
    .bind(&remote.parent_id)
    .bind(&converted.text)
    .bind(&hash)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM page_elements WHERE page_id = ?")
        .bind(&remote.page_id)
        .execute(&mut *tx)
        .await?;

    for el in &converted.elements {
        sqlx::query(
            "INSERT INTO page_elements (page_id, position, kind, language, content) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&remote.page_id)
        .bind(el.position)
        .bind(el.kind.as_str())
        .bind(&el.language)
        .bind(&el.content)
        .execute(&mut *tx)
        .await?;
    }

    let code: Vec<&str> = converted
        .elements
        .iter()
        .filter(|e| e.kind == ElementKind::Code)
        .map(|e| e.content.as_str())
        .collect();

    sqlx::query("DELETE FROM pages_fts WHERE page_id = ?")
        .bind(&remote.page_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("INSERT INTO pages_fts (page_id, title, content, code) VALUES (?, ?, ?, ?)")
        .bind(&remote.page_id)
        .bind(&remote.title)
        .bind(&converted.text)
        .bind(code.join("\n\n"))
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(outcome)
}

pub async fn get_page(pool: &SqlitePool, page_id: &str) -> Result<Option<Page>> {
    let mut pages = load_pages(pool, &[page_id.to_string()]).await?;
    Ok(pages.pop())
}

/// Load full pages for `page_ids`, preserving the given order. Missing ids are skipped.
///
/// One query for the pages and one for all of their elements.
pub async fn load_pages(pool: &SqlitePool, page_ids: &[String]) -> Result<Vec<Page>> {
    if page_ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = vec!["?"; page_ids.len()].join(", ");

    let sql = format!(
        "SELECT page_id, title, url, space_key, version, parent_id, content, content_hash, created_at, updated_at FROM pages WHERE page_id IN ({})",
        placeholders
    );
    let mut query = sqlx::query(&sql);
    for id in page_ids {
        query = query.bind(id);
    }
    let page_rows = query.fetch_all(pool).await?;

    let sql = format!(
        "SELECT page_id, position, kind, language, content FROM page_elements WHERE page_id IN ({}) ORDER BY page_id, position ASC",
        placeholders
    );
    let mut query = sqlx::query(&sql);
    for id in page_ids {
        query = query.bind(id);
    }
    let mut elements: HashMap<String, Vec<PageElement>> = HashMap::new();
    for row in query.fetch_all(pool).await? {
        let kind: String = row.get("kind");
        let Some(kind) = ElementKind::parse(&kind) else {
            continue;
        };
        elements
            .entry(row.get("page_id"))
            .or_default()
            .push(PageElement {
                kind,
                language: row.get("language"),
                content: row.get("content"),
                position: row.get("position"),
            });
    }

    let mut by_id: HashMap<String, Page> = page_rows
        .iter()
        .map(|row| {
            let page_id: String = row.get("page_id");
            let els = elements.remove(&page_id).unwrap_or_default();
            (page_id, row_to_page(row, els))
        })
        .collect();

    Ok(page_ids.iter().filter_map(|id| by_id.remove(id)).collect())
}

fn row_to_page(row: &SqliteRow, elements: Vec<PageElement>) -> Page {
    Page {
        page_id: row.get("page_id"),
        title: row.get("title"),
        url: row.get("url"),
        space_key: row.get("space_key"),
        version: row.get("version"),
        parent_id: row.get("parent_id"),
        content: row.get("content"),
        content_hash: row.get("content_hash"),
        elements,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

pub async fn list_pages(pool: &SqlitePool) -> Result<Vec<PageSummary>> {
    let rows = sqlx::query(
        "SELECT page_id, title, url, space_key, updated_at FROM pages ORDER BY title ASC, page_id ASC",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| PageSummary {
            page_id: row.get("page_id"),
            title: row.get("title"),
            url: row.get("url"),
            space_key: row.get("space_key"),
            updated_at: row.get("updated_at"),
        })
        .collect())
}

/// Remove a page and everything derived from it. Returns whether it existed.
pub async fn delete_page(pool: &SqlitePool, page_id: &str) -> Result<bool> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM pages_fts WHERE page_id = ?")
        .bind(page_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM page_elements WHERE page_id = ?")
        .bind(page_id)
        .execute(&mut *tx)
        .await?;
    let result = sqlx::query("DELETE FROM pages WHERE page_id = ?")
        .bind(page_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(result.rows_affected() > 0)
}

/// Number of stored pages per space (pages without a space are under `""`).
pub async fn count_by_space(pool: &SqlitePool) -> Result<HashMap<String, i64>> {
    let rows = sqlx::query(
        "SELECT COALESCE(space_key, '') AS space, COUNT(*) AS n FROM pages GROUP BY space",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows
        .iter()
        .map(|row| (row.get("space"), row.get("n")))
        .collect())
}

// ============ CLI entry points ============

fn format_ts(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

pub async fn run_get(config: &Config, page_id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let page = get_page(&pool, page_id).await?;
    pool.close().await;

    let Some(page) = page else {
        bail!("page not found: {}", page_id);
    };

    println!("--- Page ---");
    println!("page_id:    {}", page.page_id);
    println!("title:      {}", page.title);
    println!("url:        {}", page.url);
    if let Some(ref space) = page.space_key {
        println!("space:      {}", space);
    }
    if let Some(version) = page.version {
        println!("version:    {}", version);
    }
    if let Some(ref parent) = page.parent_id {
        println!("parent_id:  {}", parent);
    }
    println!("created_at: {}", format_ts(page.created_at));
    println!("updated_at: {}", format_ts(page.updated_at));
    println!();

    println!("--- Content ---");
    println!("{}", page.content);
    println!();

    println!("--- Elements ({}) ---", page.elements.len());
    for el in &page.elements {
        match el.language {
            Some(ref lang) => println!("[{} {} {}]", el.position, el.kind.as_str(), lang),
            None => println!("[{} {}]", el.position, el.kind.as_str()),
        }
        println!("{}", el.content);
        println!();
    }

    Ok(())
}

pub async fn run_list(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let pages = list_pages(&pool).await?;
    let spaces = count_by_space(&pool).await?;
    pool.close().await;

    if pages.is_empty() {
        println!("No pages stored.");
        return Ok(());
    }

    for page in &pages {
        println!("{:<12} {}", page.page_id, page.title);
    }
    println!();

    let mut spaces: Vec<_> = spaces.into_iter().collect();
    spaces.sort();
    println!("{} pages", pages.len());
    for (space, n) in spaces {
        let label = if space.is_empty() { "(no space)" } else { space.as_str() };
        println!("  {}: {}", label, n);
    }
    Ok(())
}

pub async fn run_delete(config: &Config, page_id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let deleted = delete_page(&pool, page_id).await?;
    pool.close().await;

    if !deleted {
        bail!("page not found: {}", page_id);
    }
    println!("deleted {}", page_id);
    Ok(())
}
