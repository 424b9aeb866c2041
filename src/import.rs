//! Page tree import.
//!
//! Crawls a page and its descendants from a [`PageSource`], converts each
//! storage body, and upserts the result into the page store.
//!
//! The crawl is depth-first with an explicit stack and is bounded three ways:
//! - a visited set, so each page id is fetched at most once (cycles and
//!   pages listed under several parents are skipped);
//! - `max_depth`, counted from the root at depth 0;
//! - `max_pages`, the total number of pages fetched.
//!
//! Failures below the root are recorded in the report and the crawl moves
//! on; failing to fetch the root itself is an error.

use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashSet;

use crate::config::Config;
use crate::confluence::{parse_page_ref, ConfluenceClient};
use crate::db;
use crate::pages::{self, UpsertOutcome};
use crate::storage;
use crate::traits::PageSource;

#[derive(Debug, Clone, Copy)]
pub struct ImportOptions {
    pub max_depth: usize,
    pub max_pages: usize,
    pub include_children: bool,
}

impl ImportOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_depth: config.import.max_depth,
            max_pages: config.import.max_pages,
            include_children: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportFailure {
    pub page_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub root_id: String,
    pub imported: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed: Vec<ImportFailure>,
    /// Children that exist below `max_depth` and were not followed.
    pub skipped_depth: usize,
    /// Set when `max_pages` stopped the crawl before it was exhausted.
    pub truncated: bool,
    /// Page ids fetched, in crawl order.
    pub visited: Vec<String>,
}

impl ImportReport {
    pub fn stored(&self) -> usize {
        self.imported + self.updated + self.unchanged
    }
}

/// Import `root_id` and (optionally) its descendants.
pub async fn import_tree(
    source: &dyn PageSource,
    pool: &SqlitePool,
    root_id: &str,
    opts: ImportOptions,
) -> Result<ImportReport> {
    let mut report = ImportReport {
        root_id: root_id.to_string(),
        ..Default::default()
    };
    let mut visited: HashSet<String> = HashSet::new();
    let mut stack: Vec<(String, usize)> = vec![(root_id.to_string(), 0)];

    while let Some((page_id, depth)) = stack.pop() {
        if visited.contains(&page_id) {
            continue;
        }
        if report.visited.len() >= opts.max_pages {
            report.truncated = true;
            break;
        }
        visited.insert(page_id.clone());
        report.visited.push(page_id.clone());

        match import_one(source, pool, &page_id).await {
            Ok(outcome) => {
                match outcome {
                    UpsertOutcome::Inserted => report.imported += 1,
                    UpsertOutcome::Updated => report.updated += 1,
                    UpsertOutcome::Unchanged => report.unchanged += 1,
                }
                tracing::info!(page_id = %page_id, depth, outcome = ?outcome, "imported page");
            }
            Err(e) if depth == 0 => {
                return Err(e).with_context(|| format!("failed to import root page {}", page_id));
            }
            Err(e) => {
                tracing::warn!(page_id = %page_id, depth, error = %e, "page import failed");
                report.failed.push(ImportFailure {
                    page_id: page_id.clone(),
                    error: format!("{:#}", e),
                });
                continue;
            }
        }

        if !opts.include_children {
            continue;
        }

        let at_limit = depth >= opts.max_depth;
        let children = match source.child_ids(&page_id).await {
            Ok(ids) => ids,
            // Nothing below the depth limit would be followed anyway.
            Err(e) if at_limit => {
                tracing::warn!(page_id = %page_id, error = %e, "listing child pages failed at depth limit");
                continue;
            }
            Err(e) => {
                tracing::warn!(page_id = %page_id, error = %e, "listing child pages failed");
                report.failed.push(ImportFailure {
                    page_id: page_id.clone(),
                    error: format!("listing children: {:#}", e),
                });
                continue;
            }
        };

        let mut listed = HashSet::new();
        let fresh: Vec<String> = children
            .into_iter()
            .filter(|id| !visited.contains(id) && listed.insert(id.clone()))
            .collect();

        if at_limit {
            report.skipped_depth += fresh.len();
            continue;
        }

        // Reverse so children are visited in source order.
        for child in fresh.into_iter().rev() {
            stack.push((child, depth + 1));
        }
    }

    Ok(report)
}

async fn import_one(
    source: &dyn PageSource,
    pool: &SqlitePool,
    page_id: &str,
) -> Result<UpsertOutcome> {
    let remote = source.fetch_page(page_id).await?;
    let converted = storage::convert(&remote.storage);
    pages::upsert_page(pool, &remote, &converted).await
}

/// CLI entry point: resolve the page reference, crawl Confluence, print the report.
pub async fn run_import(
    config: &Config,
    page_ref: &str,
    max_depth: Option<usize>,
    max_pages: Option<usize>,
    include_children: bool,
) -> Result<()> {
    let root_id = parse_page_ref(page_ref)
        .ok_or_else(|| anyhow::anyhow!("invalid page reference: '{}'", page_ref))?;

    let client = ConfluenceClient::from_config(&config.confluence)?;
    let pool = db::connect(config).await?;

    let mut opts = ImportOptions::from_config(config);
    if let Some(d) = max_depth {
        opts.max_depth = d;
    }
    if let Some(p) = max_pages {
        opts.max_pages = p;
    }
    opts.include_children = include_children;

    let report = import_tree(&client, &pool, &root_id, opts).await?;

    println!("import {}", root_id);
    println!("  pages fetched: {}", report.visited.len());
    println!("  imported: {}", report.imported);
    println!("  updated: {}", report.updated);
    println!("  unchanged: {}", report.unchanged);
    println!("  failed: {}", report.failed.len());
    println!("  stored: {}", report.stored());
    for failure in &report.failed {
        println!("    {}: {}", failure.page_id, failure.error);
    }
    if report.skipped_depth > 0 {
        println!("  skipped (depth): {}", report.skipped_depth);
    }
    if report.truncated {
        println!("  truncated at {} pages", opts.max_pages);
    }
    println!("ok");

    pool.close().await;
    Ok(())
}
