//! Extension seams.
//!
//! ```text
//!   PageSource ──▶ import_tree() ──▶ pages store
//!   (Confluence,     bounded crawl
//!    in-memory)
//!
//!   Completer ──▶ chat::answer()
//!   (subprocess, openai, simulated)
//! ```
//!
//! Both traits are object safe so callers can hold `Arc<dyn ...>` and tests
//! can swap in in-memory implementations.

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{ChatTurn, RemotePage};

// ═══════════════════════════════════════════════════════════════════════
// PageSource
// ═══════════════════════════════════════════════════════════════════════

/// A tree of pages that the importer can crawl.
///
/// # Example
///
/// ```rust
/// use anyhow::{bail, Result};
/// use async_trait::async_trait;
/// use docchat::models::RemotePage;
/// use docchat::traits::PageSource;
///
/// struct SinglePage;
///
/// #[async_trait]
/// impl PageSource for SinglePage {
///     async fn fetch_page(&self, page_id: &str) -> Result<RemotePage> {
///         if page_id != "1" {
///             bail!("page not found: {}", page_id);
///         }
///         Ok(RemotePage {
///             page_id: "1".into(),
///             title: "Home".into(),
///             url: "https://wiki.example.com/pages/1".into(),
///             space_key: None,
///             version: Some(1),
///             parent_id: None,
///             storage: "<p>Welcome</p>".into(),
///         })
///     }
///
///     async fn child_ids(&self, _page_id: &str) -> Result<Vec<String>> {
///         Ok(vec![])
///     }
/// }
/// ```
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetch one page with its storage-format body.
    async fn fetch_page(&self, page_id: &str) -> Result<RemotePage>;

    /// Ids of the direct children of `page_id`, in source order.
    async fn child_ids(&self, page_id: &str) -> Result<Vec<String>>;
}

// ═══════════════════════════════════════════════════════════════════════
// Completer
// ═══════════════════════════════════════════════════════════════════════

/// Everything a completion backend gets for one chat turn.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub prompt: String,
    /// Pre-formatted documentation context (may be empty).
    pub context: String,
    pub system_prompt: String,
    pub history: Vec<ChatTurn>,
    /// Retrieved pages as JSON records (`pageTitle`, `content`, `url`, ...).
    pub db_data: Option<serde_json::Value>,
}

/// An LLM backend.
#[async_trait]
pub trait Completer: Send + Sync {
    /// Short identifier used in logs (`"openai"`, `"subprocess"`, ...).
    fn name(&self) -> &str;

    /// Produce the raw answer text.
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}
