//! Core data models.
//!
//! Pages arrive from Confluence as [`RemotePage`]s, are converted into
//! [`Page`]s with extracted [`PageElement`]s, and are returned to chat
//! clients as [`SourceRef`]s.

use serde::{Deserialize, Serialize};

/// Page as returned by a [`PageSource`](crate::traits::PageSource), before conversion.
#[derive(Debug, Clone)]
pub struct RemotePage {
    pub page_id: String,
    pub title: String,
    pub url: String,
    pub space_key: Option<String>,
    pub version: Option<i64>,
    pub parent_id: Option<String>,
    /// Confluence storage-format XHTML.
    pub storage: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Code,
    Heading,
}

impl ElementKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ElementKind::Code => "code",
            ElementKind::Heading => "heading",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "code" => Some(ElementKind::Code),
            "heading" => Some(ElementKind::Heading),
            _ => None,
        }
    }
}

/// A structural element lifted out of a page body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageElement {
    pub kind: ElementKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub content: String,
    pub position: i64,
}

/// Stored page.
#[derive(Debug, Clone, Serialize)]
pub struct Page {
    pub page_id: String,
    pub title: String,
    pub url: String,
    pub space_key: Option<String>,
    pub version: Option<i64>,
    pub parent_id: Option<String>,
    /// Plain text with code blocks kept as Markdown fences.
    pub content: String,
    pub content_hash: String,
    pub elements: Vec<PageElement>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Page reference attached to chat answers and search hits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub page_id: String,
    pub title: String,
    pub url: String,
}

impl From<&Page> for SourceRef {
    fn from(page: &Page) -> Self {
        Self {
            page_id: page.page_id.clone(),
            title: page.title.clone(),
            url: page.url.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One turn of client-supplied conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}
