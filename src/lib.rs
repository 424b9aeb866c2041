//! # docchat
//!
//! Chat over a local copy of Confluence documentation.
//!
//! Pages are imported from Confluence into SQLite (plain text, code blocks,
//! headings, and an FTS5 index). A chat query is routed either straight to
//! the completion backend or through a retrieval cascade whose hits become
//! the model's context.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────┐   ┌──────────────┐
//! │ Confluence │──▶│  import  │──▶│    SQLite    │
//! │  REST API  │   │ (crawl)  │   │ pages + FTS5 │
//! └────────────┘   └──────────┘   └──────┬───────┘
//!                                        │
//!          ┌──────────┐   ┌──────────┐   │
//! query ──▶│  router  │──▶│ retrieve │◀──┘
//!          └────┬─────┘   └────┬─────┘
//!               ▼              ▼
//!          ┌─────────────────────────┐
//!          │ chat ──▶ llm completer  │──▶ answer + sources
//!          └─────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docchat init
//! docchat import 123456
//! docchat ask "how do I flash the board?"
//! docchat serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment overrides |
//! | [`models`] | Core data types |
//! | [`router`] | Direct-answer vs retrieval decision, keyword extraction |
//! | [`retrieve`] | Staged retrieval cascade |
//! | [`import`] | Bounded page tree import |
//! | [`confluence`] | Confluence REST client |
//! | [`storage`] | Storage-format to text conversion |
//! | [`pages`] | Page store |
//! | [`llm`] | Completion backends and response shaping |
//! | [`chat`] | One chat turn end to end |
//! | [`server`] | HTTP JSON API |
//! | [`traits`] | `PageSource` and `Completer` seams |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chat;
pub mod config;
pub mod confluence;
pub mod db;
pub mod import;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod pages;
pub mod retrieve;
pub mod router;
pub mod server;
pub mod storage;
pub mod traits;
