//! Integration tests for the `PageSource` and `Completer` seams.
//!
//! An in-memory page tree stands in for Confluence and scripted completers
//! stand in for LLM backends, so the importer, the retrieval cascade, chat,
//! and the HTTP API run end to end against a real SQLite database.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use docchat::chat;
use docchat::config::Config;
use docchat::db;
use docchat::import::{import_tree, ImportOptions};
use docchat::migrate;
use docchat::models::RemotePage;
use docchat::pages;
use docchat::retrieve::{self, Stage};
use docchat::server::{build_router, AppState};
use docchat::storage;
use docchat::traits::{Completer, CompletionRequest, PageSource};

// ─── In-memory page tree ────────────────────────────────────────────

struct TreeSource {
    pages: Mutex<HashMap<String, (String, String)>>,
    children: HashMap<String, Vec<String>>,
    failing: HashSet<String>,
    listing_fails: bool,
    fetches: Mutex<Vec<String>>,
    listings: Mutex<Vec<String>>,
}

impl TreeSource {
    /// 1 ─┬─ 2 ── 4 ── (1, cycle)
    ///    └─ 3 ── (2, listed twice)
    fn new() -> Self {
        let pages = [
            ("1", "Platform Home", "<p>Landing page for the platform team.</p>"),
            ("2", "Secure Boot", "<p>Enable secure boot in the firmware menu.</p>"),
            ("3", "Flashing Guide", "<p>Write images with the flash tool.</p>"),
            ("4", "Recovery Mode", "<p>Hold the recovery button while powering on.</p>"),
        ]
        .into_iter()
        .map(|(id, title, body)| (id.to_string(), (title.to_string(), body.to_string())))
        .collect();

        let children = [
            ("1", vec!["2", "3"]),
            ("2", vec!["4"]),
            ("3", vec!["2"]),
            ("4", vec!["1"]),
        ]
        .into_iter()
        .map(|(id, kids)| (id.to_string(), kids.into_iter().map(String::from).collect()))
        .collect();

        Self {
            pages: Mutex::new(pages),
            children,
            failing: HashSet::new(),
            listing_fails: false,
            fetches: Mutex::new(Vec::new()),
            listings: Mutex::new(Vec::new()),
        }
    }

    fn listing_fails(mut self) -> Self {
        self.listing_fails = true;
        self
    }

    fn children_of(mut self, page_id: &str, kids: &[&str]) -> Self {
        self.children.insert(
            page_id.to_string(),
            kids.iter().map(|k| k.to_string()).collect(),
        );
        self
    }

    fn failing(mut self, page_id: &str) -> Self {
        self.failing.insert(page_id.to_string());
        self
    }

    fn set_body(&self, page_id: &str, body: &str) {
        let mut pages = self.pages.lock().unwrap();
        if let Some(entry) = pages.get_mut(page_id) {
            entry.1 = body.to_string();
        }
    }

    fn fetches(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }

    fn listings(&self) -> Vec<String> {
        self.listings.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageSource for TreeSource {
    async fn fetch_page(&self, page_id: &str) -> Result<RemotePage> {
        self.fetches.lock().unwrap().push(page_id.to_string());
        if self.failing.contains(page_id) {
            bail!("connection reset while fetching {}", page_id);
        }
        let pages = self.pages.lock().unwrap();
        let Some((title, body)) = pages.get(page_id) else {
            bail!("page not found: {}", page_id);
        };
        Ok(RemotePage {
            page_id: page_id.to_string(),
            title: title.clone(),
            url: format!("https://wiki.example.com/pages/{}", page_id),
            space_key: Some("PLAT".to_string()),
            version: Some(1),
            parent_id: None,
            storage: body.clone(),
        })
    }

    async fn child_ids(&self, page_id: &str) -> Result<Vec<String>> {
        self.listings.lock().unwrap().push(page_id.to_string());
        if self.listing_fails {
            bail!("listing endpoint returned HTTP 403");
        }
        Ok(self.children.get(page_id).cloned().unwrap_or_default())
    }
}

// ─── Scripted completers ────────────────────────────────────────────

/// Reports what it was given instead of answering.
struct EchoCompleter;

#[async_trait]
impl Completer for EchoCompleter {
    fn name(&self) -> &str {
        "echo"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let records = request
            .db_data
            .as_ref()
            .and_then(Value::as_array)
            .map(|a| a.len())
            .unwrap_or(0);
        Ok(format!(
            "records={} history={} context={}",
            records,
            request.history.len(),
            !request.context.is_empty()
        ))
    }
}

struct FailingCompleter;

#[async_trait]
impl Completer for FailingCompleter {
    fn name(&self) -> &str {
        "failing"
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
        bail!("backend exploded")
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

fn test_config(tmp: &TempDir) -> Config {
    let db_path = tmp.path().join("docchat.sqlite");
    let config_content = format!(
        r#"
[db]
path = "{}"

[retrieval]
limit = 5

[llm]
max_history = 2

[server]
bind = "127.0.0.1:0"
"#,
        db_path.display()
    );
    toml::from_str(&config_content).unwrap()
}

async fn test_pool(cfg: &Config) -> SqlitePool {
    let pool = db::connect(cfg).await.unwrap();
    migrate::migrate_pool(&pool).await.unwrap();
    pool
}

fn opts(max_depth: usize, max_pages: usize) -> ImportOptions {
    ImportOptions {
        max_depth,
        max_pages,
        include_children: true,
    }
}

async fn seed(pool: &SqlitePool, page_id: &str, title: &str, storage_xhtml: &str) {
    let remote = RemotePage {
        page_id: page_id.to_string(),
        title: title.to_string(),
        url: format!("https://wiki.example.com/pages/{}", page_id),
        space_key: None,
        version: Some(1),
        parent_id: None,
        storage: storage_xhtml.to_string(),
    };
    pages::upsert_page(pool, &remote, &storage::convert(&remote.storage))
        .await
        .unwrap();
}

const FLASH_STORAGE: &str = r#"<p>Write images with the tool.</p><ac:structured-macro ac:name="code"><ac:parameter ac:name="language">bash</ac:parameter><ac:plain-text-body><![CDATA[flashtool --target=orinx --image sysimg.bin]]></ac:plain-text-body></ac:structured-macro>"#;

async fn seed_docs(pool: &SqlitePool) {
    seed(
        pool,
        "10",
        "Secure Boot",
        "<p>Enable secure boot in the firmware settings.</p>",
    )
    .await;
    seed(pool, "11", "Flashing Guide", FLASH_STORAGE).await;
    seed(
        pool,
        "12",
        "Ethernet Setup",
        "<p>Configure the interface with netplan.</p>",
    )
    .await;
}

fn kw(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

// ─── Importer ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_import_visits_each_page_once_despite_cycles() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let pool = test_pool(&cfg).await;
    let source = TreeSource::new();

    let report = import_tree(&source, &pool, "1", opts(5, 100)).await.unwrap();

    assert_eq!(report.visited, vec!["1", "2", "4", "3"]);
    assert_eq!(source.fetches(), vec!["1", "2", "4", "3"]);
    assert_eq!(report.imported, 4);
    assert!(report.failed.is_empty());
    assert!(!report.truncated);
    assert_eq!(pages::list_pages(&pool).await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_import_respects_max_depth() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let pool = test_pool(&cfg).await;
    let source = TreeSource::new();

    let report = import_tree(&source, &pool, "1", opts(1, 100)).await.unwrap();

    assert_eq!(report.visited, vec!["1", "2", "3"]);
    // Page 4 sits at depth 2.
    assert_eq!(report.skipped_depth, 1);
    assert!(pages::get_page(&pool, "4").await.unwrap().is_none());
}

#[tokio::test]
async fn test_import_depth_zero_is_root_only() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let pool = test_pool(&cfg).await;
    let source = TreeSource::new();

    let report = import_tree(&source, &pool, "1", opts(0, 100)).await.unwrap();

    assert_eq!(report.visited, vec!["1"]);
    assert_eq!(report.skipped_depth, 2);
}

#[tokio::test]
async fn test_import_listing_failure_at_depth_limit_is_not_a_failure() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let pool = test_pool(&cfg).await;
    let source = TreeSource::new().listing_fails();

    let report = import_tree(&source, &pool, "1", opts(0, 100)).await.unwrap();

    assert_eq!(report.imported, 1);
    assert!(report.failed.is_empty(), "failed: {:?}", report.failed);
    assert_eq!(report.skipped_depth, 0);
    assert_eq!(source.listings(), vec!["1"]);
}

#[tokio::test]
async fn test_import_listing_failure_above_depth_limit_is_recorded() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let pool = test_pool(&cfg).await;
    let source = TreeSource::new().listing_fails();

    let report = import_tree(&source, &pool, "1", opts(2, 100)).await.unwrap();

    assert_eq!(report.imported, 1);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].page_id, "1");
    assert!(report.failed[0].error.contains("HTTP 403"));
}

#[tokio::test]
async fn test_import_duplicate_children_counted_once_at_depth_limit() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let pool = test_pool(&cfg).await;
    let source = TreeSource::new().children_of("1", &["2", "3", "2"]);

    let report = import_tree(&source, &pool, "1", opts(0, 100)).await.unwrap();
    assert_eq!(report.skipped_depth, 2);

    let report = import_tree(&source, &pool, "1", opts(1, 100)).await.unwrap();
    assert_eq!(report.visited, vec!["1", "2", "3"]);
}

#[tokio::test]
async fn test_import_respects_max_pages() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let pool = test_pool(&cfg).await;
    let source = TreeSource::new();

    let report = import_tree(&source, &pool, "1", opts(5, 2)).await.unwrap();

    assert_eq!(report.visited, vec!["1", "2"]);
    assert_eq!(source.fetches().len(), 2);
    assert!(report.truncated);
}

#[tokio::test]
async fn test_import_without_children() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let pool = test_pool(&cfg).await;
    let source = TreeSource::new();

    let mut options = opts(5, 100);
    options.include_children = false;
    let report = import_tree(&source, &pool, "1", options).await.unwrap();

    assert_eq!(report.visited, vec!["1"]);
    assert_eq!(report.skipped_depth, 0);
}

#[tokio::test]
async fn test_import_child_failure_is_recorded_and_crawl_continues() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let pool = test_pool(&cfg).await;
    let source = TreeSource::new().failing("2");

    let report = import_tree(&source, &pool, "1", opts(5, 100)).await.unwrap();

    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].page_id, "2");
    assert!(report.failed[0].error.contains("connection reset"));
    // 4 is only reachable through 2, so it is never seen; 3 still is.
    assert_eq!(report.visited, vec!["1", "2", "3"]);
    assert_eq!(report.imported, 2);
}

#[tokio::test]
async fn test_import_root_failure_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let pool = test_pool(&cfg).await;
    let source = TreeSource::new().failing("1");

    let err = import_tree(&source, &pool, "1", opts(5, 100))
        .await
        .unwrap_err();
    assert!(format!("{:#}", err).contains("failed to import root page 1"));
    assert!(pages::list_pages(&pool).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_reimport_reports_unchanged_then_updated() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let pool = test_pool(&cfg).await;
    let source = TreeSource::new();

    import_tree(&source, &pool, "1", opts(5, 100)).await.unwrap();
    let before = pages::get_page(&pool, "3").await.unwrap().unwrap();

    let again = import_tree(&source, &pool, "1", opts(5, 100)).await.unwrap();
    assert_eq!(again.imported, 0);
    assert_eq!(again.unchanged, 4);

    source.set_body("3", "<p>Write images with the new flash tool.</p>");
    let third = import_tree(&source, &pool, "1", opts(5, 100)).await.unwrap();
    assert_eq!(third.updated, 1);
    assert_eq!(third.unchanged, 3);

    let after = pages::get_page(&pool, "3").await.unwrap().unwrap();
    assert_ne!(before.content_hash, after.content_hash);
    assert!(after.content.contains("new flash tool"));
    assert_eq!(after.created_at, before.created_at);
}

// ─── Retrieval cascade ──────────────────────────────────────────────

#[tokio::test]
async fn test_cascade_text_index_first() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let pool = test_pool(&cfg).await;
    seed_docs(&pool).await;

    let r = retrieve::retrieve(&pool, &cfg.retrieval, &kw(&["secure", "boot"]), false, 5)
        .await
        .unwrap();
    assert_eq!(r.stage, Stage::TextIndex);
    assert_eq!(r.hits[0].page.page_id, "10");
    assert!(r.hits[0].score.is_some());
}

#[tokio::test]
async fn test_cascade_title_weight_ranks_title_matches_first() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let pool = test_pool(&cfg).await;
    seed(&pool, "20", "Release Notes", "<p>Minor fixes to the netplan templates.</p>").await;
    seed(&pool, "21", "Netplan", "<p>Templates for interfaces.</p>").await;

    let r = retrieve::retrieve(&pool, &cfg.retrieval, &kw(&["netplan"]), false, 5)
        .await
        .unwrap();
    assert_eq!(r.stage, Stage::TextIndex);
    let ids: Vec<&str> = r.hits.iter().map(|h| h.page.page_id.as_str()).collect();
    assert_eq!(ids, vec!["21", "20"]);
}

#[tokio::test]
async fn test_cascade_code_stage_only_for_code_queries() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let pool = test_pool(&cfg).await;
    seed_docs(&pool).await;

    // "orin" is not a whole token anywhere, so the text index misses it.
    let code = retrieve::retrieve(&pool, &cfg.retrieval, &kw(&["orin"]), true, 5)
        .await
        .unwrap();
    assert_eq!(code.stage, Stage::CodeBlocks);
    assert_eq!(code.hits.len(), 1);
    assert_eq!(code.hits[0].page.page_id, "11");
    assert!(code.hits[0].snippet.contains("orinx"));

    let prose = retrieve::retrieve(&pool, &cfg.retrieval, &kw(&["orin"]), false, 5)
        .await
        .unwrap();
    assert_eq!(prose.stage, Stage::Content);
    assert_eq!(prose.hits[0].page.page_id, "11");
}

#[tokio::test]
async fn test_cascade_falls_back_to_title() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let pool = test_pool(&cfg).await;
    seed_docs(&pool).await;

    let r = retrieve::retrieve(&pool, &cfg.retrieval, &kw(&["ethern"]), false, 5)
        .await
        .unwrap();
    assert_eq!(r.stage, Stage::Title);
    assert_eq!(r.hits.len(), 1);
    assert_eq!(r.hits[0].page.title, "Ethernet Setup");
    assert!(r.hits[0].score.is_none());
}

#[tokio::test]
async fn test_cascade_nothing_found() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let pool = test_pool(&cfg).await;
    seed_docs(&pool).await;

    let r = retrieve::retrieve(&pool, &cfg.retrieval, &kw(&["zzzq"]), true, 5)
        .await
        .unwrap();
    assert_eq!(r.stage, Stage::None);
    assert!(r.is_empty());

    let r = retrieve::retrieve(&pool, &cfg.retrieval, &[], true, 5)
        .await
        .unwrap();
    assert_eq!(r.stage, Stage::None);
}

#[tokio::test]
async fn test_cascade_empty_store() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let pool = test_pool(&cfg).await;

    let r = retrieve::retrieve_query(&pool, &cfg.retrieval, "secure boot", None, None)
        .await
        .unwrap();
    assert_eq!(r.stage, Stage::None);
}

#[tokio::test]
async fn test_cascade_limit_respected() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let pool = test_pool(&cfg).await;
    for i in 0..4 {
        seed(
            &pool,
            &format!("3{}", i),
            &format!("Firmware {}", i),
            "<p>Firmware update steps.</p>",
        )
        .await;
    }

    let fts = retrieve::retrieve(&pool, &cfg.retrieval, &kw(&["firmware"]), false, 2)
        .await
        .unwrap();
    assert_eq!(fts.hits.len(), 2);

    let regex = retrieve::retrieve(&pool, &cfg.retrieval, &kw(&["firmw"]), false, 3)
        .await
        .unwrap();
    assert_eq!(regex.stage, Stage::Content);
    assert_eq!(regex.hits.len(), 3);
}

#[tokio::test]
async fn test_code_stage_stops_at_limit_with_one_hit_per_page() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let pool = test_pool(&cfg).await;
    let block = |cmd: &str| {
        format!(
            r#"<ac:structured-macro ac:name="code"><ac:plain-text-body><![CDATA[{}]]></ac:plain-text-body></ac:structured-macro>"#,
            cmd
        )
    };
    for i in 0..12 {
        let body = format!(
            "<p>Board notes.</p>{}{}",
            block("flashtool --target=orinx"),
            block("reboot --board=orinx")
        );
        seed(&pool, &format!("5{:02}", i), &format!("Board {}", i), &body).await;
    }

    let r = retrieve::retrieve(&pool, &cfg.retrieval, &kw(&["orin"]), true, 3)
        .await
        .unwrap();
    assert_eq!(r.stage, Stage::CodeBlocks);
    assert_eq!(r.hits.len(), 3);
    let ids: HashSet<_> = r.hits.iter().map(|h| h.page.page_id.clone()).collect();
    assert_eq!(ids.len(), 3);
    assert!(r.hits.iter().all(|h| h.snippet.contains("flashtool")));
}

#[tokio::test]
async fn test_load_pages_keeps_requested_order_and_elements() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let pool = test_pool(&cfg).await;
    seed_docs(&pool).await;

    let ids = kw(&["12", "missing", "11", "10"]);
    let loaded = pages::load_pages(&pool, &ids).await.unwrap();

    let order: Vec<&str> = loaded.iter().map(|p| p.page_id.as_str()).collect();
    assert_eq!(order, vec!["12", "11", "10"]);
    assert_eq!(loaded[1].elements.len(), 1);
    assert!(loaded[1].elements[0].content.contains("orinx"));
    assert!(loaded[0].elements.is_empty());
    assert!(pages::load_pages(&pool, &[]).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_deleted_page_leaves_index() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let pool = test_pool(&cfg).await;
    seed_docs(&pool).await;

    assert!(pages::delete_page(&pool, "10").await.unwrap());
    assert!(!pages::delete_page(&pool, "10").await.unwrap());

    let r = retrieve::retrieve(&pool, &cfg.retrieval, &kw(&["secure"]), false, 5)
        .await
        .unwrap();
    assert!(r.hits.iter().all(|h| h.page.page_id != "10"));
}

// ─── Chat ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_chat_retrieves_and_passes_context() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let pool = test_pool(&cfg).await;
    seed_docs(&pool).await;

    let history: Vec<docchat::models::ChatTurn> = serde_json::from_value(json!([
        { "role": "user", "content": "one" },
        { "role": "assistant", "content": "two" },
        { "role": "user", "content": "three" }
    ]))
    .unwrap();

    let answer = chat::answer(
        &pool,
        &cfg,
        &EchoCompleter,
        "how do I enable secure boot?",
        &history,
    )
    .await
    .unwrap();

    assert_eq!(answer.route, "retrieve");
    assert_eq!(answer.stage, Stage::TextIndex);
    assert!(!answer.is_error);
    assert_eq!(answer.sources[0].page_id, "10");
    assert_eq!(answer.answer, "records=1 history=2 context=true");
}

#[tokio::test]
async fn test_chat_greeting_skips_retrieval() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let pool = test_pool(&cfg).await;
    seed_docs(&pool).await;

    let answer = chat::answer(&pool, &cfg, &EchoCompleter, "Hello!", &[])
        .await
        .unwrap();
    assert_eq!(answer.route, "direct");
    assert_eq!(answer.stage, Stage::None);
    assert!(answer.sources.is_empty());
    assert_eq!(answer.answer, "records=0 history=0 context=false");
}

#[tokio::test]
async fn test_chat_backend_failure_falls_back_to_simulated() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let pool = test_pool(&cfg).await;
    seed_docs(&pool).await;

    let answer = chat::answer(&pool, &cfg, &FailingCompleter, "secure boot", &[])
        .await
        .unwrap();
    assert!(!answer.is_error);
    assert!(answer.answer.starts_with("Based on the available documentation"));
    assert!(answer.answer.contains("**Secure Boot**"));
}

#[tokio::test]
async fn test_chat_empty_query_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let pool = test_pool(&cfg).await;

    let err = chat::answer(&pool, &cfg, &EchoCompleter, "   ", &[])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("must not be empty"));
}

#[tokio::test]
async fn test_chat_retrieval_failure_sets_is_error() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    // Connected but never migrated: the cascade's first query fails.
    let pool = db::connect(&cfg).await.unwrap();

    let answer = chat::answer(&pool, &cfg, &EchoCompleter, "secure boot", &[])
        .await
        .unwrap();
    assert!(answer.is_error);
    assert!(answer.sources.is_empty());
    assert!(answer.answer.starts_with("Sorry"));
}

// ─── HTTP API ───────────────────────────────────────────────────────

async fn spawn_app(cfg: Config, pool: SqlitePool, source: Arc<dyn PageSource>) -> String {
    let state = AppState::new(Arc::new(cfg), pool, Arc::new(EchoCompleter), Some(source));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, build_router(state)).await.ok();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_http_api_end_to_end() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let pool = test_pool(&cfg).await;
    let base = spawn_app(cfg, pool, Arc::new(TreeSource::new())).await;
    let client = reqwest::Client::new();

    let resp = client.get(format!("{}/health", base)).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");

    // Import the tree.
    let resp = client
        .post(format!("{}/api/import", base))
        .json(&json!({ "page": "https://wiki.example.com/pages/viewpage.action?pageId=1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let report: Value = resp.json().await.unwrap();
    assert_eq!(report["imported"], 4);
    assert_eq!(report["root_id"], "1");

    // Search.
    let resp = client
        .post(format!("{}/api/search", base))
        .json(&json!({ "query": "secure boot" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["stage"], "text_index");
    assert_eq!(body["results"][0]["page_id"], "2");
    assert_eq!(body["results"][0]["title"], "Secure Boot");

    // Chat.
    let resp = client
        .post(format!("{}/api/chat", base))
        .json(&json!({ "query": "how do I enter recovery mode?" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["route"], "retrieve");
    assert_eq!(body["isError"], false);
    assert_eq!(body["sources"][0]["page_id"], "4");

    // Pages.
    let body: Value = client
        .get(format!("{}/api/pages", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["pages"].as_array().unwrap().len(), 4);

    let resp = client
        .get(format!("{}/api/pages/3", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let page: Value = resp.json().await.unwrap();
    assert_eq!(page["title"], "Flashing Guide");

    let resp = client
        .delete(format!("{}/api/pages/3", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["deleted"], true);

    let resp = client
        .delete(format!("{}/api/pages/3", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_http_api_errors() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let pool = test_pool(&cfg).await;
    let base = spawn_app(cfg, pool, Arc::new(TreeSource::new())).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/search", base))
        .json(&json!({ "query": "  " }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    let resp = client
        .post(format!("{}/api/chat", base))
        .json(&json!({ "query": "" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .post(format!("{}/api/import", base))
        .json(&json!({ "page": "not a page" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .post(format!("{}/api/import", base))
        .json(&json!({ "page": "999" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");

    let resp = client
        .get(format!("{}/api/pages/404404", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}
