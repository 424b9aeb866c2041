//! HTTP JSON API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/api/chat` | Answer a chat query from the stored documentation |
//! | `POST` | `/api/search` | Run the retrieval cascade and return hits |
//! | `POST` | `/api/import` | Import a Confluence page tree |
//! | `GET`  | `/api/pages` | List stored pages |
//! | `GET`  | `/api/pages/{id}` | One stored page with its elements |
//! | `DELETE` | `/api/pages/{id}` | Remove a stored page |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "invalid query: must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `upstream` (502,
//! Confluence failures), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser chat UI on
//! another origin can call the API.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::chat::{self, ChatAnswer};
use crate::config::Config;
use crate::confluence::{parse_page_ref, ConfluenceClient, ConfluenceError};
use crate::db;
use crate::import::{self, ImportOptions, ImportReport};
use crate::llm;
use crate::models::{ChatTurn, Page};
use crate::pages::{self, PageSummary};
use crate::retrieve::{self, Stage};
use crate::traits::{Completer, PageSource};

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    pool: SqlitePool,
    completer: Arc<dyn Completer>,
    /// `None` when Confluence is not configured; `/api/import` then fails.
    source: Option<Arc<dyn PageSource>>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        pool: SqlitePool,
        completer: Arc<dyn Completer>,
        source: Option<Arc<dyn PageSource>>,
    ) -> Self {
        Self {
            config,
            pool,
            completer,
            source,
        }
    }
}

/// Starts the HTTP server on `[server].bind` and runs until the process exits.
///
/// The completion backend falls back to the simulated one if the configured
/// backend cannot be created (e.g. a missing API key), and import is disabled
/// when `[confluence].base_url` is unset.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let pool = db::connect(config).await?;

    let completer = llm::completer_or_simulated(&config.llm);

    let source: Option<Arc<dyn PageSource>> =
        match ConfluenceClient::from_config(&config.confluence) {
            Ok(client) => Some(Arc::new(client) as Arc<dyn PageSource>),
            Err(e) => {
                tracing::warn!(error = %e, "page import disabled");
                None
            }
        };

    let state = AppState::new(Arc::new(config.clone()), pool, completer, source);
    let app = build_router(state);

    tracing::info!(bind = %bind_addr, "docchat server listening");
    println!("docchat server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// All routes with CORS applied.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/chat", post(handle_chat))
        .route("/api/search", post(handle_search))
        .route("/api/import", post(handle_import))
        .route("/api/pages", get(handle_list_pages))
        .route(
            "/api/pages/{id}",
            get(handle_get_page).delete(handle_delete_page),
        )
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Converts into the JSON error response.
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn upstream(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_GATEWAY,
        code: "upstream",
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

/// Map an application error to a response.
///
/// Typed Confluence errors are matched first (they may be wrapped in
/// context); anything else is classified by its message.
fn classify_error(err: anyhow::Error) -> AppError {
    let msg = format!("{:#}", err);

    if let Some(ce) = err.downcast_ref::<ConfluenceError>() {
        return match ce {
            ConfluenceError::NotFound(_) => not_found(msg),
            ConfluenceError::Config(_) => internal(msg),
            ConfluenceError::Http { .. }
            | ConfluenceError::Network(_)
            | ConfluenceError::Parse(_) => upstream(msg),
        };
    }

    if msg.contains("not found") {
        not_found(msg)
    } else if msg.contains("must not be empty") || msg.contains("invalid") {
        bad_request(msg)
    } else {
        tracing::error!(error = %msg, "request failed");
        internal(msg)
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /api/chat ============

#[derive(Deserialize)]
struct ChatRequest {
    query: String,
    #[serde(default)]
    history: Vec<ChatTurn>,
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatAnswer>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }

    let answer = chat::answer(
        &state.pool,
        &state.config,
        state.completer.as_ref(),
        &req.query,
        &req.history,
    )
    .await
    .map_err(classify_error)?;

    Ok(Json(answer))
}

// ============ POST /api/search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    limit: Option<i64>,
    code: Option<bool>,
}

#[derive(Serialize)]
struct SearchResult {
    page_id: String,
    title: String,
    url: String,
    snippet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    score: Option<f64>,
}

#[derive(Serialize)]
struct SearchResponse {
    stage: Stage,
    results: Vec<SearchResult>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    if matches!(req.limit, Some(l) if l < 1) {
        return Err(bad_request("limit must be at least 1"));
    }

    let retrieval = retrieve::retrieve_query(
        &state.pool,
        &state.config.retrieval,
        &req.query,
        req.code,
        req.limit,
    )
    .await
    .map_err(classify_error)?;

    let results = retrieval
        .hits
        .into_iter()
        .map(|hit| SearchResult {
            page_id: hit.page.page_id,
            title: hit.page.title,
            url: hit.page.url,
            snippet: hit.snippet,
            score: hit.score,
        })
        .collect();

    Ok(Json(SearchResponse {
        stage: retrieval.stage,
        results,
    }))
}

// ============ POST /api/import ============

#[derive(Deserialize)]
struct ImportRequest {
    page: String,
    max_depth: Option<usize>,
    max_pages: Option<usize>,
    include_children: Option<bool>,
}

async fn handle_import(
    State(state): State<AppState>,
    Json(req): Json<ImportRequest>,
) -> Result<Json<ImportReport>, AppError> {
    let root_id = parse_page_ref(&req.page)
        .ok_or_else(|| bad_request(format!("invalid page reference: '{}'", req.page)))?;
    if req.max_pages == Some(0) {
        return Err(bad_request("max_pages must be at least 1"));
    }

    let source = state
        .source
        .clone()
        .ok_or_else(|| internal("page import is disabled: confluence.base_url is not set"))?;

    let mut opts = ImportOptions::from_config(&state.config);
    if let Some(d) = req.max_depth {
        opts.max_depth = d;
    }
    if let Some(p) = req.max_pages {
        opts.max_pages = p;
    }
    if let Some(c) = req.include_children {
        opts.include_children = c;
    }

    let report = import::import_tree(source.as_ref(), &state.pool, &root_id, opts)
        .await
        .map_err(classify_error)?;

    Ok(Json(report))
}

// ============ /api/pages ============

#[derive(Serialize)]
struct PageListResponse {
    pages: Vec<PageSummary>,
}

async fn handle_list_pages(
    State(state): State<AppState>,
) -> Result<Json<PageListResponse>, AppError> {
    let pages = pages::list_pages(&state.pool)
        .await
        .map_err(classify_error)?;
    Ok(Json(PageListResponse { pages }))
}

async fn handle_get_page(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Page>, AppError> {
    pages::get_page(&state.pool, &id)
        .await
        .map_err(classify_error)?
        .map(Json)
        .ok_or_else(|| not_found(format!("page not found: {}", id)))
}

async fn handle_delete_page(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let deleted = pages::delete_page(&state.pool, &id)
        .await
        .map_err(classify_error)?;
    if !deleted {
        return Err(not_found(format!("page not found: {}", id)));
    }
    tracing::info!(page_id = %id, "deleted page");
    Ok(Json(serde_json::json!({ "deleted": true })))
}
