//! One chat turn: route the query, retrieve if needed, ask the completer.
//!
//! An LLM backend failure never fails the turn; the simulated backend
//! answers instead. A retrieval failure produces an apology with
//! `is_error` set, so the caller can still render something.

use anyhow::{bail, Result};
use serde::Serialize;
use serde_json::{json, Value};
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::llm::{self, SimulatedCompleter};
use crate::models::{ChatTurn, Page, SourceRef};
use crate::retrieve::{self, Stage};
use crate::router::{self, Route};
use crate::traits::{Completer, CompletionRequest};

const RETRIEVAL_FAILED: &str =
    "Sorry, I couldn't search the documentation just now. Please try again in a moment.";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatAnswer {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub is_error: bool,
    pub route: String,
    pub stage: Stage,
}

pub async fn answer(
    pool: &SqlitePool,
    config: &Config,
    completer: &dyn Completer,
    query: &str,
    history: &[ChatTurn],
) -> Result<ChatAnswer> {
    let query = query.trim();
    if query.is_empty() {
        bail!("invalid query: must not be empty");
    }

    let route = router::route(query);
    let mut request = CompletionRequest {
        prompt: query.to_string(),
        system_prompt: config.llm.system_prompt().to_string(),
        history: recent_history(history, config.llm.max_history),
        ..Default::default()
    };

    let (stage, sources) = match &route {
        Route::Direct { reason } => {
            tracing::debug!(?reason, "answering without retrieval");
            (Stage::None, Vec::new())
        }
        Route::Retrieve { code, keywords } => {
            let retrieval = match retrieve::retrieve(
                pool,
                &config.retrieval,
                keywords,
                *code,
                config.retrieval.limit,
            )
            .await
            {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!(error = %format!("{:#}", e), "retrieval failed");
                    return Ok(ChatAnswer {
                        answer: RETRIEVAL_FAILED.to_string(),
                        sources: Vec::new(),
                        is_error: true,
                        route: route.label().to_string(),
                        stage: Stage::None,
                    });
                }
            };

            let records: Vec<Value> = retrieval
                .hits
                .iter()
                .map(|hit| page_record(&hit.page, config.llm.max_context_chars))
                .collect();
            if !records.is_empty() {
                request.context = llm::format_context(&records);
                request.db_data = Some(Value::Array(records));
            }

            let sources = retrieval
                .hits
                .iter()
                .map(|hit| SourceRef::from(&hit.page))
                .collect();
            (retrieval.stage, sources)
        }
    };

    let raw = complete_with_fallback(completer, &request).await;

    Ok(ChatAnswer {
        answer: llm::enhance_response(&raw),
        sources,
        is_error: false,
        route: route.label().to_string(),
        stage,
    })
}

async fn complete_with_fallback(completer: &dyn Completer, request: &CompletionRequest) -> String {
    match completer.complete(request).await {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(
                backend = completer.name(),
                error = %format!("{:#}", e),
                "completion failed, using simulated backend"
            );
            simulated(request).await
        }
    }
}

async fn simulated(request: &CompletionRequest) -> String {
    // The simulated backend is infallible.
    SimulatedCompleter
        .complete(request)
        .await
        .unwrap_or_default()
}

/// The `max` most recent turns.
fn recent_history(history: &[ChatTurn], max: usize) -> Vec<ChatTurn> {
    let start = history.len().saturating_sub(max);
    history[start..].to_vec()
}

fn page_record(page: &Page, max_chars: usize) -> Value {
    json!({
        "pageTitle": page.title,
        "content": llm::clip_content(&page.content, max_chars),
        "url": page.url,
        "pageId": page.page_id,
    })
}

/// CLI entry point: answer one query with no history and print it.
pub async fn run_ask(config: &Config, query: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let completer = llm::completer_or_simulated(&config.llm);

    let reply = answer(&pool, config, completer.as_ref(), query, &[]).await?;
    pool.close().await;

    println!("{}", reply.answer);
    if !reply.sources.is_empty() {
        println!();
        println!("Sources ({}):", reply.stage.as_str());
        for source in &reply.sources {
            println!("  - {} <{}>", source.title, source.url);
        }
    }
    Ok(())
}
