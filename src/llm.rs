//! LLM backends and the text shaping around them.
//!
//! - [`format_context`] renders retrieved pages into the context block sent
//!   to the model, fencing code blocks with explicit markers so the model
//!   reproduces them verbatim.
//! - [`enhance_response`] tidies model output: fences stray code, highlights
//!   `IMPORTANT:`-style lead-ins, separates lists from preceding paragraphs.
//! - [`create_completer`] picks a [`Completer`] from `[llm].provider`:
//!
//! | Provider | Backend |
//! |----------|---------|
//! | `simulated` | [`SimulatedCompleter`], offline answers built from the context |
//! | `subprocess` | [`SubprocessCompleter`], an external program per request |
//! | `openai` | [`OpenAiCompleter`], chat completions over HTTP |
//!
//! # Subprocess protocol
//!
//! The program is run as `command args... PROMPT CONTEXT SYSTEM_PROMPT
//! HISTORY_JSON DB_DATA_JSON` and its stdout is the answer. `CONTEXT` is the
//! output of [`format_context`]; `DB_DATA_JSON` carries the same pages as raw
//! records for programs that format context themselves.

use anyhow::{bail, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::LlmConfig;
use crate::models::ChatTurn;
use crate::router::{self, DirectReason, Route};
use crate::traits::{Completer, CompletionRequest};

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM subprocess failed: {0}")]
    Subprocess(String),
    #[error("LLM request timed out after {0}s")]
    Timeout(u64),
    #[error("LLM API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("invalid LLM response: {0}")]
    Parse(String),
}

const FORMATTING_GUIDANCE: &str = "
When responding, please format your answer appropriately:
- Use code blocks with proper language specification for any code (```python, ```bash, etc.)
- Highlight IMPORTANT information in bold and italic format (**_important_**)
- Use proper Markdown for lists, headings, and other formatting
- If you're explaining steps, use numbered lists
- Use bullet points for feature lists
";

const CONTEXT_HEADER: &str = "
IMPORTANT: The following information contains code blocks that must be preserved EXACTLY as shown,
with their original formatting, indentation, comments, and whitespace.
===== DATABASE INFORMATION START =====

";

const CONTEXT_FOOTER: &str = "
REMEMBER: When including code blocks in your response, reproduce them EXACTLY as shown above,
with the same formatting, indentation, comments, and whitespace. Do not modify any code.
";

// ============ Context formatting ============

/// Render page records (`pageTitle`, `content`, other fields) as model context.
pub fn format_context(records: &[Value]) -> String {
    if records.is_empty() {
        return String::new();
    }

    let mut out = String::from(CONTEXT_HEADER);

    for (i, record) in records.iter().enumerate() {
        let Some(obj) = record.as_object() else {
            out.push_str(&format!("Item {}:\n{}\n\n", i + 1, record));
            continue;
        };

        if let Some(title) = obj.get("pageTitle").and_then(Value::as_str) {
            out.push_str(&format!("## {}\n\n", title));
        }

        if let Some(content) = obj.get("content").and_then(Value::as_str) {
            let mut in_code = false;
            for line in content.split('\n') {
                let trimmed = line.trim();
                if trimmed.starts_with("```") && !in_code {
                    in_code = true;
                    let lang = trimmed.trim_start_matches('`').trim();
                    out.push_str(&format!("\n<CODE_BLOCK_START lang=\"{}\">\n", lang));
                    out.push_str(line);
                    out.push('\n');
                } else if trimmed == "```" && in_code {
                    in_code = false;
                    out.push_str(line);
                    out.push('\n');
                    out.push_str("<CODE_BLOCK_END>\n\n");
                } else {
                    out.push_str(line);
                    out.push('\n');
                }
            }
            out.push('\n');
        }

        for (key, value) in obj {
            if key == "pageTitle" || key == "content" {
                continue;
            }
            let rendered = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            out.push_str(&format!("- {}: {}\n", key, rendered));
        }

        out.push_str("\n---\n\n");
    }

    out.push_str("\n===== DATABASE INFORMATION END =====\n");
    out.push_str(CONTEXT_FOOTER);
    out
}

/// Cut `text` to at most `max_chars` characters, closing an open code fence.
pub fn clip_content(text: &str, max_chars: usize) -> String {
    let Some((idx, _)) = text.char_indices().nth(max_chars) else {
        return text.to_string();
    };
    let mut clipped = text[..idx].to_string();
    if clipped.matches("```").count() % 2 == 1 {
        clipped.push_str("\n```");
    }
    clipped.push_str("\n[...]");
    clipped
}

// ============ Response shaping ============

static CODE_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(import\s+[\w.]+|def\s+\w+\(|class\s+\w+\(|function\s+\w+\()")
        .expect("valid regex")
});

static CODE_ANYWHERE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(import\s+[\w.]+|def\s+\w+\(|class\s+\w+\(|function\s+\w+\()")
        .expect("valid regex")
});

static HIGHLIGHT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(IMPORTANT:|WARNING:|CRITICAL:|NOTE:|CAUTION:)([^\n]*)").expect("valid regex")
});

static LIST_ITEM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:\d+\.|[-*])\s").expect("valid regex"));

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));

/// Post-process model output into well-formed Markdown.
pub fn enhance_response(response: &str) -> String {
    let mut text = response.to_string();

    if !text.contains("```") && CODE_ANYWHERE_RE.is_match(&text) {
        text = fence_bare_code(&text);
    }

    // `\b` keeps an already highlighted `**_NOTE:_**` from matching again.
    text = HIGHLIGHT_RE
        .replace_all(&text, "**_${1}_**${2}")
        .into_owned();

    separate_lists(&text)
}

fn fence_bare_code(text: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut in_code = false;

    for line in text.split('\n') {
        if !in_code && CODE_LINE_RE.is_match(line.trim()) {
            lines.push("```python".to_string());
            in_code = true;
        } else if in_code && line.trim().is_empty() {
            lines.push("```".to_string());
            in_code = false;
        }
        lines.push(line.to_string());
    }
    if in_code {
        lines.push("```".to_string());
    }
    lines.join("\n")
}

/// Put a blank line between a paragraph line and a list that follows it.
fn separate_lists(text: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut in_code = false;
    let mut prev_is_text = false;

    for line in text.split('\n') {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") {
            in_code = !in_code;
            prev_is_text = false;
            out.push(line);
            continue;
        }
        if in_code {
            out.push(line);
            continue;
        }
        let is_item = LIST_ITEM_RE.is_match(trimmed);
        if is_item && prev_is_text {
            out.push("");
        }
        prev_is_text = !is_item && !trimmed.is_empty();
        out.push(line);
    }
    out.join("\n")
}

/// Remove HTML-like tags from subprocess output.
pub fn sanitize_output(text: &str) -> String {
    TAG_RE.replace_all(text, "").trim().to_string()
}

// ============ Backends ============

/// Instantiate the backend named by `config.provider`.
pub fn create_completer(config: &LlmConfig) -> Result<Arc<dyn Completer>> {
    match config.provider.as_str() {
        "simulated" => Ok(Arc::new(SimulatedCompleter)),
        "subprocess" => Ok(Arc::new(SubprocessCompleter::new(config)?)),
        "openai" => Ok(Arc::new(OpenAiCompleter::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

/// Like [`create_completer`], falling back to [`SimulatedCompleter`] when the
/// configured backend cannot be created (e.g. a missing API key).
pub fn completer_or_simulated(config: &LlmConfig) -> Arc<dyn Completer> {
    match create_completer(config) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(error = %e, "LLM backend unavailable, using simulated backend");
            Arc::new(SimulatedCompleter)
        }
    }
}

fn history_json(history: &[ChatTurn]) -> String {
    serde_json::to_string(history).unwrap_or_else(|_| "[]".to_string())
}

/// Offline backend: answers from the retrieved records alone.
pub struct SimulatedCompleter;

#[async_trait]
impl Completer for SimulatedCompleter {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        Ok(simulated_answer(request))
    }
}

fn simulated_answer(request: &CompletionRequest) -> String {
    match router::route(&request.prompt) {
        Route::Direct {
            reason: DirectReason::SmallTalk,
        } => {
            return "Hello! Ask me anything about the documentation and I'll look it up."
                .to_string()
        }
        Route::Direct {
            reason: DirectReason::AboutAssistant,
        } => {
            return "I'm a documentation assistant. I search the imported Confluence pages \
                and summarise what they say about your question."
                .to_string()
        }
        _ => {}
    }

    let records = request
        .db_data
        .as_ref()
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    if records.is_empty() {
        return "I don't have specific information about that. Could you rephrase the \
            question or ask about a documented topic?"
            .to_string();
    }

    let mut out = String::from("Based on the available documentation:\n\n");
    for record in &records {
        let title = record
            .get("pageTitle")
            .and_then(Value::as_str)
            .unwrap_or("(untitled)");
        let content = record.get("content").and_then(Value::as_str).unwrap_or("");
        let summary = first_paragraph(content, 300);
        out.push_str(&format!("- **{}**: {}\n", title, summary));
    }
    out.push_str("\nPlease consult the linked pages for full details.");
    out
}

/// First non-code paragraph of `content`, whitespace-collapsed and clipped.
fn first_paragraph(content: &str, max_chars: usize) -> String {
    let para = content
        .split("\n\n")
        .map(str::trim)
        .find(|p| !p.is_empty() && !p.starts_with("```"))
        .unwrap_or("");
    let collapsed = para.split_whitespace().collect::<Vec<_>>().join(" ");
    match collapsed.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &collapsed[..idx]),
        None => collapsed,
    }
}

/// Runs an external program per request.
pub struct SubprocessCompleter {
    command: String,
    args: Vec<String>,
    timeout_secs: u64,
}

impl SubprocessCompleter {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let command = config
            .command
            .clone()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| anyhow::anyhow!("llm.command required for subprocess provider"))?;
        Ok(Self {
            command,
            args: config.args.clone(),
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl Completer for SubprocessCompleter {
    fn name(&self) -> &str {
        "subprocess"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let db_data = request
            .db_data
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_default();

        let mut cmd = tokio::process::Command::new(&self.command);
        cmd.args(&self.args)
            .arg(&request.prompt)
            .arg(&request.context)
            .arg(&request.system_prompt)
            .arg(history_json(&request.history))
            .arg(db_data)
            .kill_on_drop(true);

        let output = tokio::time::timeout(Duration::from_secs(self.timeout_secs), cmd.output())
            .await
            .map_err(|_| LlmError::Timeout(self.timeout_secs))?
            .map_err(|e| LlmError::Subprocess(format!("{}: {}", self.command, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(LlmError::Subprocess(format!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                stderr.trim()
            ))
            .into());
        }

        let answer = sanitize_output(&String::from_utf8_lossy(&output.stdout));
        if answer.is_empty() {
            return Err(LlmError::Parse("subprocess produced no output".to_string()).into());
        }
        Ok(answer)
    }
}

/// OpenAI-compatible chat completions backend.
///
/// Retries HTTP 429, 5xx, and network errors with exponential backoff
/// (1s, 2s, 4s, ... capped at 32s); other 4xx fail immediately.
pub struct OpenAiCompleter {
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: u32,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiCompleter {
    /// Reads the API key from `OPENAI_API_KEY`.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &LlmConfig, api_key: String) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.model required for openai provider"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            api_key,
            model,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            client,
        })
    }

    fn messages(request: &CompletionRequest) -> Vec<Value> {
        let mut messages = vec![json!({ "role": "system", "content": request.system_prompt })];
        for turn in &request.history {
            messages.push(json!({ "role": turn.role, "content": turn.content }));
        }
        if !request.context.is_empty() {
            messages.push(json!({
                "role": "user",
                "content": format!("Context information: {}", request.context),
            }));
        }
        messages.push(json!({
            "role": "user",
            "content": format!("{}\n\n{}", request.prompt, FORMATTING_GUIDANCE),
        }));
        messages
    }
}

#[async_trait]
impl Completer for OpenAiCompleter {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": Self::messages(request),
            "max_tokens": self.max_tokens,
        });
        let url = format!("{}/chat/completions", self.base_url);

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: Value = response.json().await?;
                        return parse_chat_response(&json);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = LlmError::Api {
                        status: status.as_u16(),
                        body: body_text,
                    };

                    // Rate limited or server error: retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(err.into());
                        continue;
                    }

                    return Err(err.into());
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("chat completion failed after retries")))
    }
}

fn parse_chat_response(json: &Value) -> Result<String> {
    let content = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .ok_or_else(|| LlmError::Parse("missing choices[0].message.content".to_string()))?;
    Ok(content.to_string())
}
