//! TOML configuration.
//!
//! Everything that is not a secret lives in the config file. Credentials are
//! read from the environment (optionally via a `.env` file loaded at startup)
//! so the file can be committed:
//!
//! | Variable | Overrides |
//! |----------|-----------|
//! | `DOCCHAT_DB_PATH` | `[db].path` |
//! | `CONFLUENCE_BASE_URL` | `[confluence].base_url` |
//! | `CONFLUENCE_USERNAME` | `[confluence].username` |
//! | `CONFLUENCE_API_TOKEN` | basic-auth password |
//! | `CONFLUENCE_BEARER_TOKEN` | personal access token (takes precedence) |
//! | `OPENAI_API_KEY` | `[llm]` openai provider key |

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub confluence: ConfluenceConfig,
    #[serde(default)]
    pub import: ImportConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,
    #[serde(default = "default_connect_retry_delay_ms")]
    pub connect_retry_delay_ms: u64,
}

fn default_connect_retries() -> u32 {
    3
}
fn default_connect_retry_delay_ms() -> u64 {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default = "default_title_weight")]
    pub title_weight: f64,
    #[serde(default = "default_content_weight")]
    pub content_weight: f64,
    #[serde(default = "default_code_weight")]
    pub code_weight: f64,
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            title_weight: default_title_weight(),
            content_weight: default_content_weight(),
            code_weight: default_code_weight(),
            snippet_chars: default_snippet_chars(),
        }
    }
}

fn default_limit() -> i64 {
    5
}
fn default_title_weight() -> f64 {
    10.0
}
fn default_content_weight() -> f64 {
    2.0
}
fn default_code_weight() -> f64 {
    1.0
}
fn default_snippet_chars() -> usize {
    240
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConfluenceConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_child_page_size")]
    pub child_page_size: usize,
}

impl Default for ConfluenceConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            username: None,
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            timeout_secs: default_timeout_secs(),
            child_page_size: default_child_page_size(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    1000
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_child_page_size() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImportConfig {
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            max_pages: default_max_pages(),
        }
    }
}

fn default_max_depth() -> usize {
    3
}
fn default_max_pages() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Program for the `subprocess` provider.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            command: None,
            args: Vec::new(),
            model: None,
            base_url: default_base_url(),
            system_prompt: None,
            max_tokens: default_max_tokens(),
            max_history: default_max_history(),
            max_context_chars: default_max_context_chars(),
            timeout_secs: default_llm_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_provider() -> String {
    "simulated".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_max_history() -> usize {
    10
}
fn default_max_context_chars() -> usize {
    4000
}
fn default_llm_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

impl Config {
    /// Apply environment overrides on top of the parsed file.
    pub fn apply_env(&mut self) {
        if let Ok(path) = std::env::var("DOCCHAT_DB_PATH") {
            if !path.is_empty() {
                self.db.path = PathBuf::from(path);
            }
        }
        if let Ok(url) = std::env::var("CONFLUENCE_BASE_URL") {
            if !url.is_empty() {
                self.confluence.base_url = Some(url);
            }
        }
        if let Ok(user) = std::env::var("CONFLUENCE_USERNAME") {
            if !user.is_empty() {
                self.confluence.username = Some(user);
            }
        }
    }
}

impl LlmConfig {
    pub fn system_prompt(&self) -> &str {
        self.system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT)
    }
}

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant that answers questions \
about internal engineering documentation. Use the provided documentation context when it is \
relevant. If you don't know something, say so. Keep answers short and precise, and use bullet \
points where they help.";

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.apply_env();
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.retrieval.limit < 1 {
        bail!("retrieval.limit must be >= 1");
    }

    for (name, w) in [
        ("title_weight", config.retrieval.title_weight),
        ("content_weight", config.retrieval.content_weight),
        ("code_weight", config.retrieval.code_weight),
    ] {
        if w.is_nan() || w < 0.0 {
            bail!("retrieval.{} must be >= 0", name);
        }
    }

    if config.import.max_pages == 0 {
        bail!("import.max_pages must be > 0");
    }

    if config.confluence.child_page_size == 0 {
        bail!("confluence.child_page_size must be > 0");
    }

    match config.llm.provider.as_str() {
        "simulated" | "openai" => {}
        "subprocess" => {
            if config.llm.command.as_deref().unwrap_or("").is_empty() {
                bail!("llm.command must be set when provider is 'subprocess'");
            }
        }
        other => bail!(
            "Unknown llm provider: '{}'. Must be simulated, subprocess, or openai.",
            other
        ),
    }

    if config.llm.provider == "openai" && config.llm.model.is_none() {
        bail!("llm.model must be specified when provider is 'openai'");
    }

    Ok(())
}
