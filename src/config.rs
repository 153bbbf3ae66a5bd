//! TOML configuration.
//!
//! Only `[db]` is required; every other section falls back to defaults
//! matching the built-in pipeline constants.
//!
//! ```toml
//! [db]
//! path = "./data/sitewatch.sqlite"
//!
//! [embedding]
//! provider = "ollama"
//! model = "nomic-embed-text"
//! dims = 768
//!
//! [completion]
//! provider = "openai"
//! base_url = "https://api.groq.com/openai/v1"
//! model = "llama-3.1-8b-instant"
//! api_key_env = "GROQ_API_KEY"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use sitewatch_core::answer::AnswerOptions;
use sitewatch_core::chunk::ChunkOptions;
use sitewatch_core::summarize::SummaryOptions;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
    #[serde(default = "default_min_chunk_chars")]
    pub min_chunk_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
            min_chunk_chars: default_min_chunk_chars(),
        }
    }
}

impl ChunkingConfig {
    pub fn options(&self) -> ChunkOptions {
        ChunkOptions {
            chunk_size: self.chunk_size,
            overlap: self.overlap,
            min_chars: self.min_chunk_chars,
        }
    }
}

fn default_chunk_size() -> usize {
    600
}
fn default_overlap() -> usize {
    50
}
fn default_min_chunk_chars() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_min_useful_chars")]
    pub min_useful_chars: usize,
    #[serde(default = "default_max_context_chunks")]
    pub max_context_chunks: usize,
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
    #[serde(default = "default_fallback_chunks")]
    pub fallback_chunks: usize,
    /// Keep only the newest N scrape sessions per target. Unset keeps all.
    #[serde(default)]
    pub retain_sessions: Option<usize>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_useful_chars: default_min_useful_chars(),
            max_context_chunks: default_max_context_chunks(),
            max_context_chars: default_max_context_chars(),
            fallback_chunks: default_fallback_chunks(),
            retain_sessions: None,
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_min_useful_chars() -> usize {
    100
}
fn default_max_context_chunks() -> usize {
    5
}
fn default_max_context_chars() -> usize {
    3000
}
fn default_fallback_chunks() -> usize {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_embedding_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

/// OpenAI-compatible chat completion endpoint (OpenAI, Groq, vLLM, ...).
#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    #[serde(default = "default_completion_provider")]
    pub provider: String,
    #[serde(default = "default_completion_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_completion_retries")]
    pub max_retries: u32,
    #[serde(default = "default_completion_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: default_completion_provider(),
            base_url: default_completion_base_url(),
            model: None,
            api_key_env: default_api_key_env(),
            max_retries: default_completion_retries(),
            timeout_secs: default_completion_timeout(),
            temperature: default_temperature(),
        }
    }
}

impl CompletionConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_completion_provider() -> String {
    "disabled".to_string()
}
fn default_completion_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_completion_retries() -> u32 {
    2
}
fn default_completion_timeout() -> u64 {
    60
}
fn default_temperature() -> f32 {
    0.3
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Pause before each extra page of a crawl.
    #[serde(default)]
    pub settle_millis: u64,
    #[serde(default = "default_max_pages_cap")]
    pub max_pages_cap: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout(),
            user_agent: default_user_agent(),
            settle_millis: 0,
            max_pages_cap: default_max_pages_cap(),
        }
    }
}

fn default_fetch_timeout() -> u64 {
    60
}
fn default_user_agent() -> String {
    format!("sitewatch/{}", env!("CARGO_PKG_VERSION"))
}
fn default_max_pages_cap() -> u32 {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct MonitorConfig {
    #[serde(default = "default_summary_input_chars")]
    pub summary_input_chars: usize,
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
    #[serde(default = "default_summary_max_tokens")]
    pub summary_max_tokens: u32,
    #[serde(default = "default_answer_max_tokens")]
    pub answer_max_tokens: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            summary_input_chars: default_summary_input_chars(),
            preview_chars: default_preview_chars(),
            summary_max_tokens: default_summary_max_tokens(),
            answer_max_tokens: default_answer_max_tokens(),
        }
    }
}

impl MonitorConfig {
    pub fn summary_options(&self) -> SummaryOptions {
        SummaryOptions {
            input_chars: self.summary_input_chars,
            max_tokens: self.summary_max_tokens,
        }
    }
}

fn default_summary_input_chars() -> usize {
    1500
}
fn default_preview_chars() -> usize {
    500
}
fn default_summary_max_tokens() -> u32 {
    150
}
fn default_answer_max_tokens() -> u32 {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    /// How often the scheduler looks for due jobs.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    #[serde(default = "default_min_interval")]
    pub min_interval_secs: u64,
    #[serde(default = "default_max_interval")]
    pub max_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            min_interval_secs: default_min_interval(),
            max_interval_secs: default_max_interval(),
        }
    }
}

fn default_tick_secs() -> u64 {
    30
}
fn default_min_interval() -> u64 {
    60
}
fn default_max_interval() -> u64 {
    30 * 24 * 3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotifyConfig {
    #[serde(default = "default_notify_provider")]
    pub provider: String,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_notify_timeout")]
    pub timeout_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            provider: default_notify_provider(),
            webhook_url: None,
            timeout_secs: default_notify_timeout(),
        }
    }
}

fn default_notify_provider() -> String {
    "log".to_string()
}
fn default_notify_timeout() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

impl Config {
    pub fn answer_options(&self) -> AnswerOptions {
        AnswerOptions {
            top_k: self.retrieval.top_k,
            min_useful_chars: self.retrieval.min_useful_chars,
            max_context_chunks: self.retrieval.max_context_chunks,
            max_context_chars: self.retrieval.max_context_chars,
            fallback_chunks: self.retrieval.fallback_chunks,
            max_tokens: self.monitor.answer_max_tokens,
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Chunking
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.overlap must be smaller than chunking.chunk_size");
    }

    // Retrieval
    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.retain_sessions == Some(0) {
        anyhow::bail!("retrieval.retain_sessions must be >= 1 when set");
    }

    // Embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }
    if matches!(config.embedding.provider.as_str(), "openai" | "ollama") {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    // Completion
    match config.completion.provider.as_str() {
        "disabled" => {}
        "openai" => {
            if config.completion.model.is_none() {
                anyhow::bail!("completion.model must be specified when provider is 'openai'");
            }
        }
        other => anyhow::bail!(
            "Unknown completion provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    // Scheduler
    let sched = &config.scheduler;
    if sched.tick_secs == 0 {
        anyhow::bail!("scheduler.tick_secs must be > 0");
    }
    if sched.min_interval_secs == 0 || sched.min_interval_secs > sched.max_interval_secs {
        anyhow::bail!("scheduler.min_interval_secs must be > 0 and <= max_interval_secs");
    }

    // Notify
    match config.notify.provider.as_str() {
        "log" => {}
        "webhook" => {
            if config.notify.webhook_url.is_none() {
                anyhow::bail!("notify.webhook_url must be set when provider is 'webhook'");
            }
        }
        other => anyhow::bail!("Unknown notify provider: '{}'. Must be log or webhook.", other),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let cfg = parse("[db]\npath = \"/tmp/x.sqlite\"\n").unwrap();
        assert_eq!(cfg.chunking.chunk_size, 600);
        assert_eq!(cfg.chunking.overlap, 50);
        assert_eq!(cfg.retrieval.top_k, 5);
        assert_eq!(cfg.retrieval.retain_sessions, None);
        assert_eq!(cfg.monitor.preview_chars, 500);
        assert_eq!(cfg.scheduler.tick_secs, 30);
        assert_eq!(cfg.notify.provider, "log");
        assert!(!cfg.embedding.is_enabled());
        assert!(!cfg.completion.is_enabled());
        assert_eq!(cfg.answer_options().max_tokens, 500);
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk() {
        let err = parse("[db]\npath = \"x\"\n[chunking]\nchunk_size = 50\noverlap = 50\n")
            .unwrap_err();
        assert!(err.to_string().contains("overlap"));
    }

    #[test]
    fn test_openai_embedding_requires_model_and_dims() {
        let err = parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\n").unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }

    #[test]
    fn test_webhook_requires_url() {
        let err = parse("[db]\npath = \"x\"\n[notify]\nprovider = \"webhook\"\n").unwrap_err();
        assert!(err.to_string().contains("webhook_url"));
    }

    #[test]
    fn test_unknown_completion_provider() {
        let err =
            parse("[db]\npath = \"x\"\n[completion]\nprovider = \"smoke-signals\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown completion provider"));
    }

    #[test]
    fn test_example_config_is_valid() {
        let cfg = parse(include_str!("../config/sitewatch.example.toml")).unwrap();
        assert_eq!(cfg.embedding.provider, "local");
        assert_eq!(cfg.completion.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(cfg.server.bind, "127.0.0.1:7340");
    }
}
