//! TOML configuration.
//!
//! Everything the engine needs (including credentials) is resolved here,
//! once, into an explicit [`Config`] that is passed to constructors. Secrets
//! are not stored in the file; the file names the environment variable that
//! holds each one and [`load_config`] reads it.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Identity of the document collection. Keys the sync state and the
    /// single-writer guard.
    #[serde(default = "default_collection")]
    pub collection: String,
    pub state: StateConfig,
    #[serde(default)]
    pub source: Option<SourceConfig>,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub cloudflare: Option<CloudflareConfig>,
    #[serde(default)]
    pub openai: Option<OpenAIConfig>,
}

fn default_collection() -> String {
    "default".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct StateConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            max_input_chars: default_max_input_chars(),
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_input_chars() -> usize {
    2048
}
fn default_concurrency() -> usize {
    4
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_backoff_base_ms() -> u64 {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorStoreConfig {
    #[serde(default = "default_store_provider")]
    pub provider: String,
    #[serde(default = "default_index_name")]
    pub index_name: String,
    #[serde(default = "default_metric")]
    pub metric: String,
    #[serde(default = "default_store_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            provider: default_store_provider(),
            index_name: default_index_name(),
            metric: default_metric(),
            batch_size: default_store_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

impl VectorStoreConfig {
    /// The index lives only as long as the process.
    pub fn is_ephemeral(&self) -> bool {
        self.provider == "memory"
    }
}

fn default_store_provider() -> String {
    "cloudflare".to_string()
}
fn default_index_name() -> String {
    "confluence-pages-index".to_string()
}
fn default_metric() -> String {
    "cosine".to_string()
}
fn default_store_batch_size() -> usize {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub min_score: f32,
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_score: 0.0,
            candidate_multiplier: default_candidate_multiplier(),
            max_candidates: default_max_candidates(),
        }
    }
}

fn default_top_k() -> usize {
    3
}
fn default_candidate_multiplier() -> usize {
    3
}
fn default_max_candidates() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct CloudflareConfig {
    pub account_id: String,
    #[serde(default = "default_cloudflare_token_env")]
    pub api_token_env: String,
    #[serde(default = "default_cloudflare_api_base")]
    pub api_base: String,
    /// Resolved from `api_token_env` by [`load_config`].
    #[serde(skip)]
    pub api_token: Option<String>,
}

fn default_cloudflare_token_env() -> String {
    "CLOUDFLARE_API_TOKEN".to_string()
}
fn default_cloudflare_api_base() -> String {
    "https://api.cloudflare.com/client/v4".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct OpenAIConfig {
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_openai_api_base")]
    pub api_base: String,
    /// Resolved from `api_key_env` by [`load_config`].
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_openai_key_env(),
            api_base: default_openai_api_base(),
            api_key: None,
        }
    }
}

fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_openai_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

/// Read, parse, resolve credentials for, and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    resolve_credentials(&mut config, |name| std::env::var(name).ok());
    validate(&config)?;
    Ok(config)
}

/// Fill in secrets from the environment (or any lookup, for tests).
pub fn resolve_credentials<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(cf) = config.cloudflare.as_mut() {
        if cf.api_token.is_none() {
            cf.api_token = lookup(&cf.api_token_env).filter(|v| !v.is_empty());
        }
    }
    if config.embedding.provider == "openai" && config.openai.is_none() {
        config.openai = Some(OpenAIConfig::default());
    }
    if let Some(oa) = config.openai.as_mut() {
        if oa.api_key.is_none() {
            oa.api_key = lookup(&oa.api_key_env).filter(|v| !v.is_empty());
        }
    }
}

/// Check the configuration for errors that must abort before any sync.
pub fn validate(config: &Config) -> Result<()> {
    if config.collection.trim().is_empty() {
        bail!("collection must not be empty");
    }

    let emb = &config.embedding;
    match emb.provider.as_str() {
        "disabled" | "openai" | "cloudflare" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or cloudflare.",
            other
        ),
    }
    if emb.is_enabled() {
        if emb.dims.is_none() || emb.dims == Some(0) {
            bail!("embedding.dims must be > 0 when provider is '{}'", emb.provider);
        }
        if emb.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                emb.provider
            );
        }
    }
    if emb.max_input_chars == 0 {
        bail!("embedding.max_input_chars must be > 0");
    }
    if emb.concurrency == 0 {
        bail!("embedding.concurrency must be > 0");
    }

    let vs = &config.vector_store;
    match vs.provider.as_str() {
        "memory" | "cloudflare" => {}
        other => bail!(
            "Unknown vector store provider: '{}'. Must be memory or cloudflare.",
            other
        ),
    }
    // Scores are ranked higher-is-closer, which distance metrics break.
    match vs.metric.as_str() {
        "cosine" | "dot-product" => {}
        "euclidean" => bail!(
            "vector_store.metric 'euclidean' is not supported: search ranks by similarity. Use cosine or dot-product."
        ),
        other => bail!(
            "Unknown vector_store.metric: '{}'. Must be cosine or dot-product.",
            other
        ),
    }
    if vs.batch_size == 0 {
        bail!("vector_store.batch_size must be > 0");
    }
    if vs.index_name.trim().is_empty() {
        bail!("vector_store.index_name must not be empty");
    }

    let needs_cloudflare = emb.provider == "cloudflare" || vs.provider == "cloudflare";
    if needs_cloudflare {
        let cf = config
            .cloudflare
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("[cloudflare] section required for cloudflare providers"))?;
        if cf.account_id.trim().is_empty() {
            bail!("cloudflare.account_id must not be empty");
        }
        if cf.api_token.is_none() {
            bail!("{} environment variable not set", cf.api_token_env);
        }
    }
    if emb.provider == "openai" {
        let oa = config
            .openai
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("[openai] section required for openai provider"))?;
        if oa.api_key.is_none() {
            bail!("{} environment variable not set", oa.api_key_env);
        }
    }

    let r = &config.retrieval;
    if r.top_k == 0 {
        bail!("retrieval.top_k must be >= 1");
    }
    if r.candidate_multiplier == 0 {
        bail!("retrieval.candidate_multiplier must be >= 1");
    }
    if r.max_candidates < r.top_k {
        bail!("retrieval.max_candidates must be >= retrieval.top_k");
    }

    Ok(())
}
