//! CLI command handlers.
//!
//! Each `run_*` function wires configuration into the engine components,
//! runs one operation and prints a plain-text report to stdout.

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tracing::warn;

use crate::config::Config;
use crate::embedding::{create_provider, EmbedSettings, EmbeddingOrchestrator};
use crate::query::QueryService;
use crate::reconcile::Reconciler;
use crate::source::FilesystemSource;
use crate::state::{InMemoryStateStore, SqliteStateStore, SyncStateStore};
use crate::vector_store::vectorize::{IndexSpec, Provisioned};
use crate::vector_store::{create_store, VectorizeStore};

pub fn build_embedder(config: &Config) -> Result<Arc<EmbeddingOrchestrator>> {
    let provider = create_provider(config)?;
    Ok(Arc::new(EmbeddingOrchestrator::new(
        provider,
        EmbedSettings::from_config(config),
    )))
}

/// Sync state matching the lifetime of the configured index.
///
/// An in-memory index is gone when the process exits, so its snapshot must
/// not outlive it either; otherwise the next run would see every document as
/// unchanged and never re-upload it.
pub async fn open_state(config: &Config) -> Result<Arc<dyn SyncStateStore>> {
    if config.vector_store.is_ephemeral() {
        warn!(
            collection = %config.collection,
            "vector_store.provider is memory; index and sync state last for this run only"
        );
        return Ok(Arc::new(InMemoryStateStore::new()));
    }
    Ok(Arc::new(SqliteStateStore::open(&config.state.path).await?))
}

pub async fn build_reconciler(config: &Config) -> Result<Reconciler> {
    let source_cfg = config
        .source
        .as_ref()
        .context("[source] section required for sync")?;
    let source = Arc::new(FilesystemSource::new(&config.collection, source_cfg)?);
    let state = open_state(config).await?;
    let embedder = build_embedder(config)?;
    let store = create_store(config)?;
    Ok(Reconciler::new(
        source,
        state,
        embedder,
        store,
        &config.vector_store.metric,
    ))
}

pub fn build_query_service(config: &Config) -> Result<QueryService> {
    if config.vector_store.is_ephemeral() {
        bail!("search needs a persistent index; set vector_store.provider = \"cloudflare\"");
    }
    Ok(QueryService::new(
        build_embedder(config)?,
        create_store(config)?,
        config.retrieval.clone(),
    ))
}

fn vectorize(config: &Config) -> Result<VectorizeStore> {
    if config.vector_store.provider != "cloudflare" {
        bail!(
            "index management requires vector_store.provider = \"cloudflare\" (got \"{}\")",
            config.vector_store.provider
        );
    }
    let cf = config
        .cloudflare
        .as_ref()
        .context("[cloudflare] section required")?;
    VectorizeStore::from_config(cf, config)
}

pub async fn run_init(config: &Config) -> Result<()> {
    let state = SqliteStateStore::open(&config.state.path).await?;
    state.close().await;
    println!("Sync state initialized at {}", config.state.path.display());
    Ok(())
}

pub async fn run_index_info(config: &Config) -> Result<()> {
    use crate::vector_store::VectorStore;

    let store = create_store(config)?;
    let info = store.index_info().await?;
    println!("index {}", info.name);
    println!("  dimensions: {}", info.dimensions);
    println!("  metric: {}", info.metric);
    println!("  vectors: {}", info.vector_count);
    Ok(())
}

pub async fn run_index_init(config: &Config) -> Result<()> {
    let store = vectorize(config)?;
    if !store.verify_token().await? {
        bail!("Cloudflare API token is not active");
    }

    let spec = IndexSpec::from_config(config);
    match store.provision_index(&spec).await? {
        Provisioned::Created => {
            println!(
                "Created index {} ({} dimensions, {})",
                spec.name, spec.dimensions, spec.metric
            );
        }
        Provisioned::AlreadyExists(info) => {
            println!(
                "Index {} already exists ({} dimensions, {}, {} vectors)",
                info.name, info.dimensions, info.metric, info.vector_count
            );
            if info.dimensions != spec.dimensions {
                bail!(
                    "existing index has {} dimensions but embedding.dims is {}",
                    info.dimensions,
                    spec.dimensions
                );
            }
        }
    }
    Ok(())
}

pub async fn run_sync(config: &Config) -> Result<()> {
    let reconciler = build_reconciler(config).await?;
    let summary = reconciler.sync().await?;

    println!("sync {}", config.collection);
    println!("  added: {}", summary.added.len());
    println!("  updated: {}", summary.updated.len());
    println!("  deleted: {}", summary.deleted.len());
    println!("  unchanged: {}", summary.unchanged.len());
    println!("  failed: {}", summary.failed.len());
    for err in &summary.errors {
        println!("    {}", err);
    }
    Ok(())
}

pub async fn run_search(
    config: &Config,
    query: &str,
    limit: Option<usize>,
    min_score: Option<f32>,
) -> Result<()> {
    let service = build_query_service(config)?;
    let top_k = limit.unwrap_or(config.retrieval.top_k);
    let min_score = min_score.unwrap_or(config.retrieval.min_score);
    let matches = service.search(query, top_k, min_score).await?;

    if matches.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, m) in matches.iter().enumerate() {
        let title = m
            .metadata
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or("(untitled)");
        println!(
            "{}. [{:.3}] {} ({})",
            i + 1,
            m.score,
            title,
            m.document_id().unwrap_or(&m.id)
        );
        if let Some(content) = m.metadata.get("content").and_then(|v| v.as_str()) {
            let snippet: String = content.chars().take(160).collect();
            println!("    {}", snippet.replace('\n', " "));
        }
    }
    Ok(())
}

pub async fn run_status(config: &Config) -> Result<()> {
    let state = SqliteStateStore::open(&config.state.path).await?;
    let stats = state.stats(&config.collection).await?;
    state.close().await;

    println!("collection {}", config.collection);
    println!("  synced documents: {}", stats.records);
    match stats.last_synced_at {
        Some(ts) => println!("  last synced: {}", ts.to_rfc3339()),
        None => println!("  last synced: never"),
    }
    println!(
        "  embedding: {} ({})",
        config.embedding.provider,
        config.embedding.model.as_deref().unwrap_or("-")
    );
    println!(
        "  vector store: {} ({}, {})",
        config.vector_store.provider, config.vector_store.index_name, config.vector_store.metric
    );
    Ok(())
}
