//! Tests of the Cloudflare adapters against a local fake of the REST API.
//!
//! The fake (an axum app on 127.0.0.1:0) implements just enough of Workers
//! AI and Vectorize v2 to exercise request shapes, envelope decoding,
//! batching, retries and error classification.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use vector_sync::cloudflare::CloudflareClient;
use vector_sync::config::{CloudflareConfig, EmbeddingConfig};
use vector_sync::embedding::{EmbedSettings, EmbeddingOrchestrator, WorkersAiProvider};
use vector_sync::error::SyncError;
use vector_sync::models::{Document, VectorMetadata, VectorRecord};
use vector_sync::reconcile::Reconciler;
use vector_sync::retry::RetryPolicy;
use vector_sync::source::InMemorySource;
use vector_sync::state::{InMemoryStateStore, SyncGuards};
use vector_sync::vector_store::vectorize::{IndexSpec, Provisioned, MAX_TOP_K_WITH_METADATA};
use vector_sync::vector_store::{VectorStore, VectorizeStore};

const TOKEN: &str = "test-token";
const DIMS: usize = 3;

// ─── Fake Cloudflare ────────────────────────────────────────────────

#[derive(Default)]
struct Fake {
    index: Option<(usize, String)>,
    metadata_indexes: Vec<String>,
    vectors: HashMap<String, (Vec<f32>, Value)>,
    /// Number of upcoming embedding calls that answer 503.
    embed_unavailable: usize,
    /// Texts that make the embedding call answer 400.
    embed_reject: Vec<String>,
    embed_calls: usize,
    upsert_bodies: Vec<String>,
    /// Upsert request number (1-based) that answers 400.
    reject_upsert_call: Option<usize>,
    query_top_ks: Vec<usize>,
}

type Shared = Arc<Mutex<Fake>>;

fn ok(result: Value) -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({ "success": true, "errors": [], "messages": [], "result": result })),
    )
}

fn fail(status: StatusCode, code: i64, message: &str) -> (StatusCode, Json<Value>) {
    (
        status,
        Json(json!({
            "success": false,
            "errors": [{ "code": code, "message": message }],
            "messages": [],
            "result": null
        })),
    )
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("Bearer {}", TOKEN))
        .unwrap_or(false)
}

fn fake_vector(text: &str) -> Vec<f32> {
    vec![1.0, text.len() as f32 / 100.0, 0.25]
}

async fn ai_run(
    State(fake): State<Shared>,
    Path((_account, _model)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if !authorized(&headers) {
        return fail(StatusCode::UNAUTHORIZED, 10000, "Authentication error");
    }
    let mut fake = fake.lock().unwrap();
    fake.embed_calls += 1;
    if fake.embed_unavailable > 0 {
        fake.embed_unavailable -= 1;
        return fail(StatusCode::SERVICE_UNAVAILABLE, 7010, "Service unavailable");
    }
    let texts: Vec<String> = body["text"]
        .as_array()
        .map(|a| a.iter().filter_map(|t| t.as_str().map(String::from)).collect())
        .unwrap_or_default();
    if texts.iter().any(|t| fake.embed_reject.contains(t)) {
        return fail(StatusCode::BAD_REQUEST, 5006, "Invalid input");
    }
    let data: Vec<Vec<f32>> = texts.iter().map(|t| fake_vector(t)).collect();
    ok(json!({ "shape": [data.len(), DIMS], "data": data }))
}

async fn create_index(
    State(fake): State<Shared>,
    Path(_account): Path<String>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let mut fake = fake.lock().unwrap();
    let dims = body["config"]["dimensions"].as_u64().unwrap_or(0) as usize;
    let metric = body["config"]["metric"].as_str().unwrap_or("").to_string();
    fake.index = Some((dims, metric.clone()));
    ok(json!({ "name": body["name"], "config": { "dimensions": dims, "metric": metric } }))
}

async fn describe_index(
    State(fake): State<Shared>,
    Path((_account, name)): Path<(String, String)>,
) -> (StatusCode, Json<Value>) {
    let fake = fake.lock().unwrap();
    match &fake.index {
        Some((dims, metric)) => ok(json!({
            "name": name,
            "config": { "dimensions": dims, "metric": metric }
        })),
        None => fail(StatusCode::NOT_FOUND, 3000, "vectorize.index.not_found"),
    }
}

async fn index_info(
    State(fake): State<Shared>,
    Path((_account, _name)): Path<(String, String)>,
) -> (StatusCode, Json<Value>) {
    let fake = fake.lock().unwrap();
    let dims = fake.index.as_ref().map(|(d, _)| *d).unwrap_or(0);
    ok(json!({ "dimensions": dims, "vectorCount": fake.vectors.len() }))
}

async fn create_metadata_index(
    State(fake): State<Shared>,
    Path((_account, _name)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let mut fake = fake.lock().unwrap();
    let property = body["propertyName"].as_str().unwrap_or("").to_string();
    fake.metadata_indexes.push(property);
    ok(json!({ "mutationId": "meta-1" }))
}

async fn upsert(
    State(fake): State<Shared>,
    Path((_account, _name)): Path<(String, String)>,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, Json<Value>) {
    let mut fake = fake.lock().unwrap();
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if content_type != "application/x-ndjson" {
        return fail(StatusCode::BAD_REQUEST, 1005, "expected ndjson");
    }
    fake.upsert_bodies.push(body.clone());
    let call = fake.upsert_bodies.len();
    if fake.reject_upsert_call == Some(call) {
        return fail(StatusCode::BAD_REQUEST, 40007, "invalid vector");
    }
    for line in body.lines().filter(|l| !l.trim().is_empty()) {
        let v: Value = serde_json::from_str(line).unwrap();
        let values: Vec<f32> = v["values"]
            .as_array()
            .unwrap()
            .iter()
            .map(|x| x.as_f64().unwrap() as f32)
            .collect();
        let id = v["id"].as_str().unwrap().to_string();
        fake.vectors.insert(id, (values, v["metadata"].clone()));
    }
    ok(json!({ "mutationId": format!("upsert-{}", call) }))
}

async fn delete_by_ids(
    State(fake): State<Shared>,
    Path((_account, _name)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let mut fake = fake.lock().unwrap();
    for id in body["ids"].as_array().unwrap() {
        fake.vectors.remove(id.as_str().unwrap());
    }
    ok(json!({ "mutationId": "delete-1" }))
}

async fn query(
    State(fake): State<Shared>,
    Path((_account, _name)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let mut fake = fake.lock().unwrap();
    let top_k = body["topK"].as_u64().unwrap_or(5) as usize;
    let with_metadata = body["returnMetadata"] == "all";
    fake.query_top_ks.push(top_k);
    if with_metadata && top_k > 20 {
        return fail(
            StatusCode::BAD_REQUEST,
            40025,
            "topK must be less than or equal to 20 when returnMetadata is all",
        );
    }

    let vector: Vec<f32> = body["vector"]
        .as_array()
        .unwrap()
        .iter()
        .map(|x| x.as_f64().unwrap() as f32)
        .collect();

    let mut scored: Vec<(String, f32, Value)> = fake
        .vectors
        .iter()
        .map(|(id, (values, meta))| {
            (
                id.clone(),
                vector_sync::embedding::cosine_similarity(&vector, values),
                meta.clone(),
            )
        })
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap().then_with(|| a.0.cmp(&b.0)));
    scored.truncate(top_k);

    let matches: Vec<Value> = scored
        .into_iter()
        .map(|(id, score, meta)| {
            if with_metadata {
                json!({ "id": id, "score": score, "metadata": meta })
            } else {
                json!({ "id": id, "score": score })
            }
        })
        .collect();
    ok(json!({ "count": matches.len(), "matches": matches }))
}

async fn verify_token(headers: HeaderMap) -> (StatusCode, Json<Value>) {
    if authorized(&headers) {
        ok(json!({ "id": "tok-1", "status": "active" }))
    } else {
        fail(StatusCode::UNAUTHORIZED, 1000, "Invalid API Token")
    }
}

async fn start_fake() -> (String, Shared) {
    let fake: Shared = Arc::new(Mutex::new(Fake::default()));
    let index = "/client/v4/accounts/{account}/vectorize/v2/indexes/{name}";
    let app = Router::new()
        .route("/client/v4/user/tokens/verify", get(verify_token))
        .route("/client/v4/accounts/{account}/ai/run/{*model}", post(ai_run))
        .route(
            "/client/v4/accounts/{account}/vectorize/v2/indexes",
            post(create_index),
        )
        .route(index, get(describe_index))
        .route(&format!("{}/info", index), get(index_info))
        .route(&format!("{}/upsert", index), post(upsert))
        .route(&format!("{}/delete_by_ids", index), post(delete_by_ids))
        .route(&format!("{}/query", index), post(query))
        .route(
            &format!("{}/metadata_index/create", index),
            post(create_metadata_index),
        )
        .with_state(fake.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}/client/v4", addr), fake)
}

// ─── Helpers ────────────────────────────────────────────────────────

fn cf_config(api_base: &str) -> CloudflareConfig {
    CloudflareConfig {
        account_id: "acc-123".into(),
        api_token_env: "CLOUDFLARE_API_TOKEN".into(),
        api_base: api_base.into(),
        api_token: Some(TOKEN.into()),
    }
}

fn embedding_config() -> EmbeddingConfig {
    EmbeddingConfig {
        provider: "cloudflare".into(),
        model: Some("@cf/baai/bge-base-en-v1.5".into()),
        dims: Some(DIMS),
        ..Default::default()
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(2, Duration::from_millis(1))
}

fn orchestrator(api_base: &str) -> Arc<EmbeddingOrchestrator> {
    let provider = WorkersAiProvider::new(&cf_config(api_base), &embedding_config()).unwrap();
    Arc::new(EmbeddingOrchestrator::new(
        Arc::new(provider),
        EmbedSettings {
            max_input_chars: 2048,
            concurrency: 2,
            retry: fast_retry(),
        },
    ))
}

fn vectorize(api_base: &str, batch_size: usize) -> VectorizeStore {
    let client = CloudflareClient::new(&cf_config(api_base), Duration::from_secs(5)).unwrap();
    VectorizeStore::new(client, "pages-index", batch_size, fast_retry())
}

fn index_spec() -> IndexSpec {
    IndexSpec {
        name: "pages-index".into(),
        dimensions: DIMS,
        metric: "cosine".into(),
        description: "test".into(),
        metadata_indexes: vec!["document_id".into()],
    }
}

fn record(id: &str, values: Vec<f32>) -> VectorRecord {
    let mut metadata = VectorMetadata::new();
    metadata.insert("document_id".into(), id.into());
    VectorRecord {
        id: id.into(),
        values,
        metadata,
    }
}

// ─── Workers AI ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_workers_ai_embeds_in_input_order() {
    let (base, _fake) = start_fake().await;
    let embedder = orchestrator(&base);

    let results = embedder
        .embed(&["a".to_string(), "abcd".to_string()])
        .await;

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].as_ref().unwrap(), &fake_vector("a"));
    assert_eq!(results[1].as_ref().unwrap(), &fake_vector("abcd"));
}

#[tokio::test]
async fn test_workers_ai_retries_unavailable() {
    let (base, fake) = start_fake().await;
    fake.lock().unwrap().embed_unavailable = 1;
    let embedder = orchestrator(&base);

    let vector = embedder.embed_query("deploy").await.unwrap();

    assert_eq!(vector, fake_vector("deploy"));
    assert_eq!(fake.lock().unwrap().embed_calls, 2);
}

#[tokio::test]
async fn test_workers_ai_bad_request_is_permanent() {
    let (base, fake) = start_fake().await;
    fake.lock().unwrap().embed_reject = vec!["poison".into()];
    let embedder = orchestrator(&base);

    let results = embedder
        .embed(&["poison".to_string(), "fine".to_string()])
        .await;

    let err = results[0].as_ref().unwrap_err();
    assert!(!err.error.is_transient());
    assert_eq!(err.attempts, 1);
    assert!(results[1].is_ok());
}

#[tokio::test]
async fn test_workers_ai_wrong_token_is_permanent() {
    let (base, _fake) = start_fake().await;
    let mut cfg = cf_config(&base);
    cfg.api_token = Some("nope".into());
    let provider = WorkersAiProvider::new(&cfg, &embedding_config()).unwrap();
    let embedder = EmbeddingOrchestrator::new(
        Arc::new(provider),
        EmbedSettings {
            max_input_chars: 2048,
            concurrency: 1,
            retry: fast_retry(),
        },
    );

    let err = embedder.embed_query("x").await.unwrap_err();
    assert!(!err.error.is_transient());
}

// ─── Vectorize ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_provision_creates_then_reports_existing() {
    let (base, fake) = start_fake().await;
    let store = vectorize(&base, 1000);

    let first = store.provision_index(&index_spec()).await.unwrap();
    assert_eq!(first, Provisioned::Created);
    assert_eq!(fake.lock().unwrap().metadata_indexes, vec!["document_id"]);

    match store.provision_index(&index_spec()).await.unwrap() {
        Provisioned::AlreadyExists(info) => {
            assert_eq!(info.dimensions, DIMS);
            assert_eq!(info.metric, "cosine");
        }
        other => panic!("expected existing index, got {:?}", other),
    }
}

#[tokio::test]
async fn test_verify_token() {
    let (base, _fake) = start_fake().await;
    assert!(vectorize(&base, 1000).verify_token().await.unwrap());
}

#[tokio::test]
async fn test_upsert_batches_as_ndjson() {
    let (base, fake) = start_fake().await;
    let store = vectorize(&base, 2);
    store.provision_index(&index_spec()).await.unwrap();

    let records: Vec<VectorRecord> = (0..5)
        .map(|i| record(&format!("doc-{}", i), vec![1.0, i as f32, 0.0]))
        .collect();
    let result = store.upsert(&records).await.unwrap();

    assert_eq!(result.count, 5);
    assert_eq!(result.mutation_id.as_deref(), Some("upsert-3"));
    let fake = fake.lock().unwrap();
    assert_eq!(fake.upsert_bodies.len(), 3);
    assert_eq!(fake.upsert_bodies[0].lines().count(), 2);
    assert_eq!(fake.upsert_bodies[2].lines().count(), 1);
    assert_eq!(fake.vectors.len(), 5);
}

#[tokio::test]
async fn test_rejected_later_batch_is_partial() {
    let (base, fake) = start_fake().await;
    fake.lock().unwrap().reject_upsert_call = Some(2);
    let store = vectorize(&base, 2);
    store.provision_index(&index_spec()).await.unwrap();

    let records: Vec<VectorRecord> = (0..4)
        .map(|i| record(&format!("doc-{}", i), vec![1.0, 0.0, 0.0]))
        .collect();
    let err = store.upsert(&records).await.unwrap_err();

    assert!(matches!(err, SyncError::PartialBatch(_)), "{}", err);
    assert!(err.to_string().contains("2 of 4"), "{}", err);
}

#[tokio::test]
async fn test_rejected_first_batch_is_permanent() {
    let (base, fake) = start_fake().await;
    fake.lock().unwrap().reject_upsert_call = Some(1);
    let store = vectorize(&base, 2);
    store.provision_index(&index_spec()).await.unwrap();

    let err = store
        .upsert(&[record("doc-0", vec![1.0, 0.0, 0.0])])
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Permanent(_)), "{}", err);
}

#[tokio::test]
async fn test_query_delete_and_info() {
    let (base, _fake) = start_fake().await;
    let store = vectorize(&base, 1000);
    store.provision_index(&index_spec()).await.unwrap();
    store
        .upsert(&[
            record("near", vec![1.0, 0.1, 0.0]),
            record("far", vec![0.0, 0.0, 1.0]),
        ])
        .await
        .unwrap();

    let matches = store.query(&[1.0, 0.0, 0.0], 2).await.unwrap();
    assert_eq!(matches[0].id, "near");
    assert_eq!(matches[0].document_id(), Some("near"));

    store
        .delete_by_ids(&["far".to_string(), "never-existed".to_string()])
        .await
        .unwrap();
    let info = store.index_info().await.unwrap();
    assert_eq!(info.name, "pages-index");
    assert_eq!(info.dimensions, DIMS);
    assert_eq!(info.vector_count, 1);
}

#[tokio::test]
async fn test_query_top_k_capped_when_returning_metadata() {
    let (base, fake) = start_fake().await;
    let store = vectorize(&base, 1000);
    store.provision_index(&index_spec()).await.unwrap();
    let records: Vec<VectorRecord> = (0..25)
        .map(|i| record(&format!("doc-{:02}", i), vec![1.0, i as f32 / 25.0, 0.0]))
        .collect();
    store.upsert(&records).await.unwrap();

    // A search with limit 7 and multiplier 3 asks for 21 candidates.
    let matches = store.query(&[1.0, 0.0, 0.0], 21).await.unwrap();
    assert_eq!(matches.len(), MAX_TOP_K_WITH_METADATA);
    assert_eq!(matches[0].id, "doc-00");
    assert_eq!(
        fake.lock().unwrap().query_top_ks,
        vec![MAX_TOP_K_WITH_METADATA]
    );
}

#[tokio::test]
async fn test_missing_index_info_is_permanent() {
    let (base, _fake) = start_fake().await;
    let err = vectorize(&base, 1000).index_info().await.unwrap_err();
    assert!(matches!(err, SyncError::Permanent(_)), "{}", err);
}

// ─── Full pass over the Cloudflare adapters ─────────────────────────

#[tokio::test]
async fn test_reconcile_through_cloudflare() {
    let (base, fake) = start_fake().await;
    let store = Arc::new(vectorize(&base, 1000));
    store.provision_index(&index_spec()).await.unwrap();

    let doc = |id: &str, body: &str| Document {
        id: id.into(),
        title: format!("Page {}", id),
        body: body.into(),
        last_modified: Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap(),
        version: 3,
        metadata: BTreeMap::new(),
    };
    let source = Arc::new(InMemorySource::new(
        "pages",
        vec![doc("1", "alpha"), doc("2", "beta")],
    ));
    let reconciler = Reconciler::new(
        source.clone(),
        Arc::new(InMemoryStateStore::new()),
        orchestrator(&base),
        store.clone(),
        "cosine",
    )
    .with_guards(SyncGuards::new());

    let summary = reconciler.sync().await.unwrap();
    assert_eq!(summary.added, vec!["1", "2"]);
    {
        let fake = fake.lock().unwrap();
        let (_, meta) = &fake.vectors["1"];
        assert_eq!(meta["document_id"], "1");
        assert_eq!(meta["title"], "Page 1");
        assert_eq!(meta["content"], "Page 1\n\nalpha");
        assert_eq!(meta["version"], 3);
    }

    source.set_documents(vec![doc("1", "alpha")]);
    let calls = fake.lock().unwrap().embed_calls;
    let summary = reconciler.sync().await.unwrap();
    assert_eq!(summary.deleted, vec!["2"]);
    assert_eq!(fake.lock().unwrap().embed_calls, calls);
    assert!(!fake.lock().unwrap().vectors.contains_key("2"));
}
