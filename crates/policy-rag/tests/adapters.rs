//! HTTP adapter tests against in-process axum mocks: the OpenAI and Ollama
//! embedders, the OpenAI-compatible generator, and the Chroma index.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::header;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde_json::{json, Value};

use policy_rag::chroma::ChromaIndex;
use policy_rag::config::{ChromaConfig, EmbeddingConfig, GenerationConfig};
use policy_rag::embedding::{OllamaEmbedder, OpenAiEmbedder};
use policy_rag::generation::OpenAiGenerator;
use policy_rag_core::embedding::Embedder;
use policy_rag_core::generation::{ChatMessage, Generator};
use policy_rag_core::index::{DistanceMetric, IndexedChunk, VectorIndex};
use policy_rag_core::models::{Chunk, Document};

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Embedding of a text is `[len, first byte]`, so order is checkable.
fn fake_vector(text: &str) -> Value {
    json!([text.len() as f64, text.bytes().next().unwrap_or(0) as f64])
}

// ============ Embedders ============

#[tokio::test]
async fn test_openai_embedder_batches_and_orders_by_index() {
    std::env::set_var("OPENAI_API_KEY", "test-key");
    let calls = Arc::new(AtomicUsize::new(0));

    let app = Router::new()
        .route(
            "/v1/embeddings",
            post(
                |State(calls): State<Arc<AtomicUsize>>, Json(body): Json<Value>| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let inputs = body["input"].as_array().cloned().unwrap_or_default();
                    // Reply out of order; the adapter must sort by `index`.
                    let data: Vec<Value> = inputs
                        .iter()
                        .enumerate()
                        .rev()
                        .map(|(i, t)| json!({"index": i, "embedding": fake_vector(t.as_str().unwrap())}))
                        .collect();
                    Json(json!({ "data": data }))
                },
            ),
        )
        .with_state(calls.clone());
    let base = serve(app).await;

    let embedder = OpenAiEmbedder::new(&EmbeddingConfig {
        base_url: Some(format!("{}/v1", base)),
        batch_size: 2,
        dims: Some(2),
        ..EmbeddingConfig::default()
    })
    .unwrap();

    let texts: Vec<String> = ["a", "bb", "ccc", "dddd", "eeeee"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let vectors = embedder.embed_batch(&texts).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let lengths: Vec<f32> = vectors.iter().map(|v| v[0]).collect();
    assert_eq!(lengths, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    assert_eq!(embedder.dims(), 2);
}

#[tokio::test]
async fn test_openai_embedder_client_error_is_not_retried() {
    std::env::set_var("OPENAI_API_KEY", "test-key");
    let calls = Arc::new(AtomicUsize::new(0));

    let app = Router::new()
        .route(
            "/v1/embeddings",
            post(|State(calls): State<Arc<AtomicUsize>>| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                (axum::http::StatusCode::BAD_REQUEST, "bad input")
            }),
        )
        .with_state(calls.clone());
    let base = serve(app).await;

    let embedder = OpenAiEmbedder::new(&EmbeddingConfig {
        base_url: Some(format!("{}/v1", base)),
        ..EmbeddingConfig::default()
    })
    .unwrap();

    let err = embedder.embed("hello").await.unwrap_err();
    assert_eq!(err.kind(), policy_rag_core::ErrorKind::EmbeddingFailure);
    assert!(err.to_string().contains("400"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_ollama_embedder() {
    let app = Router::new().route(
        "/api/embed",
        post(|Json(body): Json<Value>| async move {
            let inputs = body["input"].as_array().cloned().unwrap_or_default();
            let embeddings: Vec<Value> = inputs
                .iter()
                .map(|t| fake_vector(t.as_str().unwrap()))
                .collect();
            Json(json!({ "model": body["model"], "embeddings": embeddings }))
        }),
    );
    let base = serve(app).await;

    let embedder = OllamaEmbedder::new(&EmbeddingConfig {
        provider: "ollama".into(),
        base_url: Some(base),
        ..EmbeddingConfig::default()
    })
    .unwrap();

    assert_eq!(embedder.model_name(), "nomic-embed-text");
    assert_eq!(embedder.dims(), 768);
    let vector = embedder.embed("abc").await.unwrap();
    assert_eq!(vector, vec![3.0, 97.0]);
}

// ============ Generator ============

fn generator_for(base: &str) -> OpenAiGenerator {
    OpenAiGenerator::new(&GenerationConfig {
        base_url: format!("{}/v1", base),
        ..GenerationConfig::default()
    })
    .unwrap()
}

fn messages() -> Vec<ChatMessage> {
    vec![ChatMessage::system("system"), ChatMessage::user("question")]
}

#[tokio::test]
async fn test_generator_streams_tokens() {
    std::env::set_var("OPENAI_API_KEY", "test-key");
    let app = Router::new().route(
        "/v1/chat/completions",
        post(|Json(body): Json<Value>| async move {
            assert_eq!(body["stream"], true);
            assert_eq!(body["temperature"], 0.1);
            let sse = concat!(
                "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"Per diem \"}}]}\n\n",
                ": keep-alive\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"is $75.\"}}]}\n\n",
                "data: [DONE]\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n",
            );
            ([(header::CONTENT_TYPE, "text/event-stream")], sse)
        }),
    );
    let base = serve(app).await;

    let tokens: Vec<String> = generator_for(&base)
        .stream(&messages())
        .await
        .unwrap()
        .map(|t| t.unwrap())
        .collect()
        .await;
    assert_eq!(tokens, vec!["Per diem ".to_string(), "is $75.".to_string()]);
}

#[tokio::test]
async fn test_generator_complete() {
    std::env::set_var("OPENAI_API_KEY", "test-key");
    let app = Router::new().route(
        "/v1/chat/completions",
        post(|Json(body): Json<Value>| async move {
            assert_eq!(body["stream"], false);
            assert_eq!(body["messages"][1]["content"], "question");
            Json(json!({"choices": [{"message": {"role": "assistant", "content": "Answer."}}]}))
        }),
    );
    let base = serve(app).await;

    let answer = generator_for(&base).complete(&messages()).await.unwrap();
    assert_eq!(answer, "Answer.");
}

#[tokio::test]
async fn test_generator_error_status_fails_stream_open() {
    std::env::set_var("OPENAI_API_KEY", "test-key");
    let app = Router::new().route(
        "/v1/chat/completions",
        post(|| async { (axum::http::StatusCode::TOO_MANY_REQUESTS, "slow down") }),
    );
    let base = serve(app).await;

    let err = match generator_for(&base).stream(&messages()).await {
        Ok(_) => panic!("expected stream open to fail"),
        Err(e) => e,
    };
    assert_eq!(err.kind(), policy_rag_core::ErrorKind::GenerationFailure);
}

// ============ Chroma ============

#[derive(Default)]
struct ChromaState {
    records: Vec<(String, Vec<f64>, String, Value)>,
}

type Shared = Arc<Mutex<ChromaState>>;

fn mock_chroma(state: Shared) -> Router {
    Router::new()
        .route(
            "/api/v1/collections",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["get_or_create"], true);
                assert_eq!(body["metadata"]["hnsw:space"], "l2");
                Json(json!({ "id": "col-1", "name": body["name"] }))
            }),
        )
        .route(
            "/api/v1/collections/{id}/upsert",
            post(|State(state): State<Shared>, Json(body): Json<Value>| async move {
                let mut state = state.lock().unwrap();
                let ids = body["ids"].as_array().unwrap();
                for (i, id) in ids.iter().enumerate() {
                    let id = id.as_str().unwrap().to_string();
                    state.records.retain(|r| r.0 != id);
                    let embedding = body["embeddings"][i]
                        .as_array()
                        .unwrap()
                        .iter()
                        .map(|v| v.as_f64().unwrap())
                        .collect();
                    state.records.push((
                        id,
                        embedding,
                        body["documents"][i].as_str().unwrap().to_string(),
                        body["metadatas"][i].clone(),
                    ));
                }
                Json(json!(true))
            }),
        )
        .route(
            "/api/v1/collections/{id}/query",
            post(|State(state): State<Shared>, Json(body): Json<Value>| async move {
                let state = state.lock().unwrap();
                let query: Vec<f64> = body["query_embeddings"][0]
                    .as_array()
                    .unwrap()
                    .iter()
                    .map(|v| v.as_f64().unwrap())
                    .collect();
                let mut scored: Vec<(f64, &(String, Vec<f64>, String, Value))> = state
                    .records
                    .iter()
                    .map(|r| {
                        let d: f64 = r.1.iter().zip(&query).map(|(a, b)| (a - b).powi(2)).sum();
                        (d, r)
                    })
                    .collect();
                scored.sort_by(|a, b| a.0.total_cmp(&b.0));
                scored.truncate(body["n_results"].as_u64().unwrap() as usize);
                Json(json!({
                    "ids": [scored.iter().map(|s| s.1 .0.clone()).collect::<Vec<_>>()],
                    "documents": [scored.iter().map(|s| s.1 .2.clone()).collect::<Vec<_>>()],
                    "metadatas": [scored.iter().map(|s| s.1 .3.clone()).collect::<Vec<_>>()],
                    "distances": [scored.iter().map(|s| s.0).collect::<Vec<_>>()],
                }))
            }),
        )
        .route(
            "/api/v1/collections/{id}/get",
            post(|State(state): State<Shared>, Json(body): Json<Value>| async move {
                let state = state.lock().unwrap();
                let matching: Vec<_> = state
                    .records
                    .iter()
                    .filter(|r| matches_filter(&r.3, &body["where"]))
                    .collect();
                Json(json!({
                    "ids": matching.iter().map(|r| r.0.clone()).collect::<Vec<_>>(),
                    "documents": matching.iter().map(|r| r.2.clone()).collect::<Vec<_>>(),
                    "metadatas": matching.iter().map(|r| r.3.clone()).collect::<Vec<_>>(),
                }))
            }),
        )
        .route(
            "/api/v1/collections/{id}/delete",
            post(|State(state): State<Shared>, Json(body): Json<Value>| async move {
                let mut state = state.lock().unwrap();
                let ids: Vec<String> = body["ids"]
                    .as_array()
                    .unwrap()
                    .iter()
                    .map(|v| v.as_str().unwrap().to_string())
                    .collect();
                state.records.retain(|r| !ids.contains(&r.0));
                Json(json!(ids))
            }),
        )
        .route(
            "/api/v1/collections/{id}/count",
            get(|State(state): State<Shared>| async move {
                Json(json!(state.lock().unwrap().records.len()))
            }),
        )
        .with_state(state)
}

/// The subset of Chroma's `where` language the index adapter sends:
/// equality, `$gte`, and `$and`.
fn matches_filter(metadata: &Value, filter: &Value) -> bool {
    let Some(filter) = filter.as_object() else {
        return true;
    };
    filter.iter().all(|(key, expected)| {
        if key == "$and" {
            return expected
                .as_array()
                .unwrap()
                .iter()
                .all(|f| matches_filter(metadata, f));
        }
        match expected.get("$gte") {
            Some(bound) => metadata[key].as_f64().unwrap() >= bound.as_f64().unwrap(),
            None => &metadata[key] == expected,
        }
    })
}

fn indexed(doc: &Document, index: usize, total: usize, text: &str, embedding: Vec<f32>) -> IndexedChunk {
    IndexedChunk {
        chunk: Chunk {
            id: format!("{}_{}", doc.hash, index),
            document_hash: doc.hash.clone(),
            file_name: doc.file_name.clone(),
            source_path: doc.source_path.clone(),
            chunk_index: index,
            total_chunks: total,
            text: text.to_string(),
            section_headers: Vec::new(),
            preview: text.to_string(),
        },
        embedding,
    }
}

#[tokio::test]
async fn test_chroma_index_round_trip() {
    let state: Shared = Arc::new(Mutex::new(ChromaState::default()));
    let base = serve(mock_chroma(state.clone())).await;

    let index = ChromaIndex::new(&ChromaConfig {
        url: base,
        distance: DistanceMetric::L2,
        ..ChromaConfig::default()
    })
    .unwrap();

    let leave = Document::from_bytes("leave.md", "/docs/leave.md", b"leave");
    let travel = Document::from_bytes("travel.md", "/docs/travel.md", b"travel");
    index
        .add(&[
            indexed(&leave, 0, 2, "Vacation carries over.", vec![1.0, 0.0]),
            indexed(&leave, 1, 2, "Sick leave is separate.", vec![0.8, 0.2]),
        ])
        .await
        .unwrap();
    index
        .add(&[indexed(&travel, 0, 1, "Book economy.", vec![0.0, 1.0])])
        .await
        .unwrap();

    assert_eq!(index.count().await.unwrap(), 3);
    assert_eq!(
        index.list_unique_documents().await.unwrap(),
        vec!["leave.md".to_string(), "travel.md".to_string()]
    );

    let hits = index.search_with_score(&[1.0, 0.0], 2).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].chunk.text, "Vacation carries over.");
    assert!((hits[0].score - 1.0).abs() < 1e-9);
    assert!(hits[0].score >= hits[1].score);
    assert_eq!(hits[1].chunk.total_chunks, 2);

    assert!(index.delete_by_document(&leave.hash).await.unwrap());
    assert!(!index.delete_by_document(&leave.hash).await.unwrap());
    assert_eq!(index.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_chroma_replace_document_drops_only_stale_positions() {
    let state: Shared = Arc::new(Mutex::new(ChromaState::default()));
    let base = serve(mock_chroma(state.clone())).await;
    let index = ChromaIndex::new(&ChromaConfig {
        url: base,
        distance: DistanceMetric::L2,
        ..ChromaConfig::default()
    })
    .unwrap();

    let leave = Document::from_bytes("leave.md", "/docs/leave.md", b"leave");
    let travel = Document::from_bytes("travel.md", "/docs/travel.md", b"travel");
    index
        .add(&[
            indexed(&leave, 0, 3, "Old zero.", vec![1.0, 0.0]),
            indexed(&leave, 1, 3, "Old one.", vec![1.0, 0.0]),
            indexed(&leave, 2, 3, "Old two.", vec![1.0, 0.0]),
            indexed(&travel, 0, 1, "Book economy.", vec![0.0, 1.0]),
        ])
        .await
        .unwrap();

    index
        .replace_document(
            &leave.hash,
            &[
                indexed(&leave, 0, 2, "New zero.", vec![1.0, 0.0]),
                indexed(&leave, 1, 2, "New one.", vec![0.9, 0.1]),
            ],
        )
        .await
        .unwrap();

    let chunks = index.chunks_for_file("leave.md").await.unwrap();
    let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
    assert_eq!(texts, vec!["New zero.", "New one."]);
    assert_eq!(chunks[0].total_chunks, 2);
    assert_eq!(index.count().await.unwrap(), 3);

    assert_eq!(index.clear().await.unwrap(), 3);
    assert_eq!(index.count().await.unwrap(), 0);
    assert!(index.chunks_for_file("travel.md").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_chroma_unreachable_is_index_unavailable() {
    let index = ChromaIndex::new(&ChromaConfig {
        url: "http://127.0.0.1:9".into(),
        timeout_secs: 2,
        ..ChromaConfig::default()
    })
    .unwrap();

    let err = index.count().await.unwrap_err();
    assert_eq!(err.kind(), policy_rag_core::ErrorKind::IndexUnavailable);
}
