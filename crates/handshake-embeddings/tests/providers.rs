use std::sync::Arc;
use std::time::Duration;

use handshake_core::HandshakeError;
use handshake_embeddings::{
    EmbeddingSource, Embeddings, FakeBackend, FakeEmbeddings, OllamaEmbeddings,
    OllamaEmbeddingsConfig, OpenAiEmbeddings, OpenAiEmbeddingsConfig, ProviderRequest,
    ProviderResponse, OPENAI_TOKEN_LIMIT,
};
use serde_json::{json, Value};

fn ok(body: Value) -> ProviderResponse {
    ProviderResponse { status: 200, body }
}

fn openai_data(vectors: &[(usize, [f32; 2])]) -> ProviderResponse {
    let data: Vec<Value> = vectors
        .iter()
        .map(|(index, v)| json!({"embedding": v, "index": index}))
        .collect();
    ok(json!({ "data": data }))
}

fn input_len(request: &ProviderRequest) -> usize {
    request.body["input"].as_array().map_or(0, Vec::len)
}

fn openai_with(backend: &Arc<FakeBackend>, batch_size: usize) -> OpenAiEmbeddings {
    OpenAiEmbeddings::with_backend(
        OpenAiEmbeddingsConfig::new("text-embedding-3-small")
            .with_api_key("test-key")
            .with_batch_size(batch_size),
        backend.clone(),
    )
    .unwrap()
}

// ---------------------------------------------------------------------------
// FakeEmbeddings
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fake_default_dimensions() {
    let emb = FakeEmbeddings::default();
    let vec = emb.embed_query("test").await.unwrap();
    assert_eq!(vec.len(), 4);
    assert_eq!(emb.dimension(), Some(4));
}

#[tokio::test]
async fn fake_deterministic_same_input() {
    let emb = FakeEmbeddings::new(16);
    let v1 = emb.embed_query("hello").await.unwrap();
    let v2 = emb.embed_query("hello").await.unwrap();
    assert_eq!(v1, v2);
}

#[tokio::test]
async fn fake_single_letters_are_distinct() {
    let emb = FakeEmbeddings::new(16);
    let vecs = emb.embed_documents(&["A", "B", "C"]).await.unwrap();
    assert_ne!(vecs[0], vecs[1]);
    assert_ne!(vecs[1], vecs[2]);
    assert_ne!(vecs[0], vecs[2]);
}

#[tokio::test]
async fn fake_embed_query_matches_embed_documents() {
    let emb = FakeEmbeddings::new(8);
    let query_vec = emb.embed_query("test input").await.unwrap();
    let batch_vecs = emb.embed_documents(&["test input"]).await.unwrap();
    assert_eq!(query_vec, batch_vecs[0]);
}

#[tokio::test]
async fn fake_vectors_are_unit_normalized() {
    let emb = FakeEmbeddings::new(8);
    let vec = emb.embed_query("normalize me").await.unwrap();
    let magnitude: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((magnitude - 1.0).abs() < 0.001, "got magnitude {magnitude}");
}

#[tokio::test]
async fn fake_empty_batch_returns_empty() {
    let emb = FakeEmbeddings::default();
    assert!(emb.embed_documents(&[]).await.unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// OpenAiEmbeddings
// ---------------------------------------------------------------------------

#[test]
fn openai_known_model_dimensions() {
    let small = OpenAiEmbeddings::new(
        OpenAiEmbeddingsConfig::new("text-embedding-3-small").with_api_key("test-key"),
    )
    .unwrap();
    assert_eq!(small.dimension(), Some(1536));

    let large = OpenAiEmbeddings::new(
        OpenAiEmbeddingsConfig::new("text-embedding-3-large").with_api_key("test-key"),
    )
    .unwrap();
    assert_eq!(large.dimension(), Some(3072));
    assert_eq!(large.model(), "text-embedding-3-large");
}

#[test]
fn openai_unknown_model_needs_dimension_and_tokenizer() {
    let result = OpenAiEmbeddings::new(
        OpenAiEmbeddingsConfig::new("my-finetune").with_api_key("test-key"),
    );
    assert!(matches!(result, Err(HandshakeError::ModelResolution(_))));

    let result = OpenAiEmbeddings::new(
        OpenAiEmbeddingsConfig::new("my-finetune")
            .with_api_key("test-key")
            .with_dimension(256),
    );
    assert!(matches!(result, Err(HandshakeError::ModelResolution(_))));

    let emb = OpenAiEmbeddings::new(
        OpenAiEmbeddingsConfig::new("my-finetune")
            .with_api_key("test-key")
            .with_dimension(256)
            .with_tokenizer("cl100k_base"),
    )
    .unwrap();
    assert_eq!(emb.dimension(), Some(256));
}

#[test]
fn openai_rejects_unknown_tokenizer() {
    let result = OpenAiEmbeddings::new(
        OpenAiEmbeddingsConfig::new("my-finetune")
            .with_api_key("test-key")
            .with_dimension(256)
            .with_tokenizer("not_an_encoding"),
    );
    assert!(matches!(result, Err(HandshakeError::ModelResolution(_))));
}

#[tokio::test]
async fn openai_request_shape() {
    let backend = Arc::new(FakeBackend::new());
    backend.push_response(openai_data(&[(0, [0.1, 0.2])]));
    let emb = openai_with(&backend, 128);

    let vector = emb.embed_query("hello").await.unwrap();
    assert_eq!(vector, vec![0.1, 0.2]);

    let requests = backend.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url, "https://api.openai.com/v1/embeddings");
    assert!(requests[0]
        .headers
        .iter()
        .any(|(k, v)| k == "Authorization" && v == "Bearer test-key"));
    assert_eq!(requests[0].body["model"], "text-embedding-3-small");
    assert_eq!(requests[0].body["input"], json!(["hello"]));
}

#[tokio::test]
async fn openai_splits_documents_into_batches() {
    let backend = Arc::new(FakeBackend::new());
    backend.push_response(openai_data(&[(0, [1.0, 0.0]), (1, [2.0, 0.0])]));
    backend.push_response(openai_data(&[(0, [3.0, 0.0]), (1, [4.0, 0.0])]));
    backend.push_response(openai_data(&[(0, [5.0, 0.0])]));
    let emb = openai_with(&backend, 2);

    let vectors = emb
        .embed_documents(&["a", "b", "c", "d", "e"])
        .await
        .unwrap();
    let firsts: Vec<f32> = vectors.iter().map(|v| v[0]).collect();
    assert_eq!(firsts, [1.0, 2.0, 3.0, 4.0, 5.0]);

    let sizes: Vec<usize> = backend.requests().iter().map(input_len).collect();
    assert_eq!(sizes, [2, 2, 1]);
}

#[tokio::test]
async fn openai_reorders_response_by_index() {
    let backend = Arc::new(FakeBackend::new());
    backend.push_response(openai_data(&[
        (2, [3.0, 0.0]),
        (0, [1.0, 0.0]),
        (1, [2.0, 0.0]),
    ]));
    let emb = openai_with(&backend, 128);

    let vectors = emb.embed_documents(&["a", "b", "c"]).await.unwrap();
    let firsts: Vec<f32> = vectors.iter().map(|v| v[0]).collect();
    assert_eq!(firsts, [1.0, 2.0, 3.0]);
}

#[tokio::test]
async fn openai_falls_back_to_single_texts_after_batch_failure() {
    let backend = Arc::new(FakeBackend::new());
    backend.push_response(ProviderResponse {
        status: 500,
        body: json!({"error": {"message": "internal server error"}}),
    });
    backend.push_response(openai_data(&[(0, [1.0, 0.0])]));
    backend.push_response(openai_data(&[(0, [2.0, 0.0])]));
    let emb = openai_with(&backend, 128);

    let vectors = emb.embed_documents(&["a", "b"]).await.unwrap();
    assert_eq!(vectors, vec![vec![1.0, 0.0], vec![2.0, 0.0]]);

    let sizes: Vec<usize> = backend.requests().iter().map(input_len).collect();
    assert_eq!(sizes, [2, 1, 1]);
}

#[tokio::test]
async fn openai_short_batch_response_triggers_fallback() {
    let backend = Arc::new(FakeBackend::new());
    backend.push_response(openai_data(&[(0, [1.0, 0.0])]));
    backend.push_response(openai_data(&[(0, [1.0, 0.0])]));
    backend.push_response(openai_data(&[(0, [2.0, 0.0])]));
    let emb = openai_with(&backend, 128);

    let vectors = emb.embed_documents(&["a", "b"]).await.unwrap();
    assert_eq!(vectors.len(), 2);
    assert_eq!(backend.requests().len(), 3);
}

#[tokio::test]
async fn openai_count_mismatch_is_an_embedding_error() {
    let backend = Arc::new(FakeBackend::new());
    backend.push_response(openai_data(&[(0, [1.0, 0.0]), (1, [2.0, 0.0])]));
    let emb = openai_with(&backend, 128);

    let err = emb.embed_query("a").await.unwrap_err();
    assert!(matches!(err, HandshakeError::Embedding(_)));
}

#[tokio::test]
async fn openai_single_text_failure_is_reported() {
    let backend = Arc::new(FakeBackend::new());
    backend.push_response(ProviderResponse {
        status: 429,
        body: json!({"error": {"message": "rate limited"}}),
    });
    let emb = openai_with(&backend, 128);

    let err = emb.embed_documents(&["only"]).await.unwrap_err();
    match err {
        HandshakeError::Embedding(msg) => assert!(msg.contains("429"), "got: {msg}"),
        other => panic!("expected Embedding error, got {other:?}"),
    }
    assert_eq!(backend.requests().len(), 1);
}

#[test]
fn openai_counts_tokens() {
    let backend = Arc::new(FakeBackend::new());
    let emb = openai_with(&backend, 128);
    assert_eq!(emb.count_tokens("hello world"), 2);
    assert_eq!(emb.count_tokens(""), 0);
    assert_eq!(emb.count_tokens_batch(&["hello world", ""]), [2, 0]);
}

#[tokio::test]
async fn openai_embeds_texts_over_the_token_limit() {
    let backend = Arc::new(FakeBackend::new());
    backend.push_response(openai_data(&[(0, [1.0, 0.0])]));
    let emb = openai_with(&backend, 128);

    let long = "hello ".repeat(OPENAI_TOKEN_LIMIT + 100);
    assert!(emb.count_tokens(&long) > OPENAI_TOKEN_LIMIT);
    assert_eq!(emb.embed_query(&long).await.unwrap(), vec![1.0, 0.0]);
}

#[test]
fn openai_similarity_is_cosine() {
    let backend = Arc::new(FakeBackend::new());
    let emb = openai_with(&backend, 128);
    assert!((emb.similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
    assert!(emb.similarity(&[1.0, 0.0], &[0.0, 3.0]).abs() < 1e-6);
    assert!((emb.similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
}

#[test]
fn openai_config_defaults() {
    let config = OpenAiEmbeddingsConfig::default();
    assert_eq!(config.model, "text-embedding-3-small");
    assert_eq!(config.base_url, "https://api.openai.com/v1");
    assert_eq!(config.batch_size, 128);
    assert_eq!(config.timeout, Duration::from_secs(60));
    assert!(config.api_key.is_none());
}

#[test]
fn openai_config_builder_chain() {
    let config = OpenAiEmbeddingsConfig::new("text-embedding-ada-002")
        .with_api_key("sk-secret")
        .with_base_url("http://localhost:8080/v1")
        .with_batch_size(0)
        .with_timeout(Duration::from_secs(5));
    assert_eq!(config.base_url, "http://localhost:8080/v1");
    assert_eq!(config.batch_size, 1);
    assert_eq!(config.timeout, Duration::from_secs(5));
}

#[test]
fn openai_config_debug_redacts_key() {
    let config = OpenAiEmbeddingsConfig::default().with_api_key("sk-secret");
    let debug = format!("{config:?}");
    assert!(!debug.contains("sk-secret"));
    assert!(debug.contains("***"));
}

#[tokio::test]
#[ignore = "requires OPENAI_API_KEY"]
async fn openai_embed_documents_integration() {
    let emb = OpenAiEmbeddings::new(OpenAiEmbeddingsConfig::default()).unwrap();
    let result = emb.embed_documents(&["Hello", "world"]).await.unwrap();
    assert_eq!(result.len(), 2);
    assert_eq!(result[0].len(), 1536);
}

// ---------------------------------------------------------------------------
// OllamaEmbeddings
// ---------------------------------------------------------------------------

#[test]
fn ollama_config_defaults() {
    let config = OllamaEmbeddingsConfig::new("nomic-embed-text");
    assert_eq!(config.base_url, "http://localhost:11434");
    assert_eq!(OllamaEmbeddings::new(config).dimension(), Some(768));
}

#[test]
fn ollama_unknown_model_has_no_dimension() {
    let emb = OllamaEmbeddings::new(OllamaEmbeddingsConfig::new("custom-model"));
    assert_eq!(emb.dimension(), None);

    let emb = OllamaEmbeddings::new(
        OllamaEmbeddingsConfig::new("custom-model")
            .with_base_url("http://ollama:11434")
            .with_dimension(512),
    );
    assert_eq!(emb.dimension(), Some(512));
}

#[tokio::test]
async fn ollama_embeds_through_backend() {
    let backend = Arc::new(FakeBackend::new());
    backend.push_response(ok(json!({"embeddings": [[0.5, 0.5], [1.0, 0.0]]})));
    let emb = OllamaEmbeddings::with_backend(
        OllamaEmbeddingsConfig::new("nomic-embed-text").with_base_url("http://ollama:11434/"),
        backend.clone(),
    );

    let vectors = emb.embed_documents(&["a", "b"]).await.unwrap();
    assert_eq!(vectors, vec![vec![0.5, 0.5], vec![1.0, 0.0]]);

    let requests = backend.requests();
    assert_eq!(requests[0].url, "http://ollama:11434/api/embed");
    assert_eq!(requests[0].body["model"], "nomic-embed-text");
    assert_eq!(requests[0].body["input"], json!(["a", "b"]));
}

#[tokio::test]
async fn ollama_missing_model_is_a_resolution_error() {
    let backend = Arc::new(FakeBackend::new());
    backend.push_response(ProviderResponse {
        status: 404,
        body: json!({"error": "model \"nope\" not found, try pulling it first"}),
    });
    let emb = OllamaEmbeddings::with_backend(OllamaEmbeddingsConfig::new("nope"), backend);

    let err = emb.embed_query("a").await.unwrap_err();
    assert!(matches!(err, HandshakeError::ModelResolution(_)));
}

#[tokio::test]
async fn ollama_server_error_is_an_embedding_error() {
    let backend = Arc::new(FakeBackend::new());
    backend.push_response(ProviderResponse {
        status: 500,
        body: json!({"error": "boom"}),
    });
    let emb = OllamaEmbeddings::with_backend(OllamaEmbeddingsConfig::new("all-minilm"), backend);

    let err = emb.embed_query("a").await.unwrap_err();
    assert!(matches!(err, HandshakeError::Embedding(_)));
}

#[tokio::test]
async fn ollama_short_response_is_an_embedding_error() {
    let backend = Arc::new(FakeBackend::new());
    backend.push_response(ok(json!({"embeddings": [[0.5, 0.5]]})));
    let emb = OllamaEmbeddings::with_backend(OllamaEmbeddingsConfig::new("all-minilm"), backend);

    let err = emb.embed_documents(&["a", "b"]).await.unwrap_err();
    assert!(matches!(err, HandshakeError::Embedding(_)));
}

// ---------------------------------------------------------------------------
// EmbeddingSource
// ---------------------------------------------------------------------------

#[test]
fn source_resolves_fake_names() {
    let emb = EmbeddingSource::from("fake").resolve().unwrap();
    assert_eq!(emb.dimension(), Some(4));

    let emb = EmbeddingSource::from("fake/32").resolve().unwrap();
    assert_eq!(emb.dimension(), Some(32));
}

#[test]
fn source_resolves_ollama_names() {
    let emb = EmbeddingSource::from("ollama/mxbai-embed-large")
        .resolve()
        .unwrap();
    assert_eq!(emb.dimension(), Some(1024));
}

#[test]
fn source_rejects_unknown_names() {
    for name in ["sentence-transformers/all-MiniLM", "bogus", "fake/abc", "ollama/", "openai/not-a-model"] {
        let result = EmbeddingSource::from(name).resolve();
        assert!(
            matches!(result, Err(HandshakeError::ModelResolution(_))),
            "{name} should not resolve"
        );
    }
}

#[test]
fn source_passes_instances_through() {
    let emb: Arc<dyn Embeddings> = Arc::new(FakeEmbeddings::new(12));
    let source = EmbeddingSource::from(Arc::clone(&emb));
    let resolved = source.resolve().unwrap();
    assert!(Arc::ptr_eq(&emb, &resolved));
    assert_eq!(format!("{source:?}"), "Instance(..)");
}
