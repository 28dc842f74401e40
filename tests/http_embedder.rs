use httpmock::prelude::*;
use serde_json::json;

use citedex::{Embedder, HttpEmbedder, PipelineError};

#[tokio::test]
async fn embed_batch_sends_bearer_auth_and_sorts_by_index() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/embeddings")
                .header("authorization", "Bearer secret-key")
                .json_body(json!({
                    "model": "test-embed",
                    "input": ["first text", "second text"],
                }));
            // Items deliberately out of order; the client must sort.
            then.status(200).json_body(json!({
                "data": [
                    { "index": 1, "embedding": [0.0, 1.0, 0.0] },
                    { "index": 0, "embedding": [1.0, 0.0, 0.0] },
                ],
            }));
        })
        .await;

    let embedder =
        HttpEmbedder::new(server.base_url(), "test-embed", 3).with_api_key("secret-key");
    let vectors = embedder
        .embed_batch(&["first text".into(), "second text".into()])
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(vectors[0], vec![1.0, 0.0, 0.0]);
    assert_eq!(vectors[1], vec![0.0, 1.0, 0.0]);
}

#[tokio::test]
async fn non_success_status_surfaces_body_in_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/embeddings");
            then.status(429).body("rate limited");
        })
        .await;

    let embedder = HttpEmbedder::new(server.base_url(), "test-embed", 3);
    let err = embedder.embed_query("anything").await.unwrap_err();
    match err {
        PipelineError::Embedding(message) => {
            assert!(message.contains("429"), "got: {message}");
            assert!(message.contains("rate limited"), "got: {message}");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn embedding_count_mismatch_is_rejected() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/embeddings");
            then.status(200).json_body(json!({
                "data": [{ "index": 0, "embedding": [1.0, 0.0, 0.0] }],
            }));
        })
        .await;

    let embedder = HttpEmbedder::new(server.base_url(), "test-embed", 3);
    let err = embedder
        .embed_batch(&["one".into(), "two".into()])
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Embedding(_)), "got {err}");
}

#[tokio::test]
async fn embedding_dimension_mismatch_is_rejected() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/embeddings");
            then.status(200).json_body(json!({
                "data": [{ "index": 0, "embedding": [1.0, 0.0] }],
            }));
        })
        .await;

    let embedder = HttpEmbedder::new(server.base_url(), "test-embed", 3);
    let err = embedder.embed_query("one").await.unwrap_err();
    match err {
        PipelineError::Embedding(message) => {
            assert!(message.contains("dimension"), "got: {message}");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn empty_batch_never_calls_the_backend() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/embeddings");
            then.status(200).json_body(json!({ "data": [] }));
        })
        .await;

    let embedder = HttpEmbedder::new(server.base_url(), "test-embed", 3);
    let vectors = embedder.embed_batch(&[]).await.unwrap();
    assert!(vectors.is_empty());
    assert_eq!(mock.hits_async().await, 0);
}
