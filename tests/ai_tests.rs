use ghost_protocol::ai::{bytes_to_embedding, cosine_similarity, embed_one, embedding_to_bytes, get_embeddings, EmbedConfig};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[test]
fn cosine_perpendicular() {
    let sim = cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]);
    assert!(sim.abs() < 1e-10);
}

#[test]
fn cosine_empty() {
    assert_eq!(cosine_similarity(&[], &[]), 0.0);
}

#[test]
fn embedding_blob_keeps_values() {
    let original: Vec<f32> = vec![1.0, -2.5, 3.125, 0.0, f32::MAX];
    assert_eq!(bytes_to_embedding(&embedding_to_bytes(&original)), original);
}

fn cfg(server: &MockServer) -> EmbedConfig {
    EmbedConfig { url: format!("{}/v1/embeddings", server.uri()), key: "sk-test".into(), model: "embed-small".into() }
}

#[tokio::test]
async fn embeddings_request_shape() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_json(json!({"model": "embed-small", "input": ["a", "b"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"embedding": [0.1, 0.2]}, {"embedding": [0.3, 0.4]}],
            "usage": {"prompt_tokens": 2, "total_tokens": 2}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = reqwest::Client::new();
    let out = get_embeddings(&client, &cfg(&server), &["a".into(), "b".into()]).await.unwrap();
    assert_eq!(out.embeddings, vec![vec![0.1f32, 0.2], vec![0.3, 0.4]]);
    assert_eq!(out.usage.unwrap().total_tokens, 2);
}

#[tokio::test]
async fn embedding_errors_are_backend_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
        .mount(&server)
        .await;
    let err = embed_one(&reqwest::Client::new(), &cfg(&server), "x").await.unwrap_err();
    assert_eq!(err.code(), "AI_BACKEND_ERROR");
    assert!(err.to_string().contains("429"));
}

#[tokio::test]
async fn count_mismatch_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .mount(&server)
        .await;
    assert!(embed_one(&reqwest::Client::new(), &cfg(&server), "x").await.is_err());
}
