//! Embedding client (OpenAI-compatible `/embeddings`) and vector helpers.
//! Chat completions live in `providers`.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::GhostError;

fn ai_err(msg: impl Into<String>) -> GhostError {
    GhostError::AiBackend(msg.into())
}

const DEFAULT_EMBED_URL: &str = "https://api.openai.com/v1/embeddings";

#[derive(Clone, Debug)]
pub struct EmbedConfig {
    pub url: String,
    pub key: String,
    pub model: String,
}

impl EmbedConfig {
    /// Returns `None` when neither `GHOST_EMBED_KEY` nor `OPENAI_API_KEY` is
    /// set and no custom `GHOST_EMBED_URL` points at a keyless server.
    pub fn from_env() -> Option<Self> {
        let key = std::env::var("GHOST_EMBED_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .unwrap_or_default();
        let url = std::env::var("GHOST_EMBED_URL").ok();
        if key.is_empty() && url.is_none() {
            return None;
        }
        Some(Self {
            url: url.unwrap_or_else(|| DEFAULT_EMBED_URL.into()),
            key,
            model: std::env::var("GHOST_EMBED_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".into()),
        })
    }
}

#[derive(Deserialize, Debug, Clone, Default, Serialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

pub struct EmbedResult {
    pub embeddings: Vec<Vec<f32>>,
    pub usage: Option<Usage>,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedData>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct EmbedData {
    embedding: Vec<f32>,
}

/// Generate embeddings for one or more texts.
pub async fn get_embeddings(
    client: &reqwest::Client,
    cfg: &EmbedConfig,
    texts: &[String],
) -> Result<EmbedResult, GhostError> {
    if texts.is_empty() {
        return Ok(EmbedResult { embeddings: vec![], usage: None });
    }

    let req = EmbedRequest { model: &cfg.model, input: texts };
    let mut builder = client.post(&cfg.url).json(&req);
    if !cfg.key.is_empty() {
        builder = builder.header("Authorization", format!("Bearer {}", cfg.key));
    }

    let resp = builder
        .send()
        .await
        .map_err(|e| ai_err(format!("embedding request failed: {e}")))?;
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(ai_err(format!("embedding API returned {status}: {body}")));
    }

    let embed_resp: EmbedResponse = resp
        .json()
        .await
        .map_err(|e| ai_err(format!("embedding response parse failed: {e}")))?;

    let embeddings: Vec<Vec<f32>> = embed_resp.data.into_iter().map(|d| d.embedding).collect();
    if embeddings.len() != texts.len() {
        return Err(ai_err(format!(
            "embedding count mismatch: sent {} texts, got {} embeddings",
            texts.len(),
            embeddings.len()
        )));
    }
    debug!(count = embeddings.len(), model = %cfg.model, "embedded texts");
    Ok(EmbedResult { embeddings, usage: embed_resp.usage })
}

/// Embed a single text, returning its vector.
pub async fn embed_one(
    client: &reqwest::Client,
    cfg: &EmbedConfig,
    text: &str,
) -> Result<Vec<f32>, GhostError> {
    get_embeddings(client, cfg, &[text.to_string()])
        .await?
        .embeddings
        .into_iter()
        .next()
        .ok_or_else(|| ai_err("empty embedding response"))
}

/// Cosine similarity between two vectors. Mismatched or zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut na, mut nb) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    let denom = na.sqrt() * nb.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

/// Serialize an f32 vector to little-endian bytes for BLOB storage.
pub fn embedding_to_bytes(v: &[f32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(v.len() * 4);
    for &f in v {
        buf.extend_from_slice(&f.to_le_bytes());
    }
    buf
}

/// Inverse of `embedding_to_bytes`. Trailing bytes that don't form a full
/// f32 are ignored.
pub fn bytes_to_embedding(b: &[u8]) -> Vec<f32> {
    b.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
