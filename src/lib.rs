pub mod ai;
pub mod api;
pub mod chat;
pub mod db;
pub mod error;
pub mod prompts;
pub mod providers;
pub mod tools;
pub mod util;

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;

use crate::error::GhostError;

pub type SharedDB = Arc<db::MemoryDB>;

const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Run a blocking DB operation on tokio's blocking thread pool.
///
/// All synchronous MemoryDB calls in async context MUST go through this
/// to avoid starving tokio worker threads.
pub async fn db_call<F, T>(db: &SharedDB, f: F) -> Result<T, GhostError>
where
    F: FnOnce(&db::MemoryDB) -> T + Send + 'static,
    T: Send + 'static,
{
    let db = Arc::clone(db);
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| GhostError::Internal(e.to_string()))
}

#[derive(Clone)]
pub struct AppState {
    pub db: SharedDB,
    pub llm: Option<providers::LlmConfig>,
    pub embed: Option<ai::EmbedConfig>,
    pub tools: tools::ToolsConfig,
    pub http: reqwest::Client,
    pub api_key: Option<String>,
    /// Chat and tool execution require an approved profile.
    pub require_approval: bool,
    pub embed_cache: EmbedCache,
    pub tracker: tools::ExecutionTracker,
    pub started_at: std::time::Instant,
}

impl AppState {
    /// Bare state around a database: no providers, no embeddings, no tools,
    /// no auth.
    pub fn new(db: db::MemoryDB) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            db: Arc::new(db),
            llm: None,
            embed: None,
            tools: tools::ToolsConfig::default(),
            http,
            api_key: None,
            require_approval: false,
            embed_cache: EmbedCache::new(256),
            tracker: tools::ExecutionTracker::new(1024, Duration::from_secs(600)),
            started_at: std::time::Instant::now(),
        }
    }

    /// Everything configured from the environment.
    pub fn from_env(db: db::MemoryDB) -> Self {
        let mut state = Self::new(db);
        state.llm = providers::LlmConfig::from_env();
        state.embed = ai::EmbedConfig::from_env();
        state.tools = tools::ToolsConfig::from_env();
        state.api_key = std::env::var("GHOST_API_KEY").ok().filter(|k| !k.is_empty());
        state.require_approval = std::env::var("GHOST_REQUIRE_APPROVAL")
            .map(|v| matches!(v.trim(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false);
        state
    }

    pub fn with_llm(mut self, llm: providers::LlmConfig) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_embed(mut self, embed: ai::EmbedConfig) -> Self {
        self.embed = Some(embed);
        self
    }

    pub fn with_tools(mut self, tools: tools::ToolsConfig) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_approval(mut self, required: bool) -> Self {
        self.require_approval = required;
        self
    }

    /// Embed a query, served from the LRU when the same text was seen
    /// recently.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, GhostError> {
        let cfg = self.embed.as_ref().ok_or(GhostError::AiNotConfigured)?;
        if let Some(v) = self.embed_cache.get(text) {
            return Ok(v);
        }
        let v = ai::embed_one(&self.http, cfg, text).await?;
        self.embed_cache.insert(text.to_string(), v.clone());
        Ok(v)
    }
}

/// Embed a stored memory in the background, retrying transient failures
/// with linear backoff. No-op without an embedding backend.
pub fn spawn_embed(state: &AppState, id: String, text: String) {
    let Some(cfg) = state.embed.clone() else { return };
    let db = state.db.clone();
    let http = state.http.clone();
    tokio::spawn(async move {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match ai::embed_one(&http, &cfg, &text).await {
                Ok(emb) => {
                    if let Ok(Err(e)) = db_call(&db, move |db| db.set_embedding(&id, &emb)).await {
                        tracing::warn!(error = %e, "storing embedding failed");
                    }
                    return;
                }
                Err(e) if attempts < 3 => {
                    tracing::warn!(error = %e, attempt = attempts, "embedding failed, retrying");
                    tokio::time::sleep(Duration::from_secs(attempts * 2)).await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, id = %id, "embedding failed after 3 attempts");
                    return;
                }
            }
        }
    });
}

/// Embed active memories that have no vector yet (e.g. stored while the
/// embedding backend was down). Returns how many were embedded.
pub async fn embed_backfill(state: &AppState, batch: usize) -> Result<usize, GhostError> {
    let Some(cfg) = state.embed.as_ref() else { return Ok(0) };
    let items = db_call(&state.db, move |db| db.list_missing_embeddings(batch)).await??;
    if items.is_empty() {
        return Ok(0);
    }
    let texts: Vec<String> = items.iter().map(|(_, t)| t.clone()).collect();
    let er = ai::get_embeddings(&state.http, cfg, &texts).await?;
    let pairs: Vec<(String, Vec<f32>)> = items.into_iter().map(|(id, _)| id).zip(er.embeddings).collect();
    let n = pairs.len();
    db_call(&state.db, move |db| {
        for (id, emb) in pairs {
            db.set_embedding(&id, &emb)?;
        }
        Ok::<_, GhostError>(())
    })
    .await??;
    Ok(n)
}

/// Small LRU cache for query embeddings to avoid repeated API calls.
#[derive(Clone)]
pub struct EmbedCache {
    inner: Arc<parking_lot::Mutex<EmbedCacheInner>>,
}

struct EmbedCacheInner {
    cache: LruCache<String, Vec<f32>>,
    hits: u64,
    misses: u64,
}

impl EmbedCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(parking_lot::Mutex::new(EmbedCacheInner {
                cache: LruCache::new(cap),
                hits: 0,
                misses: 0,
            })),
        }
    }

    pub fn get(&self, key: &str) -> Option<Vec<f32>> {
        let mut inner = self.inner.lock();
        let val = inner.cache.get(key).cloned();
        if val.is_some() {
            inner.hits += 1;
        } else {
            inner.misses += 1;
        }
        val
    }

    pub fn insert(&self, key: String, value: Vec<f32>) {
        self.inner.lock().cache.put(key, value);
    }

    /// (len, capacity, hits, misses)
    pub fn stats(&self) -> (usize, usize, u64, u64) {
        let inner = self.inner.lock();
        (inner.cache.len(), inner.cache.cap().get(), inner.hits, inner.misses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embed_cache_evicts_oldest() {
        let c = EmbedCache::new(2);
        c.insert("a".into(), vec![1.0]);
        c.insert("b".into(), vec![2.0]);
        assert!(c.get("a").is_some());
        c.insert("c".into(), vec![3.0]);
        assert!(c.get("b").is_none());
        assert_eq!(c.get("a"), Some(vec![1.0]));
        let (len, cap, hits, misses) = c.stats();
        assert_eq!((len, cap, hits, misses), (2, 2, 2, 1));
    }

    #[test]
    fn zero_capacity_still_caches() {
        let c = EmbedCache::new(0);
        c.insert("x".into(), vec![0.5]);
        assert_eq!(c.get("x"), Some(vec![0.5]));
    }
}
