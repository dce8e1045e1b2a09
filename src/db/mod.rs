//! SQLite-backed storage: memories (with an in-process vector index),
//! topics, chat sessions, and profiles.

mod memory;
mod profiles;
mod sessions;
mod topics;
mod vec;

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::RwLock;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use serde::{Deserialize, Serialize};

pub use crate::util::now_ms;
pub use profiles::{ApprovalStatus, Profile, Role};
pub use sessions::ChatSession;
pub use topics::{Topic, TopicInput, TopicNode, TopicPatch};
pub use vec::embed_text;

use crate::error::GhostError;

/// Set busy_timeout on every connection handed out by the pool so
/// concurrent writers wait instead of failing with SQLITE_BUSY.
#[derive(Debug)]
struct BusyTimeoutCustomizer;
impl r2d2::CustomizeConnection<rusqlite::Connection, rusqlite::Error> for BusyTimeoutCustomizer {
    fn on_acquire(&self, conn: &mut rusqlite::Connection) -> Result<(), rusqlite::Error> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(())
    }
}

type PooledConn = r2d2::PooledConnection<SqliteConnectionManager>;

pub const DEFAULT_PROJECT: &str = "default";

const MAX_CONTENT_LEN: usize = 32_768;
const MAX_TITLE_LEN: usize = 200;
const MAX_SUMMARY_LEN: usize = 2_000;
const MAX_TAGS: usize = 20;
const MAX_TAG_LEN: usize = 32;
const MAX_PROJECT_REF_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    Conversation,
    Knowledge,
    Project,
    Context,
    Reference,
}

impl MemoryType {
    pub const ALL: [MemoryType; 5] = [
        MemoryType::Conversation,
        MemoryType::Knowledge,
        MemoryType::Project,
        MemoryType::Context,
        MemoryType::Reference,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MemoryType::Conversation => "conversation",
            MemoryType::Knowledge => "knowledge",
            MemoryType::Project => "project",
            MemoryType::Context => "context",
            MemoryType::Reference => "reference",
        }
    }
}

impl FromStr for MemoryType {
    type Err = GhostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MemoryType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| GhostError::InvalidMemoryType(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryStatus {
    Active,
    Deleted,
}

impl MemoryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MemoryStatus::Active => "active",
            MemoryStatus::Deleted => "deleted",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    pub title: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub memory_type: MemoryType,
    pub tags: Vec<String>,
    pub relevance_score: f64,
    pub access_count: i64,
    pub project_ref: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<String>,
    pub status: MemoryStatus,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_accessed: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<i64>,
    pub has_embedding: bool,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct MemoryInput {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub memory_type: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub relevance_score: Option<f64>,
    #[serde(default)]
    pub topic_id: Option<String>,
    /// Tenant namespace. Usually filled from the X-Tenant header.
    #[serde(default)]
    pub project_ref: Option<String>,
    /// Wait for the embedding before returning (default: background).
    #[serde(default)]
    pub sync_embed: Option<bool>,
}

impl MemoryInput {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn title(mut self, t: impl Into<String>) -> Self {
        self.title = Some(t.into());
        self
    }

    pub fn summary(mut self, s: impl Into<String>) -> Self {
        self.summary = Some(s.into());
        self
    }

    pub fn memory_type(mut self, t: MemoryType) -> Self {
        self.memory_type = Some(t.as_str().to_string());
        self
    }

    pub fn tags(mut self, t: Vec<String>) -> Self {
        self.tags = Some(t);
        self
    }

    pub fn relevance(mut self, r: f64) -> Self {
        self.relevance_score = Some(r);
        self
    }

    pub fn topic(mut self, id: impl Into<String>) -> Self {
        self.topic_id = Some(id.into());
        self
    }

    pub fn project(mut self, p: impl Into<String>) -> Self {
        self.project_ref = Some(p.into());
        self
    }
}

/// Partial update. `topic_id: Some("")` detaches the memory from its topic.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct MemoryPatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub summary: Option<String>,
    pub memory_type: Option<String>,
    pub tags: Option<Vec<String>>,
    pub relevance_score: Option<f64>,
    pub topic_id: Option<String>,
}

/// A memory returned by similarity or keyword search.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryMatch {
    #[serde(flatten)]
    pub memory: Memory,
    pub similarity: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub memory_type: Option<MemoryType>,
    pub tag: Option<String>,
    pub topic_id: Option<String>,
    pub include_deleted: bool,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Default, Serialize)]
pub struct TypeStats {
    pub total: usize,
    pub deleted: usize,
    pub embedded: usize,
    pub by_type: HashMap<String, usize>,
}

#[derive(Debug, Serialize)]
pub struct TenantStats {
    pub project_ref: String,
    pub memories: TypeStats,
    pub topics: usize,
    pub sessions: usize,
    pub total_access: i64,
    pub avg_relevance: f64,
    pub last_memory_at: Option<i64>,
}

pub(crate) fn validate_project_ref(p: &str) -> Result<(), GhostError> {
    if p.is_empty() || p.len() > MAX_PROJECT_REF_LEN {
        return Err(GhostError::Validation(format!(
            "project_ref must be 1-{MAX_PROJECT_REF_LEN} chars"
        )));
    }
    if !p.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.') {
        return Err(GhostError::Validation("project_ref contains invalid characters".into()));
    }
    Ok(())
}

fn validate_tags(tags: &[String]) -> Result<(), GhostError> {
    if tags.len() > MAX_TAGS {
        return Err(GhostError::Validation(format!("too many tags (max {MAX_TAGS})")));
    }
    if let Some(t) = tags.iter().find(|t| t.chars().count() > MAX_TAG_LEN) {
        return Err(GhostError::Validation(format!("tag '{t}' too long (max {MAX_TAG_LEN})")));
    }
    Ok(())
}

fn validate_content(content: &str) -> Result<(), GhostError> {
    if content.trim().is_empty() {
        return Err(GhostError::EmptyContent);
    }
    if content.chars().count() > MAX_CONTENT_LEN {
        return Err(GhostError::ContentTooLong);
    }
    Ok(())
}

fn validate_input(input: &MemoryInput) -> Result<(), GhostError> {
    validate_content(&input.content)?;
    if let Some(ref t) = input.title {
        if t.chars().count() > MAX_TITLE_LEN {
            return Err(GhostError::Validation(format!("title too long (max {MAX_TITLE_LEN})")));
        }
    }
    if let Some(ref s) = input.summary {
        if s.chars().count() > MAX_SUMMARY_LEN {
            return Err(GhostError::Validation(format!("summary too long (max {MAX_SUMMARY_LEN})")));
        }
    }
    if let Some(ref t) = input.memory_type {
        MemoryType::from_str(t)?;
    }
    if let Some(ref tags) = input.tags {
        validate_tags(tags)?;
    }
    if let Some(r) = input.relevance_score {
        if !(0.0..=1.0).contains(&r) {
            return Err(GhostError::Validation("relevance_score must be within 0.0-1.0".into()));
        }
    }
    if let Some(ref p) = input.project_ref {
        validate_project_ref(p)?;
    }
    Ok(())
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS memories (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    summary TEXT,
    memory_type TEXT NOT NULL DEFAULT 'knowledge',
    tags TEXT NOT NULL DEFAULT '[]',
    embedding BLOB,
    relevance_score REAL NOT NULL DEFAULT 0.5,
    access_count INTEGER NOT NULL DEFAULT 0,
    project_ref TEXT NOT NULL DEFAULT 'default',
    topic_id TEXT,
    status TEXT NOT NULL DEFAULT 'active',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    last_accessed INTEGER NOT NULL,
    deleted_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_memories_project ON memories(project_ref, status);
CREATE INDEX IF NOT EXISTS idx_memories_type ON memories(memory_type);
CREATE INDEX IF NOT EXISTS idx_memories_topic ON memories(topic_id);
CREATE INDEX IF NOT EXISTS idx_memories_deleted ON memories(deleted_at);

CREATE TABLE IF NOT EXISTS memory_topics (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    color TEXT,
    icon TEXT,
    parent_id TEXT,
    project_ref TEXT NOT NULL DEFAULT 'default',
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_topics_project ON memory_topics(project_ref);

CREATE TABLE IF NOT EXISTS chat_sessions (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    project_ref TEXT NOT NULL DEFAULT 'default',
    messages TEXT NOT NULL DEFAULT '[]',
    model TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sessions_user ON chat_sessions(user_id, updated_at);

CREATE TABLE IF NOT EXISTS profiles (
    user_id TEXT PRIMARY KEY,
    email TEXT,
    role TEXT NOT NULL DEFAULT 'user',
    status TEXT NOT NULL DEFAULT 'pending',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
"#;

/// One entry of the in-memory vector index. Tenant and type are kept next
/// to the vector so filtered searches never touch SQLite.
#[derive(Debug, Clone)]
struct IndexedVec {
    project_ref: String,
    memory_type: MemoryType,
    embedding: Vec<f32>,
}

/// SQLite-backed store.
pub struct MemoryDB {
    pool: Pool<SqliteConnectionManager>,
    vec_index: RwLock<HashMap<String, IndexedVec>>,
}

impl MemoryDB {
    fn conn(&self) -> Result<PooledConn, GhostError> {
        self.pool.get().map_err(|e| GhostError::Internal(format!("pool: {e}")))
    }

    /// Open (or create) a database at the given path. `:memory:` gives each
    /// call its own shared-cache in-memory database.
    pub fn open(path: &str) -> Result<Self, GhostError> {
        let pool_size = if path == ":memory:" { 2 } else { 8 };
        let manager = if path == ":memory:" {
            let name = uuid::Uuid::new_v4().to_string();
            SqliteConnectionManager::file(format!("file:{name}?mode=memory&cache=shared"))
        } else {
            SqliteConnectionManager::file(path)
        };
        let pool = Pool::builder()
            .max_size(pool_size)
            .connection_customizer(Box::new(BusyTimeoutCustomizer))
            .build(manager)
            .map_err(|e| GhostError::Internal(format!("pool: {e}")))?;

        let conn = pool.get().map_err(|e| GhostError::Internal(e.to_string()))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;
        drop(conn);

        let db = Self { pool, vec_index: RwLock::new(HashMap::new()) };
        db.load_vec_index();
        Ok(db)
    }

    /// Database file size in bytes.
    pub fn db_size_bytes(&self) -> i64 {
        self.conn()
            .and_then(|c| {
                c.query_row(
                    "SELECT page_count * page_size FROM pragma_page_count, pragma_page_size",
                    [],
                    |r| r.get(0),
                )
                .map_err(GhostError::from)
            })
            .unwrap_or(0)
    }

    /// Aggregate numbers for one tenant.
    pub fn tenant_stats(&self, project_ref: &str) -> Result<TenantStats, GhostError> {
        let memories = self.type_stats(project_ref)?;
        let conn = self.conn()?;
        let topics: i64 = conn.query_row(
            "SELECT COUNT(*) FROM memory_topics WHERE project_ref = ?1",
            [project_ref],
            |r| r.get(0),
        )?;
        let sessions: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chat_sessions WHERE project_ref = ?1",
            [project_ref],
            |r| r.get(0),
        )?;
        let (total_access, avg_relevance, last_memory_at): (i64, f64, Option<i64>) = conn.query_row(
            "SELECT COALESCE(SUM(access_count), 0), COALESCE(AVG(relevance_score), 0.0), MAX(created_at) \
             FROM memories WHERE project_ref = ?1 AND status = 'active'",
            [project_ref],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )?;
        Ok(TenantStats {
            project_ref: project_ref.to_string(),
            memories,
            topics: topics as usize,
            sessions: sessions as usize,
            total_access,
            avg_relevance,
            last_memory_at,
        })
    }
}

const MEMORY_COLS: &str = "id, title, content, summary, memory_type, tags, relevance_score, \
    access_count, project_ref, topic_id, status, created_at, updated_at, last_accessed, \
    deleted_at, embedding IS NOT NULL AS has_embedding";

fn row_to_memory(row: &rusqlite::Row) -> rusqlite::Result<Memory> {
    let tags_str: String = row.get("tags")?;
    let type_str: String = row.get("memory_type")?;
    let status_str: String = row.get("status")?;
    Ok(Memory {
        id: row.get("id")?,
        title: row.get("title")?,
        content: row.get("content")?,
        summary: row.get("summary")?,
        memory_type: type_str.parse().unwrap_or(MemoryType::Knowledge),
        tags: serde_json::from_str(&tags_str).unwrap_or_default(),
        relevance_score: row.get("relevance_score")?,
        access_count: row.get("access_count")?,
        project_ref: row.get("project_ref")?,
        topic_id: row.get("topic_id")?,
        status: if status_str == "deleted" { MemoryStatus::Deleted } else { MemoryStatus::Active },
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        last_accessed: row.get("last_accessed")?,
        deleted_at: row.get("deleted_at")?,
        has_embedding: row.get("has_embedding")?,
    })
}
