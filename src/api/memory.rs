//! Memory CRUD and search handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use super::{created, ok, ok_meta, Caller, Envelope};
use crate::chat::{self, RetrievalMode};
use crate::db::{self, embed_text, ListFilter, Memory, MemoryInput, MemoryMatch, MemoryPatch, MemoryType, TypeStats};
use crate::error::{ApiError, GhostError, OrCode};
use crate::{ai, db_call, spawn_embed, AppState};

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 200;
const DEFAULT_SEARCH_LIMIT: usize = 10;
const MAX_SEARCH_LIMIT: usize = 50;

fn parse_type(raw: Option<&str>) -> Result<Option<MemoryType>, GhostError> {
    raw.filter(|s| !s.trim().is_empty()).map(str::parse).transpose()
}

/// Embed a freshly written memory. With `sync` the vector is stored before
/// the response goes out; otherwise it happens in the background.
async fn embed_memory(state: &AppState, mem: &Memory, sync: bool) -> bool {
    let Some(cfg) = state.embed.as_ref() else { return false };
    let text = embed_text(&mem.title, &mem.content);
    if !sync {
        spawn_embed(state, mem.id.clone(), text);
        return false;
    }
    match ai::embed_one(&state.http, cfg, &text).await {
        Ok(emb) => {
            let id = mem.id.clone();
            match db_call(&state.db, move |db| db.set_embedding(&id, &emb)).await {
                Ok(Ok(())) => true,
                Ok(Err(e)) | Err(e) => {
                    warn!(error = %e, "storing embedding failed");
                    false
                }
            }
        }
        Err(e) => {
            warn!(error = %e, "sync embedding failed");
            false
        }
    }
}

/// POST /memories
pub(super) async fn create_memory(
    State(state): State<AppState>,
    caller: Caller,
    Json(mut input): Json<MemoryInput>,
) -> Result<(StatusCode, Json<Envelope<Memory>>), ApiError> {
    input.project_ref = Some(caller.tenant.clone());
    let sync = input.sync_embed.unwrap_or(false);
    let mut mem = db_call(&state.db, move |db| db.insert(input))
        .await
        .and_then(|r| r)
        .or_code("MEMORY_CREATE_FAILED")?;

    if embed_memory(&state, &mem, sync).await {
        mem.has_embedding = true;
    }
    info!(id = %mem.id, tenant = %caller.tenant, memory_type = mem.memory_type.as_str(), "memory created");
    Ok(created(mem))
}

#[derive(Debug, Deserialize)]
pub(super) struct ListQuery {
    #[serde(rename = "type")]
    memory_type: Option<String>,
    tag: Option<String>,
    topic_id: Option<String>,
    #[serde(default)]
    include_deleted: bool,
    limit: Option<usize>,
    offset: Option<usize>,
}

/// GET /memories
pub(super) async fn list_memories(
    State(state): State<AppState>,
    caller: Caller,
    Query(q): Query<ListQuery>,
) -> Result<Json<Envelope<Vec<Memory>>>, ApiError> {
    let filter = ListFilter {
        memory_type: parse_type(q.memory_type.as_deref())?,
        tag: q.tag.filter(|t| !t.is_empty()),
        topic_id: q.topic_id.filter(|t| !t.is_empty()),
        include_deleted: q.include_deleted,
        limit: q.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT),
        offset: q.offset.unwrap_or(0),
    };
    let (limit, offset) = (filter.limit, filter.offset);
    let tenant = caller.tenant;
    let mems = db_call(&state.db, move |db| db.list_filtered(&tenant, &filter)).await??;
    let count = mems.len();
    Ok(ok_meta(mems, json!({ "count": count, "limit": limit, "offset": offset })))
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct GetQuery {
    #[serde(default)]
    include_deleted: bool,
}

/// GET /memories/{id}. Reading a memory counts as an access.
pub(super) async fn get_memory(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    Query(q): Query<GetQuery>,
) -> Result<Json<Envelope<Memory>>, ApiError> {
    let tenant = caller.tenant;
    let mem = db_call(&state.db, move |db| -> Result<Option<Memory>, GhostError> {
        let Some(m) = db.get(&id, &tenant)? else { return Ok(None) };
        if m.status == db::MemoryStatus::Deleted {
            return Ok(q.include_deleted.then_some(m));
        }
        db.touch(std::slice::from_ref(&m.id))?;
        db.get(&id, &tenant)
    })
    .await??
    .ok_or(GhostError::NotFound)?;
    Ok(ok(mem))
}

/// PATCH /memories/{id}
pub(super) async fn update_memory(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    Json(patch): Json<MemoryPatch>,
) -> Result<Json<Envelope<Memory>>, ApiError> {
    let content_changed = patch.content.is_some() || patch.title.is_some();
    let tenant = caller.tenant;
    let mem = db_call(&state.db, move |db| db.update(&id, &tenant, &patch))
        .await
        .and_then(|r| r)
        .or_code("MEMORY_UPDATE_FAILED")?
        .ok_or(GhostError::NotFound)?;

    // Title is part of the embedded text; a content change already dropped
    // the old vector.
    if content_changed {
        embed_memory(&state, &mem, false).await;
    }
    Ok(ok(mem))
}

/// DELETE /memories/{id} (soft delete)
pub(super) async fn delete_memory(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<Envelope<serde_json::Value>>, ApiError> {
    let tenant = caller.tenant;
    let mid = id.clone();
    let deleted = db_call(&state.db, move |db| db.soft_delete(&mid, &tenant))
        .await
        .and_then(|r| r)
        .or_code("MEMORY_DELETE_FAILED")?;
    if !deleted {
        return Err(GhostError::NotFound.into());
    }
    info!(%id, "memory soft-deleted");
    Ok(ok(json!({ "id": id, "deleted": true })))
}

/// POST /memories/{id}/restore
pub(super) async fn restore_memory(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<Envelope<Memory>>, ApiError> {
    let tenant = caller.tenant;
    let mem = db_call(&state.db, move |db| db.restore(&id, &tenant))
        .await??
        .ok_or(GhostError::NotFound)?;
    Ok(ok(mem))
}

#[derive(Debug, Deserialize)]
pub(super) struct SearchBody {
    query: String,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    threshold: Option<f64>,
    #[serde(default)]
    memory_type: Option<String>,
}

/// POST /memories/search
pub(super) async fn search_memories(
    State(state): State<AppState>,
    caller: Caller,
    Json(body): Json<SearchBody>,
) -> Result<Json<Envelope<Vec<MemoryMatch>>>, ApiError> {
    let query = body.query.trim();
    if query.is_empty() {
        return Err(GhostError::EmptyQuery.into());
    }
    let k = body.limit.unwrap_or(DEFAULT_SEARCH_LIMIT).clamp(1, MAX_SEARCH_LIMIT);
    let threshold = body.threshold.unwrap_or(chat::SIMILARITY_THRESHOLD).clamp(-1.0, 1.0);
    let memory_type = parse_type(body.memory_type.as_deref())?;

    let found = chat::retrieve(&state, &caller.tenant, query, k, threshold, memory_type)
        .await
        .or_code("MEMORY_SEARCH_FAILED")?;
    let count = found.matches.len();
    let meta = match found.mode {
        RetrievalMode::Semantic => json!({ "mode": found.mode, "count": count, "threshold": threshold }),
        RetrievalMode::Keyword => json!({ "mode": found.mode, "count": count }),
    };
    Ok(ok_meta(found.matches, meta))
}

/// GET /memories/stats
pub(super) async fn memory_stats(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<Envelope<TypeStats>>, ApiError> {
    let tenant = caller.tenant;
    let stats = db_call(&state.db, move |db| db.type_stats(&tenant)).await??;
    Ok(ok(stats))
}
