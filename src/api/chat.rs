//! Chat turn and session handlers.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use super::{ensure_approved, ok, ok_meta, Caller, Envelope};
use crate::chat::{self, ChatOutcome, ChatRequest};
use crate::db::ChatSession;
use crate::error::{ApiError, GhostError, OrCode};
use crate::providers::ChatMessage;
use crate::{db_call, AppState};

const MAX_SESSION_MESSAGES: usize = 1_000;

/// POST /chat
pub(super) async fn do_chat(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<ChatRequest>,
) -> Result<Json<Envelope<ChatOutcome>>, ApiError> {
    ensure_approved(&state, &caller).await?;
    let outcome = chat::run(&state, &caller.tenant, caller.user(), req)
        .await
        .or_code("CHAT_FAILED")?;
    let meta = json!({
        "model": outcome.model,
        "rounds": outcome.rounds,
        "tokens": outcome.usage.total_tokens,
    });
    Ok(ok_meta(outcome, meta))
}

#[derive(Debug, Deserialize)]
pub(super) struct SessionsQuery {
    limit: Option<usize>,
}

/// GET /sessions
pub(super) async fn list_sessions(
    State(state): State<AppState>,
    caller: Caller,
    Query(q): Query<SessionsQuery>,
) -> Result<Json<Envelope<Vec<ChatSession>>>, ApiError> {
    let limit = q.limit.unwrap_or(50).clamp(1, 200);
    let (user, tenant) = (caller.user().to_string(), caller.tenant);
    let sessions = db_call(&state.db, move |db| db.list_sessions(&user, &tenant, limit)).await??;
    Ok(ok(sessions))
}

/// GET /sessions/{id}
pub(super) async fn get_session(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<Envelope<ChatSession>>, ApiError> {
    let (user, tenant) = (caller.user().to_string(), caller.tenant);
    let session = db_call(&state.db, move |db| db.get_session(&id, &user, &tenant))
        .await??
        .ok_or(GhostError::NotFound)?;
    Ok(ok(session))
}

#[derive(Debug, Deserialize)]
pub(super) struct SessionBody {
    messages: Vec<ChatMessage>,
    #[serde(default)]
    model: Option<String>,
}

/// PUT /sessions/{id}. Replaces the whole message list.
pub(super) async fn put_session(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    Json(body): Json<SessionBody>,
) -> Result<Json<Envelope<ChatSession>>, ApiError> {
    if body.messages.len() > MAX_SESSION_MESSAGES {
        return Err(GhostError::Validation(format!("too many messages (max {MAX_SESSION_MESSAGES})")).into());
    }
    let (user, tenant) = (caller.user().to_string(), caller.tenant);
    let session = db_call(&state.db, move |db| {
        db.upsert_session(&id, &user, &tenant, &body.messages, body.model.as_deref())
    })
    .await
    .and_then(|r| r)
    .or_code("SESSION_SAVE_FAILED")?;
    Ok(ok(session))
}

/// DELETE /sessions/{id}
pub(super) async fn delete_session(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<Envelope<serde_json::Value>>, ApiError> {
    let (user, tenant) = (caller.user().to_string(), caller.tenant);
    let sid = id.clone();
    if !db_call(&state.db, move |db| db.delete_session(&sid, &user, &tenant)).await?? {
        return Err(GhostError::NotFound.into());
    }
    Ok(ok(json!({ "id": id, "deleted": true })))
}
