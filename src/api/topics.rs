use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use super::{created, ok, Caller, Envelope};
use crate::db::{Topic, TopicInput, TopicNode, TopicPatch};
use crate::error::{ApiError, GhostError, OrCode};
use crate::{db_call, AppState};

pub(super) async fn create_topic(
    State(state): State<AppState>,
    caller: Caller,
    Json(input): Json<TopicInput>,
) -> Result<(StatusCode, Json<Envelope<Topic>>), ApiError> {
    let tenant = caller.tenant;
    let topic = db_call(&state.db, move |db| db.create_topic(&tenant, input))
        .await
        .and_then(|r| r)
        .or_code("TOPIC_CREATE_FAILED")?;
    Ok(created(topic))
}

pub(super) async fn list_topics(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<Envelope<Vec<Topic>>>, ApiError> {
    let tenant = caller.tenant;
    let topics = db_call(&state.db, move |db| db.list_topics(&tenant)).await??;
    Ok(ok(topics))
}

pub(super) async fn topic_tree(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<Envelope<Vec<TopicNode>>>, ApiError> {
    let tenant = caller.tenant;
    let tree = db_call(&state.db, move |db| db.topic_tree(&tenant)).await??;
    Ok(ok(tree))
}

pub(super) async fn update_topic(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    Json(patch): Json<TopicPatch>,
) -> Result<Json<Envelope<Topic>>, ApiError> {
    let tenant = caller.tenant;
    let topic = db_call(&state.db, move |db| db.update_topic(&id, &tenant, &patch))
        .await??
        .ok_or(GhostError::NotFound)?;
    Ok(ok(topic))
}

/// Children move up to the deleted topic's parent; its memories become
/// uncategorized.
pub(super) async fn delete_topic(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<Envelope<serde_json::Value>>, ApiError> {
    let tenant = caller.tenant;
    let tid = id.clone();
    if !db_call(&state.db, move |db| db.delete_topic(&tid, &tenant)).await?? {
        return Err(GhostError::NotFound.into());
    }
    Ok(ok(json!({ "id": id, "deleted": true })))
}
