//! HTTP surface: `/health` plus the `/api/v1` resource routes, all
//! answering with the `{success, data, meta}` envelope.

use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::Serialize;
use subtle::ConstantTimeEq;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::db::{validate_project_ref, Profile, DEFAULT_PROJECT};
use crate::error::GhostError;
use crate::util::now_ms;
use crate::{db_call, AppState};

mod admin;
mod chat;
mod memory;
mod tools;
mod topics;

use admin::*;
use chat::*;
use memory::*;
use tools::*;
use topics::*;

/// User id used for sessions when the caller sends no `X-User-Id`.
const ANONYMOUS_USER: &str = "anonymous";

#[derive(Serialize)]
pub struct Envelope<T> {
    success: bool,
    data: T,
    meta: serde_json::Value,
}

pub(crate) fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    ok_meta(data, serde_json::json!({}))
}

/// Success envelope with extra meta fields; a timestamp is always added.
pub(crate) fn ok_meta<T: Serialize>(data: T, mut meta: serde_json::Value) -> Json<Envelope<T>> {
    if let Some(obj) = meta.as_object_mut() {
        obj.insert("timestamp".into(), now_ms().into());
    }
    Json(Envelope { success: true, data, meta })
}

pub(crate) fn created<T: Serialize>(data: T) -> (StatusCode, Json<Envelope<T>>) {
    (StatusCode::CREATED, ok(data))
}

/// Request context taken from headers: the tenant (`X-Tenant`) and the
/// caller's identity (`X-User-Id`).
#[derive(Debug, Clone)]
pub struct Caller {
    pub tenant: String,
    pub user_id: Option<String>,
}

impl Caller {
    /// Identity for per-user data. Falls back to a shared anonymous user.
    pub fn user(&self) -> &str {
        self.user_id.as_deref().unwrap_or(ANONYMOUS_USER)
    }

    pub fn require_user(&self) -> Result<&str, GhostError> {
        self.user_id
            .as_deref()
            .ok_or_else(|| GhostError::Validation("X-User-Id header is required".into()))
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = GhostError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let tenant = header_str(&parts.headers, "x-tenant").unwrap_or_else(|| DEFAULT_PROJECT.to_string());
        validate_project_ref(&tenant)?;
        let user_id = header_str(&parts.headers, "x-user-id");
        if let Some(ref u) = user_id {
            if u.len() > 128 {
                return Err(GhostError::Validation("X-User-Id too long".into()));
            }
        }
        Ok(Caller { tenant, user_id })
    }
}

/// Auth middleware: checks Bearer token if GHOST_API_KEY is configured.
async fn require_auth(
    State(state): State<AppState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, GhostError> {
    let Some(ref expected) = state.api_key else {
        return Ok(next.run(req).await);
    };

    let unauthorized = || GhostError::Unauthorized;

    let header = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(unauthorized)?;

    let token = header.strip_prefix("Bearer ").ok_or_else(unauthorized)?;

    // constant-time comparison to prevent timing attacks
    if token.as_bytes().ct_eq(expected.as_bytes()).into() {
        Ok(next.run(req).await)
    } else {
        Err(unauthorized())
    }
}

async fn caller_profile(state: &AppState, user_id: &str) -> Result<Option<Profile>, GhostError> {
    let uid = user_id.to_string();
    db_call(&state.db, move |db| db.get_profile(&uid)).await?
}

/// When approval is required, the caller must have an approved profile.
pub(crate) async fn ensure_approved(state: &AppState, caller: &Caller) -> Result<(), GhostError> {
    if !state.require_approval {
        return Ok(());
    }
    let user = caller.user_id.as_deref().ok_or(GhostError::Unauthorized)?;
    match caller_profile(state, user).await? {
        Some(p) if p.is_approved() => Ok(()),
        Some(p) => Err(GhostError::Forbidden(format!("profile is {}", p.status.as_str()))),
        None => Err(GhostError::Forbidden("no profile registered".into())),
    }
}

pub(crate) async fn ensure_admin(state: &AppState, caller: &Caller) -> Result<Profile, GhostError> {
    let user = caller.user_id.as_deref().ok_or(GhostError::Unauthorized)?;
    match caller_profile(state, user).await? {
        Some(p) if p.is_admin() && p.is_approved() => Ok(p),
        _ => Err(GhostError::Forbidden("admin role required".into())),
    }
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/memories", post(create_memory).get(list_memories))
        .route("/memories/search", post(search_memories))
        .route("/memories/stats", get(memory_stats))
        .route(
            "/memories/{id}",
            get(get_memory).patch(update_memory).delete(delete_memory),
        )
        .route("/memories/{id}/restore", post(restore_memory))
        .route("/topics", post(create_topic).get(list_topics))
        .route("/topics/tree", get(topic_tree))
        .route("/topics/{id}", patch(update_topic).delete(delete_topic))
        .route("/chat", post(do_chat))
        .route("/sessions", get(list_sessions))
        .route("/tools", get(list_tools))
        .route("/tools/{name}/execute", post(execute_tool))
        .route("/tools/executions/{id}", get(get_execution))
        .route("/providers", get(provider_status))
        .route("/tenant/stats", get(tenant_stats))
        .route("/profiles", post(register_profile))
        .route("/profiles/me", get(my_profile))
        .route("/admin/profiles", get(admin_list_profiles))
        .route("/admin/profiles/{user_id}", post(admin_set_profile))
        .layer(RequestBodyLimitLayer::new(256 * 1024));

    // Whole message lists are uploaded here, so the limit is larger.
    let sessions = Router::new()
        .route(
            "/sessions/{id}",
            get(get_session).put(put_session).delete(delete_session),
        )
        .layer(RequestBodyLimitLayer::new(4 * 1024 * 1024));

    let protected = api
        .merge(sessions)
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", protected)
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn not_found() -> GhostError {
    GhostError::NotFound
}

/// GET /health
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let (db_size_mb, indexed) = db_call(&state.db, |db| {
        let mb = (db.db_size_bytes() as f64 / 1_048_576.0 * 10.0).round() / 10.0;
        (mb, db.indexed_count())
    })
    .await
    .unwrap_or((0.0, 0));
    let (cache_len, cache_cap, cache_hits, cache_misses) = state.embed_cache.stats();

    ok(serde_json::json!({
        "status": "ok",
        "name": "ghost-protocol",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "db_size_mb": db_size_mb,
        "vectors_indexed": indexed,
        "llm_enabled": state.llm.is_some(),
        "embeddings_enabled": state.embed.is_some(),
        "auth_required": state.api_key.is_some(),
        "approval_required": state.require_approval,
        "embed_cache": { "size": cache_len, "capacity": cache_cap, "hits": cache_hits, "misses": cache_misses },
        "tool_executions": state.tracker.len(),
    }))
}
