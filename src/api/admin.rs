//! Provider status, tenant stats, and profile management.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::{created, ensure_admin, ok, ok_meta, Caller, Envelope};
use crate::db::{ApprovalStatus, Profile, Role, TenantStats};
use crate::error::{ApiError, GhostError};
use crate::providers::{self, ProviderStatus};
use crate::{db_call, AppState};

/// GET /providers
pub(super) async fn provider_status(State(state): State<AppState>) -> Json<Envelope<Vec<ProviderStatus>>> {
    let list = providers::status(state.llm.as_ref());
    let meta = match state.llm.as_ref() {
        Some(cfg) => json!({ "primary": cfg.primary.name(), "fallback": cfg.fallback }),
        None => json!({ "primary": null, "fallback": false }),
    };
    ok_meta(list, meta)
}

/// GET /tenant/stats
pub(super) async fn tenant_stats(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<Envelope<TenantStats>>, ApiError> {
    let tenant = caller.tenant;
    let stats = db_call(&state.db, move |db| db.tenant_stats(&tenant)).await??;
    Ok(ok(stats))
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct RegisterBody {
    #[serde(default)]
    email: Option<String>,
}

/// POST /profiles. Registers the caller; idempotent for an existing
/// profile. The very first profile becomes an approved admin.
pub(super) async fn register_profile(
    State(state): State<AppState>,
    caller: Caller,
    body: Bytes,
) -> Result<(StatusCode, Json<Envelope<Profile>>), ApiError> {
    let user = caller.require_user()?.to_string();
    let body: RegisterBody = if body.is_empty() {
        RegisterBody::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| GhostError::Validation(format!("invalid JSON body: {e}")))?
    };
    let email = body.email.map(|e| e.trim().to_string()).filter(|e| !e.is_empty());
    if let Some(ref e) = email {
        if e.len() > 254 || !e.contains('@') {
            return Err(GhostError::Validation("invalid email".into()).into());
        }
    }
    let profile = db_call(&state.db, move |db| db.register_profile(&user, email.as_deref())).await??;
    info!(user_id = %profile.user_id, role = profile.role.as_str(), status = profile.status.as_str(), "profile registered");
    Ok(created(profile))
}

/// GET /profiles/me
pub(super) async fn my_profile(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<Envelope<Profile>>, ApiError> {
    let user = caller.require_user()?.to_string();
    let profile = db_call(&state.db, move |db| db.get_profile(&user))
        .await??
        .ok_or(GhostError::NotFound)?;
    Ok(ok(profile))
}

#[derive(Debug, Deserialize)]
pub(super) struct ProfilesQuery {
    status: Option<ApprovalStatus>,
}

/// GET /admin/profiles
pub(super) async fn admin_list_profiles(
    State(state): State<AppState>,
    caller: Caller,
    Query(q): Query<ProfilesQuery>,
) -> Result<Json<Envelope<Vec<Profile>>>, ApiError> {
    ensure_admin(&state, &caller).await?;
    let profiles = db_call(&state.db, move |db| db.list_profiles(q.status)).await??;
    Ok(ok(profiles))
}

#[derive(Debug, Deserialize)]
pub(super) struct ProfileUpdate {
    #[serde(default)]
    status: Option<ApprovalStatus>,
    #[serde(default)]
    role: Option<Role>,
}

/// POST /admin/profiles/{user_id}
pub(super) async fn admin_set_profile(
    State(state): State<AppState>,
    caller: Caller,
    Path(user_id): Path<String>,
    Json(body): Json<ProfileUpdate>,
) -> Result<Json<Envelope<Profile>>, ApiError> {
    let admin = ensure_admin(&state, &caller).await?;
    if body.status.is_none() && body.role.is_none() {
        return Err(GhostError::Validation("nothing to update (status or role)".into()).into());
    }
    if admin.user_id == user_id && (body.role == Some(Role::User) || matches!(body.status, Some(s) if s != ApprovalStatus::Approved)) {
        return Err(GhostError::Validation("admins cannot demote or unapprove themselves".into()).into());
    }
    let profile = db_call(&state.db, move |db| db.set_profile_status(&user_id, body.status, body.role))
        .await??
        .ok_or(GhostError::NotFound)?;
    info!(
        admin = %admin.user_id,
        user_id = %profile.user_id,
        status = profile.status.as_str(),
        role = profile.role.as_str(),
        "profile updated"
    );
    Ok(ok(profile))
}
