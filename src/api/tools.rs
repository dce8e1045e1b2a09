use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{ensure_approved, ok, ok_meta, Caller, Envelope};
use crate::error::{ApiError, GhostError, OrCode};
use crate::tools::{self, ToolExecution, ToolInfo};
use crate::AppState;

/// GET /tools
pub(super) async fn list_tools(State(state): State<AppState>) -> Json<Envelope<Vec<ToolInfo>>> {
    let catalog = tools::catalog(&state.tools);
    let configured = catalog.iter().filter(|t| t.configured).count();
    ok_meta(catalog, json!({ "configured": configured }))
}

/// POST /tools/{name}/execute. The body is the tool's argument object.
/// Each run is recorded in the execution tracker.
pub(super) async fn execute_tool(
    State(state): State<AppState>,
    caller: Caller,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<Json<Envelope<Value>>, ApiError> {
    ensure_approved(&state, &caller).await?;
    let Some(tool) = tools::Tool::from_name(&name) else {
        return Err(GhostError::ToolNotFound(name).into());
    };
    let args = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).map_err(|e| GhostError::Validation(format!("invalid JSON body: {e}")))?
    };

    let exec_id = state.tracker.start(tool.name());
    let result = tool.execute(&state, &caller.tenant, args).await;
    state.tracker.finish(&exec_id, result.as_ref());
    match &result {
        Ok(_) => info!(tool = tool.name(), %exec_id, "tool executed"),
        Err(e) => warn!(tool = tool.name(), %exec_id, error = %e, "tool execution failed"),
    }

    let value = result.or_code("TOOL_EXECUTION_FAILED")?;
    Ok(ok_meta(value, json!({ "execution_id": exec_id, "tool": tool.name() })))
}

/// GET /tools/executions/{id}
pub(super) async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Envelope<ToolExecution>>, ApiError> {
    let exec = state.tracker.get(&id).ok_or(GhostError::NotFound)?;
    Ok(ok(exec))
}
