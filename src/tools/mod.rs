//! Tools the model may call during chat, and the same tools exposed for
//! direct execution over the API.

mod tracker;

pub use tracker::{ExecutionStatus, ExecutionTracker, ToolExecution};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::ai;
use crate::chat::{retrieve, SIMILARITY_THRESHOLD};
use crate::db::{embed_text, MemoryInput, MemoryType};
use crate::error::GhostError;
use crate::providers::ToolDef;
use crate::util::truncate_chars;
use crate::{db_call, AppState};

const DEFAULT_CLICKUP_URL: &str = "https://api.clickup.com/api/v2";
const DEFAULT_TELEGRAM_URL: &str = "https://api.telegram.org";
const DEFAULT_PICAOS_URL: &str = "https://api.picaos.com/v1";

#[derive(Debug, Clone)]
pub struct ClickUpConfig {
    pub url: String,
    pub token: String,
    pub default_list: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub url: String,
    pub bot_token: String,
    pub default_chat: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PicaosConfig {
    pub url: String,
    pub key: String,
}

/// Credentials for the external tools. A `None` integration is reported as
/// not configured when called.
#[derive(Debug, Clone, Default)]
pub struct ToolsConfig {
    pub clickup: Option<ClickUpConfig>,
    pub telegram: Option<TelegramConfig>,
    pub zapier_webhook: Option<String>,
    pub picaos: Option<PicaosConfig>,
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl ToolsConfig {
    pub fn from_env() -> Self {
        Self {
            clickup: env_opt("CLICKUP_API_TOKEN").map(|token| ClickUpConfig {
                url: env_opt("GHOST_CLICKUP_URL").unwrap_or_else(|| DEFAULT_CLICKUP_URL.into()),
                token,
                default_list: env_opt("CLICKUP_LIST_ID"),
            }),
            telegram: env_opt("TELEGRAM_BOT_TOKEN").map(|bot_token| TelegramConfig {
                url: env_opt("GHOST_TELEGRAM_URL").unwrap_or_else(|| DEFAULT_TELEGRAM_URL.into()),
                bot_token,
                default_chat: env_opt("TELEGRAM_CHAT_ID"),
            }),
            zapier_webhook: env_opt("ZAPIER_WEBHOOK_URL"),
            picaos: env_opt("PICAOS_API_KEY").map(|key| PicaosConfig {
                url: env_opt("GHOST_PICAOS_URL").unwrap_or_else(|| DEFAULT_PICAOS_URL.into()),
                key,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    SearchMemories,
    SaveMemory,
    ClickupCreateTask,
    ClickupListTasks,
    TelegramSendMessage,
    ZapierTrigger,
    PicaosExecute,
}

#[derive(Debug, Serialize)]
pub struct ToolInfo {
    #[serde(flatten)]
    pub def: ToolDef,
    pub configured: bool,
}

impl Tool {
    pub const ALL: [Tool; 7] = [
        Tool::SearchMemories,
        Tool::SaveMemory,
        Tool::ClickupCreateTask,
        Tool::ClickupListTasks,
        Tool::TelegramSendMessage,
        Tool::ZapierTrigger,
        Tool::PicaosExecute,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Tool::SearchMemories => "search_memories",
            Tool::SaveMemory => "save_memory",
            Tool::ClickupCreateTask => "clickup_create_task",
            Tool::ClickupListTasks => "clickup_list_tasks",
            Tool::TelegramSendMessage => "telegram_send_message",
            Tool::ZapierTrigger => "zapier_trigger",
            Tool::PicaosExecute => "picaos_execute",
        }
    }

    pub fn from_name(name: &str) -> Option<Tool> {
        Tool::ALL.into_iter().find(|t| t.name() == name)
    }

    pub fn is_configured(self, cfg: &ToolsConfig) -> bool {
        match self {
            Tool::SearchMemories | Tool::SaveMemory => true,
            Tool::ClickupCreateTask | Tool::ClickupListTasks => cfg.clickup.is_some(),
            Tool::TelegramSendMessage => cfg.telegram.is_some(),
            Tool::ZapierTrigger => cfg.zapier_webhook.is_some(),
            Tool::PicaosExecute => cfg.picaos.is_some(),
        }
    }

    pub fn definition(self) -> ToolDef {
        let (description, parameters) = match self {
            Tool::SearchMemories => (
                "Search the user's stored memories for information related to a query.",
                json!({
                    "type": "object",
                    "properties": {
                        "query": {"type": "string", "description": "What to look for"},
                        "limit": {"type": "integer", "description": "Max results (1-20, default 5)"}
                    },
                    "required": ["query"]
                }),
            ),
            Tool::SaveMemory => (
                "Save a piece of information to long-term memory.",
                json!({
                    "type": "object",
                    "properties": {
                        "title": {"type": "string"},
                        "content": {"type": "string"},
                        "memory_type": {
                            "type": "string",
                            "enum": ["conversation", "knowledge", "project", "context", "reference"]
                        },
                        "tags": {"type": "array", "items": {"type": "string"}}
                    },
                    "required": ["title", "content"]
                }),
            ),
            Tool::ClickupCreateTask => (
                "Create a task in ClickUp.",
                json!({
                    "type": "object",
                    "properties": {
                        "name": {"type": "string"},
                        "description": {"type": "string"},
                        "list_id": {"type": "string", "description": "Defaults to the configured list"},
                        "priority": {"type": "integer", "description": "1 urgent, 2 high, 3 normal, 4 low"}
                    },
                    "required": ["name"]
                }),
            ),
            Tool::ClickupListTasks => (
                "List open tasks in a ClickUp list.",
                json!({
                    "type": "object",
                    "properties": {
                        "list_id": {"type": "string", "description": "Defaults to the configured list"}
                    }
                }),
            ),
            Tool::TelegramSendMessage => (
                "Send a Telegram message.",
                json!({
                    "type": "object",
                    "properties": {
                        "text": {"type": "string"},
                        "chat_id": {"type": "string", "description": "Defaults to the configured chat"}
                    },
                    "required": ["text"]
                }),
            ),
            Tool::ZapierTrigger => (
                "Trigger the configured Zapier webhook with a JSON payload.",
                json!({
                    "type": "object",
                    "properties": {
                        "payload": {"type": "object"}
                    },
                    "required": ["payload"]
                }),
            ),
            Tool::PicaosExecute => (
                "Run an action through the Picaos integration platform.",
                json!({
                    "type": "object",
                    "properties": {
                        "action": {"type": "string"},
                        "params": {"type": "object"}
                    },
                    "required": ["action"]
                }),
            ),
        };
        ToolDef { name: self.name(), description, parameters }
    }

    pub async fn execute(self, state: &AppState, project_ref: &str, args: Value) -> Result<Value, GhostError> {
        if !self.is_configured(&state.tools) {
            return Err(GhostError::ToolNotConfigured(self.name().into()));
        }
        debug!(tool = self.name(), "executing tool");
        match self {
            Tool::SearchMemories => search_memories(state, project_ref, parse_args(self, args)?).await,
            Tool::SaveMemory => save_memory(state, project_ref, parse_args(self, args)?).await,
            Tool::ClickupCreateTask => clickup_create_task(state, parse_args(self, args)?).await,
            Tool::ClickupListTasks => clickup_list_tasks(state, parse_args(self, args)?).await,
            Tool::TelegramSendMessage => telegram_send(state, parse_args(self, args)?).await,
            Tool::ZapierTrigger => zapier_trigger(state, parse_args(self, args)?).await,
            Tool::PicaosExecute => picaos_execute(state, parse_args(self, args)?).await,
        }
    }
}

/// Definitions of the tools that can actually run with this config.
pub fn available(cfg: &ToolsConfig) -> Vec<ToolDef> {
    Tool::ALL.into_iter().filter(|t| t.is_configured(cfg)).map(Tool::definition).collect()
}

pub fn catalog(cfg: &ToolsConfig) -> Vec<ToolInfo> {
    Tool::ALL
        .into_iter()
        .map(|t| ToolInfo { def: t.definition(), configured: t.is_configured(cfg) })
        .collect()
}

/// Dispatch by name. Unknown names are an error like any other.
pub async fn dispatch(state: &AppState, project_ref: &str, name: &str, args: Value) -> Result<Value, GhostError> {
    let tool = Tool::from_name(name).ok_or_else(|| GhostError::ToolNotFound(name.to_string()))?;
    tool.execute(state, project_ref, args).await
}

fn parse_args<T: DeserializeOwned>(tool: Tool, args: Value) -> Result<T, GhostError> {
    let args = if args.is_null() { json!({}) } else { args };
    serde_json::from_value(args).map_err(|e| GhostError::Validation(format!("{}: bad arguments: {e}", tool.name())))
}

fn tool_err(tool: Tool, msg: impl std::fmt::Display) -> GhostError {
    GhostError::ToolFailed(format!("{}: {msg}", tool.name()))
}

/// Send a request and read a JSON body. Non-2xx and transport errors
/// become `ToolFailed`. A non-JSON success body comes back as `{"text": ..}`.
async fn send_json(tool: Tool, req: reqwest::RequestBuilder) -> Result<Value, GhostError> {
    let resp = req.send().await.map_err(|e| tool_err(tool, e))?;
    let status = resp.status();
    let text = resp.text().await.map_err(|e| tool_err(tool, e))?;
    if !status.is_success() {
        warn!(tool = tool.name(), %status, "tool request failed");
        return Err(tool_err(tool, format!("HTTP {status}: {}", truncate_chars(&text, 300))));
    }
    if text.trim().is_empty() {
        return Ok(json!({}));
    }
    Ok(serde_json::from_str(&text).unwrap_or_else(|_| json!({ "text": text })))
}

#[derive(Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default)]
    limit: Option<usize>,
}

async fn search_memories(state: &AppState, project_ref: &str, args: SearchArgs) -> Result<Value, GhostError> {
    if args.query.trim().is_empty() {
        return Err(GhostError::EmptyQuery);
    }
    let k = args.limit.unwrap_or(5).clamp(1, 20);
    let found = retrieve(state, project_ref, &args.query, k, SIMILARITY_THRESHOLD, None).await?;
    let results: Vec<Value> = found
        .matches
        .iter()
        .map(|m| {
            json!({
                "id": m.memory.id,
                "title": m.memory.title,
                "content": truncate_chars(&m.memory.content, 500),
                "memory_type": m.memory.memory_type,
                "similarity": (m.similarity * 1000.0).round() / 1000.0,
            })
        })
        .collect();
    Ok(json!({ "mode": found.mode, "count": results.len(), "results": results }))
}

#[derive(Deserialize)]
struct SaveArgs {
    title: String,
    content: String,
    #[serde(default)]
    memory_type: Option<MemoryType>,
    #[serde(default)]
    tags: Option<Vec<String>>,
}

async fn save_memory(state: &AppState, project_ref: &str, args: SaveArgs) -> Result<Value, GhostError> {
    let mut input = MemoryInput::new(args.content)
        .title(args.title)
        .memory_type(args.memory_type.unwrap_or(MemoryType::Knowledge))
        .project(project_ref);
    if let Some(tags) = args.tags {
        input = input.tags(tags);
    }
    let mem = db_call(&state.db, move |db| db.insert(input)).await??;

    // Saved memories should be findable on the next turn, so embed inline.
    let mut embedded = false;
    if let Some(cfg) = state.embed.as_ref() {
        match ai::embed_one(&state.http, cfg, &embed_text(&mem.title, &mem.content)).await {
            Ok(emb) => {
                let id = mem.id.clone();
                embedded = db_call(&state.db, move |db| db.set_embedding(&id, &emb)).await?.is_ok();
            }
            Err(e) => warn!(id = %mem.id, error = %e, "save_memory: embedding failed"),
        }
    }
    Ok(json!({ "saved": true, "id": mem.id, "title": mem.title, "embedded": embedded }))
}

#[derive(Deserialize)]
struct CreateTaskArgs {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    list_id: Option<String>,
    #[serde(default)]
    priority: Option<u8>,
}

fn clickup(state: &AppState) -> Result<&ClickUpConfig, GhostError> {
    state
        .tools
        .clickup
        .as_ref()
        .ok_or_else(|| GhostError::ToolNotConfigured("clickup".into()))
}

fn clickup_list(tool: Tool, cfg: &ClickUpConfig, requested: Option<String>) -> Result<String, GhostError> {
    requested
        .filter(|l| !l.is_empty())
        .or_else(|| cfg.default_list.clone())
        .ok_or_else(|| GhostError::Validation(format!("{}: list_id is required (no CLICKUP_LIST_ID set)", tool.name())))
}

async fn clickup_create_task(state: &AppState, args: CreateTaskArgs) -> Result<Value, GhostError> {
    let tool = Tool::ClickupCreateTask;
    let cfg = clickup(state)?;
    if args.name.trim().is_empty() {
        return Err(GhostError::Validation("clickup_create_task: name is required".into()));
    }
    if let Some(p) = args.priority {
        if !(1..=4).contains(&p) {
            return Err(GhostError::Validation("clickup_create_task: priority must be 1-4".into()));
        }
    }
    let list = clickup_list(tool, cfg, args.list_id)?;
    let mut body = json!({ "name": args.name });
    if let Some(d) = args.description {
        body["description"] = json!(d);
    }
    if let Some(p) = args.priority {
        body["priority"] = json!(p);
    }

    let url = format!("{}/list/{list}/task", cfg.url.trim_end_matches('/'));
    let resp = send_json(tool, state.http.post(url).header("Authorization", &cfg.token).json(&body)).await?;
    Ok(json!({
        "id": resp.get("id").cloned().unwrap_or(Value::Null),
        "name": resp.get("name").cloned().unwrap_or(Value::Null),
        "url": resp.get("url").cloned().unwrap_or(Value::Null),
        "list_id": list,
    }))
}

#[derive(Deserialize)]
struct ListTasksArgs {
    #[serde(default)]
    list_id: Option<String>,
}

async fn clickup_list_tasks(state: &AppState, args: ListTasksArgs) -> Result<Value, GhostError> {
    let tool = Tool::ClickupListTasks;
    let cfg = clickup(state)?;
    let list = clickup_list(tool, cfg, args.list_id)?;
    let url = format!("{}/list/{list}/task", cfg.url.trim_end_matches('/'));
    let resp = send_json(tool, state.http.get(url).header("Authorization", &cfg.token)).await?;

    let tasks: Vec<Value> = resp
        .get("tasks")
        .and_then(Value::as_array)
        .map(|ts| {
            ts.iter()
                .map(|t| {
                    json!({
                        "id": t.get("id"),
                        "name": t.get("name"),
                        "status": t.pointer("/status/status"),
                        "url": t.get("url"),
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    Ok(json!({ "list_id": list, "count": tasks.len(), "tasks": tasks }))
}

#[derive(Deserialize)]
struct TelegramArgs {
    text: String,
    #[serde(default)]
    chat_id: Option<Value>,
}

async fn telegram_send(state: &AppState, args: TelegramArgs) -> Result<Value, GhostError> {
    let tool = Tool::TelegramSendMessage;
    let cfg = state
        .tools
        .telegram
        .as_ref()
        .ok_or_else(|| GhostError::ToolNotConfigured("telegram".into()))?;
    if args.text.trim().is_empty() {
        return Err(GhostError::Validation("telegram_send_message: text is required".into()));
    }
    // Models pass chat ids as numbers or strings; both work upstream.
    let chat_id = match args.chat_id {
        Some(Value::String(s)) if !s.is_empty() => s,
        Some(Value::Number(n)) => n.to_string(),
        _ => cfg.default_chat.clone().ok_or_else(|| {
            GhostError::Validation("telegram_send_message: chat_id is required (no TELEGRAM_CHAT_ID set)".into())
        })?,
    };

    let url = format!("{}/bot{}/sendMessage", cfg.url.trim_end_matches('/'), cfg.bot_token);
    let resp = send_json(tool, state.http.post(url).json(&json!({ "chat_id": chat_id, "text": args.text }))).await?;
    if resp.get("ok").and_then(Value::as_bool) == Some(false) {
        let desc = resp.get("description").and_then(Value::as_str).unwrap_or("unknown error");
        return Err(tool_err(tool, desc));
    }
    Ok(json!({
        "sent": true,
        "chat_id": chat_id,
        "message_id": resp.pointer("/result/message_id").cloned().unwrap_or(Value::Null),
    }))
}

#[derive(Deserialize)]
struct ZapierArgs {
    payload: Value,
}

async fn zapier_trigger(state: &AppState, args: ZapierArgs) -> Result<Value, GhostError> {
    let tool = Tool::ZapierTrigger;
    let url = state
        .tools
        .zapier_webhook
        .as_deref()
        .ok_or_else(|| GhostError::ToolNotConfigured("zapier".into()))?;
    let resp = send_json(tool, state.http.post(url).json(&args.payload)).await?;
    Ok(json!({ "triggered": true, "response": resp }))
}

#[derive(Deserialize)]
struct PicaosArgs {
    action: String,
    #[serde(default)]
    params: Option<Value>,
}

async fn picaos_execute(state: &AppState, args: PicaosArgs) -> Result<Value, GhostError> {
    let tool = Tool::PicaosExecute;
    let cfg = state
        .tools
        .picaos
        .as_ref()
        .ok_or_else(|| GhostError::ToolNotConfigured("picaos".into()))?;
    if args.action.trim().is_empty() {
        return Err(GhostError::Validation("picaos_execute: action is required".into()));
    }
    let url = format!("{}/execute", cfg.url.trim_end_matches('/'));
    let body = json!({ "action": args.action, "params": args.params.unwrap_or_else(|| json!({})) });
    send_json(tool, state.http.post(url).header("x-pica-secret", &cfg.key).json(&body)).await
}
