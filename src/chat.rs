//! Memory-aware chat: retrieve related memories, prompt the model, let it
//! call tools for a bounded number of rounds, then persist the exchange.

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ai::Usage;
use crate::db::{embed_text, MemoryInput, MemoryMatch, MemoryType};
use crate::error::GhostError;
use crate::prompts::{self, Persona};
use crate::providers::{self, ChatMessage, MessageRole, ToolOffer};
use crate::util::title_from;
use crate::{db_call, spawn_embed, tools, AppState};

/// Minimum cosine similarity for a memory to be used as context.
pub const SIMILARITY_THRESHOLD: f64 = 0.7;
/// Memories injected into the prompt by default.
pub const CONTEXT_MEMORIES: usize = 5;
/// Session messages replayed to the model.
pub const HISTORY_WINDOW: usize = 20;
/// Tool rounds before the model is forced to answer without tools.
pub const MAX_TOOL_ROUNDS: usize = 5;

const MAX_MESSAGE_CHARS: usize = 32_768;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    Semantic,
    Keyword,
}

#[derive(Debug)]
pub struct Retrieval {
    pub matches: Vec<MemoryMatch>,
    pub mode: RetrievalMode,
}

/// Find memories related to `query` in the tenant and bump their access
/// stats. Falls back to keyword search when the query can't be embedded.
pub async fn retrieve(
    state: &AppState,
    project_ref: &str,
    query: &str,
    k: usize,
    threshold: f64,
    memory_type: Option<MemoryType>,
) -> Result<Retrieval, GhostError> {
    let ns = project_ref.to_string();
    let (matches, mode) = match state.embed_query(query).await {
        Ok(emb) => {
            let m = db_call(&state.db, move |db| db.match_memories(&emb, threshold, k, &ns, memory_type)).await??;
            (m, RetrievalMode::Semantic)
        }
        Err(e) => {
            if !matches!(e, GhostError::AiNotConfigured) {
                warn!(error = %e, "query embedding failed, using keyword search");
            }
            let q = query.to_string();
            let m = match db_call(&state.db, move |db| db.search_keyword(&q, k, &ns, memory_type)).await? {
                Err(GhostError::EmptyQuery) => vec![],
                other => other?,
            };
            (m, RetrievalMode::Keyword)
        }
    };

    if !matches.is_empty() {
        let ids: Vec<String> = matches.iter().map(|m| m.memory.id.clone()).collect();
        if let Ok(Err(e)) = db_call(&state.db, move |db| db.touch(&ids)).await {
            warn!(error = %e, "access bump failed");
        }
    }
    debug!(count = matches.len(), ?mode, "retrieved memories");
    Ok(Retrieval { matches, mode })
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    /// `provider:model`, a provider name, or a bare model name.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub persona: Option<String>,
    #[serde(default)]
    pub use_tools: Option<bool>,
    /// Store the exchange as a conversation memory (default true).
    #[serde(default)]
    pub save_memory: Option<bool>,
    #[serde(default)]
    pub memory_limit: Option<usize>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), ..Default::default() }
    }
}

#[derive(Debug, Serialize)]
pub struct UsedMemory {
    pub id: String,
    pub title: String,
    pub similarity: f64,
}

#[derive(Debug, Serialize)]
pub struct ToolTrace {
    pub round: usize,
    pub name: String,
    pub ok: bool,
}

#[derive(Debug, Serialize)]
pub struct ChatOutcome {
    pub reply: String,
    pub session_id: String,
    pub model: String,
    pub persona: Persona,
    pub retrieval: RetrievalMode,
    pub memories: Vec<UsedMemory>,
    pub tool_calls: Vec<ToolTrace>,
    pub rounds: usize,
    pub usage: Usage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_id: Option<String>,
}

/// Run one chat turn end to end.
pub async fn run(state: &AppState, project_ref: &str, user_id: &str, req: ChatRequest) -> Result<ChatOutcome, GhostError> {
    let message = req.message.trim().to_string();
    if message.is_empty() {
        return Err(GhostError::Validation("message must not be empty".into()));
    }
    if message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(GhostError::ContentTooLong);
    }
    let llm = state.llm.as_ref().ok_or(GhostError::AiNotConfigured)?;
    let persona = match req.persona.as_deref() {
        Some(p) => p.parse()?,
        None => Persona::detect(&message).unwrap_or_default(),
    };

    let session_id = req
        .session_id
        .clone()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let history = {
        let (sid, uid, ns) = (session_id.clone(), user_id.to_string(), project_ref.to_string());
        db_call(&state.db, move |db| db.claim_session(&sid, &uid, &ns))
            .await??
            .map(|s| s.messages)
            .unwrap_or_default()
    };

    let k = req.memory_limit.unwrap_or(CONTEXT_MEMORIES).min(20);
    let found = if k == 0 {
        Retrieval { matches: vec![], mode: RetrievalMode::Semantic }
    } else {
        retrieve(state, project_ref, &message, k, SIMILARITY_THRESHOLD, None).await?
    };

    let tool_defs = if req.use_tools.unwrap_or(true) { tools::available(&state.tools) } else { vec![] };

    let mut convo = Vec::with_capacity(HISTORY_WINDOW + 4);
    convo.push(ChatMessage::system(prompts::system_prompt(persona, &found.matches, !tool_defs.is_empty())));
    let replay: Vec<&ChatMessage> = history
        .iter()
        .filter(|m| matches!(m.role, MessageRole::User | MessageRole::Assistant) && m.tool_calls.is_empty())
        .collect();
    convo.extend(replay[replay.len().saturating_sub(HISTORY_WINDOW)..].iter().map(|m| (*m).clone()));
    convo.push(ChatMessage::user(&message));

    let mut usage = Usage::default();
    let mut model_ref = req.model.clone();
    let mut traces = Vec::new();
    let mut rounds = 0;
    let final_reply = loop {
        let offer = if rounds < MAX_TOOL_ROUNDS {
            ToolOffer::Auto(tool_defs.as_slice())
        } else {
            ToolOffer::Final(tool_defs.as_slice())
        };
        let reply = providers::complete(&state.http, llm, model_ref.as_deref(), &convo, offer).await?;
        usage.add(&reply.usage);
        // Later rounds stay on whichever provider answered.
        model_ref = Some(reply.model_ref());

        if reply.tool_calls.is_empty() || !offer.allows_calls() {
            break reply;
        }

        rounds += 1;
        convo.push(ChatMessage::assistant_tool_calls(reply.content.clone(), reply.tool_calls.clone()));
        for call in &reply.tool_calls {
            let result = tools::dispatch(state, project_ref, &call.name, call.arguments.clone()).await;
            let content = match &result {
                Ok(v) => v.to_string(),
                Err(e) => {
                    warn!(tool = %call.name, error = %e, "tool call failed");
                    json!({ "error": e.to_string() }).to_string()
                }
            };
            traces.push(ToolTrace { round: rounds, name: call.name.clone(), ok: result.is_ok() });
            convo.push(ChatMessage::tool_result(call, content));
        }
        if rounds == MAX_TOOL_ROUNDS {
            info!(rounds, "tool round limit reached, forcing a final answer");
        }
    };

    let reply_text = if final_reply.content.trim().is_empty() {
        "I wasn't able to produce an answer for that.".to_string()
    } else {
        final_reply.content.clone()
    };
    let model = final_reply.model_ref();

    let mut stored = history;
    stored.push(ChatMessage::user(&message));
    stored.push(ChatMessage::assistant(&reply_text));
    {
        let (sid, uid, ns, m) = (session_id.clone(), user_id.to_string(), project_ref.to_string(), model.clone());
        db_call(&state.db, move |db| db.upsert_session(&sid, &uid, &ns, &stored, Some(m.as_str()))).await??;
    }

    let memory_id = if req.save_memory.unwrap_or(true) {
        save_exchange(state, project_ref, persona, &message, &reply_text, &session_id).await
    } else {
        None
    };

    info!(
        %session_id,
        %model,
        persona = persona.name(),
        memories = found.matches.len(),
        tool_calls = traces.len(),
        tokens = usage.total_tokens,
        "chat turn complete"
    );

    Ok(ChatOutcome {
        reply: reply_text,
        session_id,
        model,
        persona,
        retrieval: found.mode,
        memories: found
            .matches
            .into_iter()
            .map(|m| UsedMemory { id: m.memory.id, title: m.memory.title, similarity: m.similarity })
            .collect(),
        tool_calls: traces,
        rounds,
        usage,
        memory_id,
    })
}

/// Store the turn as a conversation memory and embed it in the background.
/// Failures are logged; the reply has already been produced.
async fn save_exchange(
    state: &AppState,
    project_ref: &str,
    persona: Persona,
    message: &str,
    reply: &str,
    session_id: &str,
) -> Option<String> {
    let content = format!("User: {message}\n\n{}: {reply}", persona.display_name());
    let input = MemoryInput::new(truncate_to_limit(content))
        .title(title_from(message, 80))
        .memory_type(MemoryType::Conversation)
        .tags(vec!["chat".into(), persona.name().into(), format!("session:{}", short_id(session_id))])
        .project(project_ref);

    match db_call(&state.db, move |db| db.insert(input)).await {
        Ok(Ok(mem)) => {
            spawn_embed(state, mem.id.clone(), embed_text(&mem.title, &mem.content));
            Some(mem.id)
        }
        Ok(Err(e)) => {
            warn!(error = %e, "saving conversation memory failed");
            None
        }
        Err(e) => {
            warn!(error = %e, "saving conversation memory failed");
            None
        }
    }
}

fn truncate_to_limit(content: String) -> String {
    const LIMIT: usize = 32_768;
    if content.chars().count() <= LIMIT {
        content
    } else {
        content.chars().take(LIMIT).collect()
    }
}

/// Session ids are user-chosen and can be long; tags are capped at 32 chars.
fn short_id(id: &str) -> String {
    id.chars().filter(|c| c.is_alphanumeric()).take(16).collect()
}
