//! OpenAI-compatible `/chat/completions` (OpenAI, Mistral, DeepSeek,
//! OpenRouter, Perplexity).

use serde::{Deserialize, Serialize};

use super::{ChatMessage, MessageRole, ToolCall, ToolDef, ToolOffer, WireReply};
use crate::ai::Usage;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
}

#[derive(Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    call_type: String,
    function: WireFunctionCall,
}

fn function_type() -> String {
    "function".into()
}

#[derive(Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    /// JSON-encoded arguments, as the API sends them.
    #[serde(default)]
    arguments: String,
}

#[derive(Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: &'a ToolDef,
}

pub(super) fn build_request(model: &str, messages: &[ChatMessage], tools: ToolOffer<'_>) -> serde_json::Value {
    let messages = messages
        .iter()
        .map(|m| {
            let role = match m.role {
                MessageRole::System => "system",
                MessageRole::User => "user",
                MessageRole::Assistant => "assistant",
                MessageRole::Tool => "tool",
            };
            let has_calls = !m.tool_calls.is_empty();
            WireMessage {
                role,
                content: if has_calls && m.content.is_empty() { None } else { Some(m.content.as_str()) },
                tool_calls: m
                    .tool_calls
                    .iter()
                    .map(|c| WireToolCall {
                        id: c.id.clone(),
                        call_type: function_type(),
                        function: WireFunctionCall { name: c.name.clone(), arguments: c.arguments.to_string() },
                    })
                    .collect(),
                tool_call_id: m.tool_call_id.as_deref(),
            }
        })
        .collect();

    let req = ChatRequest {
        model,
        messages,
        tools: tools.defs().map(|ts| ts.iter().map(|t| WireTool { tool_type: "function", function: t }).collect()),
        tool_choice: (tools.defs().is_some() && !tools.allows_calls()).then_some("none"),
    };
    serde_json::to_value(&req).unwrap_or_default()
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

pub(super) fn parse_response(body: &str) -> Result<WireReply, String> {
    let resp: ChatResponse = serde_json::from_str(body).map_err(|e| format!("response parse failed: {e}"))?;
    let msg = resp
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| "response has no choices".to_string())?
        .message;

    let tool_calls = msg
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|c| {
            let raw = c.function.arguments;
            // Unparseable arguments still reach the tool so it can report them.
            let arguments = if raw.trim().is_empty() {
                serde_json::json!({})
            } else {
                serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw))
            };
            ToolCall { id: c.id, name: c.function.name, arguments }
        })
        .collect();

    Ok(WireReply { content: msg.content.unwrap_or_default(), tool_calls, usage: resp.usage.unwrap_or_default() })
}
