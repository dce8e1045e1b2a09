//! Gemini `generateContent`.

use serde::Deserialize;
use serde_json::{json, Value};

use super::{tool_result_value, ChatMessage, MessageRole, ToolCall, ToolOffer, WireReply};
use crate::ai::Usage;

pub(super) fn build_request(messages: &[ChatMessage], tools: ToolOffer<'_>, max_tokens: u32) -> Value {
    let system = messages
        .iter()
        .filter(|m| m.role == MessageRole::System)
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut contents: Vec<(&'static str, Vec<Value>)> = Vec::new();
    for m in messages {
        let (role, parts) = match m.role {
            MessageRole::System => continue,
            MessageRole::User => ("user", vec![json!({"text": m.content})]),
            MessageRole::Tool => (
                "user",
                vec![json!({
                    "functionResponse": {
                        "name": m.name.as_deref().unwrap_or_default(),
                        "response": tool_result_value(&m.content),
                    }
                })],
            ),
            MessageRole::Assistant => {
                let mut parts = Vec::new();
                if !m.content.is_empty() {
                    parts.push(json!({"text": m.content}));
                }
                for c in &m.tool_calls {
                    parts.push(json!({"functionCall": {"name": c.name, "args": c.arguments}}));
                }
                if parts.is_empty() {
                    continue;
                }
                ("model", parts)
            }
        };
        match contents.last_mut() {
            Some((last_role, last_parts)) if *last_role == role => last_parts.extend(parts),
            _ => contents.push((role, parts)),
        }
    }

    let mut body = json!({
        "contents": contents
            .into_iter()
            .map(|(role, parts)| json!({"role": role, "parts": parts}))
            .collect::<Vec<_>>(),
        "generationConfig": {"maxOutputTokens": max_tokens},
    });
    if !system.is_empty() {
        body["systemInstruction"] = json!({"parts": [{"text": system}]});
    }
    if let Some(defs) = tools.defs() {
        let decls: Vec<Value> = defs
            .iter()
            .map(|t| json!({"name": t.name, "description": t.description, "parameters": t.parameters}))
            .collect();
        body["tools"] = json!([{"functionDeclarations": decls}]);
        if !tools.allows_calls() {
            body["toolConfig"] = json!({"functionCallingConfig": {"mode": "NONE"}});
        }
    }
    body
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata", default)]
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
    #[serde(rename = "functionCall", default)]
    function_call: Option<FunctionCall>,
}

#[derive(Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Deserialize)]
struct GeminiUsage {
    #[serde(rename = "promptTokenCount", default)]
    prompt: u32,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates: u32,
    #[serde(rename = "totalTokenCount", default)]
    total: u32,
}

/// Gemini doesn't id its function calls, so ids are synthesized from the
/// position in the reply.
pub(super) fn parse_response(body: &str) -> Result<WireReply, String> {
    let resp: GenerateResponse = serde_json::from_str(body).map_err(|e| format!("response parse failed: {e}"))?;
    let parts = resp
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| "response has no candidates".to_string())?
        .content
        .map(|c| c.parts)
        .unwrap_or_default();

    let mut reply = WireReply::default();
    let mut texts = Vec::new();
    for part in parts {
        if let Some(t) = part.text {
            texts.push(t);
        }
        if let Some(fc) = part.function_call {
            let id = format!("gemini-{}-{}", reply.tool_calls.len(), fc.name);
            let arguments = if fc.args.is_null() { json!({}) } else { fc.args };
            reply.tool_calls.push(ToolCall { id, name: fc.name, arguments });
        }
    }
    reply.content = texts.join("");
    if let Some(u) = resp.usage_metadata {
        reply.usage = Usage {
            prompt_tokens: u.prompt,
            completion_tokens: u.candidates,
            total_tokens: if u.total > 0 { u.total } else { u.prompt + u.candidates },
        };
    }
    Ok(reply)
}
