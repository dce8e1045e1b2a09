//! Anthropic Messages API.

use serde::Deserialize;
use serde_json::{json, Value};

use super::{ChatMessage, MessageRole, ToolCall, ToolOffer, WireReply};
use crate::ai::Usage;

/// System messages are lifted into `system`. Tool results travel as
/// `tool_result` blocks in a user turn, and consecutive same-role turns are
/// merged since the API requires alternation.
pub(super) fn build_request(
    model: &str,
    messages: &[ChatMessage],
    tools: ToolOffer<'_>,
    max_tokens: u32,
) -> Value {
    let system = messages
        .iter()
        .filter(|m| m.role == MessageRole::System)
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut turns: Vec<(&'static str, Vec<Value>)> = Vec::new();
    for m in messages {
        let (role, blocks) = match m.role {
            MessageRole::System => continue,
            MessageRole::User => ("user", vec![json!({"type": "text", "text": m.content})]),
            MessageRole::Tool => (
                "user",
                vec![json!({
                    "type": "tool_result",
                    "tool_use_id": m.tool_call_id.as_deref().unwrap_or_default(),
                    "content": m.content,
                })],
            ),
            MessageRole::Assistant => {
                let mut blocks = Vec::new();
                if !m.content.is_empty() {
                    blocks.push(json!({"type": "text", "text": m.content}));
                }
                for c in &m.tool_calls {
                    let input = if c.arguments.is_object() { c.arguments.clone() } else { json!({}) };
                    blocks.push(json!({"type": "tool_use", "id": c.id, "name": c.name, "input": input}));
                }
                if blocks.is_empty() {
                    continue;
                }
                ("assistant", blocks)
            }
        };
        match turns.last_mut() {
            Some((last_role, last_blocks)) if *last_role == role => last_blocks.extend(blocks),
            _ => turns.push((role, blocks)),
        }
    }

    let messages: Vec<Value> = turns
        .into_iter()
        .map(|(role, content)| json!({"role": role, "content": content}))
        .collect();

    let mut body = json!({
        "model": model,
        "max_tokens": max_tokens,
        "messages": messages,
    });
    if !system.is_empty() {
        body["system"] = json!(system);
    }
    if let Some(defs) = tools.defs() {
        body["tools"] = defs
            .iter()
            .map(|t| json!({"name": t.name, "description": t.description, "input_schema": t.parameters}))
            .collect();
        if !tools.allows_calls() {
            body["tool_choice"] = json!({"type": "none"});
        }
    }
    body
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    ToolUse { id: String, name: String, #[serde(default)] input: Value },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

pub(super) fn parse_response(body: &str) -> Result<WireReply, String> {
    let resp: MessagesResponse = serde_json::from_str(body).map_err(|e| format!("response parse failed: {e}"))?;

    let mut reply = WireReply::default();
    let mut texts = Vec::new();
    for block in resp.content {
        match block {
            ContentBlock::Text { text } => texts.push(text),
            ContentBlock::ToolUse { id, name, input } => reply.tool_calls.push(ToolCall { id, name, arguments: input }),
            ContentBlock::Other => {}
        }
    }
    reply.content = texts.join("");
    if let Some(u) = resp.usage {
        reply.usage = Usage {
            prompt_tokens: u.input_tokens,
            completion_tokens: u.output_tokens,
            total_tokens: u.input_tokens + u.output_tokens,
        };
    }
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ToolDef;

    #[test]
    fn system_lifted_and_tool_results_merged() {
        let a = ToolCall { id: "tu_1".into(), name: "search_memories".into(), arguments: json!({"query": "x"}) };
        let b = ToolCall { id: "tu_2".into(), name: "save_memory".into(), arguments: json!({}) };
        let msgs = vec![
            ChatMessage::system("persona"),
            ChatMessage::user("hello"),
            ChatMessage::assistant_tool_calls("checking", vec![a.clone(), b.clone()]),
            ChatMessage::tool_result(&a, "{\"results\":[]}"),
            ChatMessage::tool_result(&b, "{\"id\":\"m1\"}"),
        ];
        let v = build_request("claude", &msgs, ToolOffer::Off, 1024);

        assert_eq!(v["system"], "persona");
        assert_eq!(v["max_tokens"], 1024);
        let turns = v["messages"].as_array().unwrap();
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[1]["role"], "assistant");
        assert_eq!(turns[1]["content"][1]["type"], "tool_use");
        assert_eq!(turns[1]["content"][1]["input"]["query"], "x");
        assert_eq!(turns[2]["role"], "user");
        assert_eq!(turns[2]["content"].as_array().unwrap().len(), 2);
        assert_eq!(turns[2]["content"][1]["tool_use_id"], "tu_2");
        assert!(v.get("tools").is_none());
    }

    #[test]
    fn tools_use_input_schema() {
        let tools = [ToolDef { name: "t", description: "d", parameters: json!({"type": "object"}) }];
        let v = build_request("m", &[ChatMessage::user("x")], ToolOffer::Auto(&tools), 10);
        assert_eq!(v["tools"][0]["input_schema"]["type"], "object");
        assert!(v.get("tool_choice").is_none());

        let v = build_request("m", &[ChatMessage::user("x")], ToolOffer::Final(&tools), 10);
        assert_eq!(v["tools"][0]["name"], "t");
        assert_eq!(v["tool_choice"], json!({"type": "none"}));
    }

    #[test]
    fn parses_tool_use_blocks() {
        let body = json!({
            "content": [
                {"type": "text", "text": "Let me look."},
                {"type": "tool_use", "id": "tu_9", "name": "search_memories", "input": {"query": "q"}},
                {"type": "thinking", "thinking": "..."}
            ],
            "usage": {"input_tokens": 7, "output_tokens": 3}
        })
        .to_string();
        let r = parse_response(&body).unwrap();
        assert_eq!(r.content, "Let me look.");
        assert_eq!(r.tool_calls.len(), 1);
        assert_eq!(r.tool_calls[0].id, "tu_9");
        assert_eq!(r.usage.total_tokens, 10);
    }
}
