//! LLM provider adapters. Three wire shapes cover seven providers:
//! OpenAI-compatible chat completions, the Anthropic Messages API and
//! Gemini `generateContent`.

mod anthropic;
mod gemini;
mod openai;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::ai::Usage;
use crate::error::GhostError;
use crate::util::truncate_chars;

fn ai_err(msg: impl Into<String>) -> GhostError {
    GhostError::AiBackend(msg.into())
}

const MAX_OUTPUT_TOKENS: u32 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Anthropic,
    Gemini,
    Mistral,
    DeepSeek,
    OpenRouter,
    Perplexity,
}

/// Request/response format spoken by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wire {
    OpenAi,
    Anthropic,
    Gemini,
}

impl Provider {
    /// Declaration order doubles as the fallback order.
    pub const ALL: [Provider; 7] = [
        Provider::OpenAi,
        Provider::Anthropic,
        Provider::Gemini,
        Provider::Mistral,
        Provider::DeepSeek,
        Provider::OpenRouter,
        Provider::Perplexity,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Gemini => "gemini",
            Provider::Mistral => "mistral",
            Provider::DeepSeek => "deepseek",
            Provider::OpenRouter => "openrouter",
            Provider::Perplexity => "perplexity",
        }
    }

    fn key_env(self) -> &'static str {
        match self {
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
            Provider::Gemini => "GEMINI_API_KEY",
            Provider::Mistral => "MISTRAL_API_KEY",
            Provider::DeepSeek => "DEEPSEEK_API_KEY",
            Provider::OpenRouter => "OPENROUTER_API_KEY",
            Provider::Perplexity => "PERPLEXITY_API_KEY",
        }
    }

    fn default_url(self) -> &'static str {
        match self {
            Provider::OpenAi => "https://api.openai.com/v1/chat/completions",
            Provider::Anthropic => "https://api.anthropic.com/v1/messages",
            Provider::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            Provider::Mistral => "https://api.mistral.ai/v1/chat/completions",
            Provider::DeepSeek => "https://api.deepseek.com/v1/chat/completions",
            Provider::OpenRouter => "https://openrouter.ai/api/v1/chat/completions",
            Provider::Perplexity => "https://api.perplexity.ai/chat/completions",
        }
    }

    fn default_model(self) -> &'static str {
        match self {
            Provider::OpenAi => "gpt-4o-mini",
            Provider::Anthropic => "claude-3-5-sonnet-latest",
            Provider::Gemini => "gemini-1.5-flash",
            Provider::Mistral => "mistral-small-latest",
            Provider::DeepSeek => "deepseek-chat",
            Provider::OpenRouter => "anthropic/claude-3.5-sonnet",
            Provider::Perplexity => "sonar",
        }
    }

    fn wire(self) -> Wire {
        match self {
            Provider::Anthropic => Wire::Anthropic,
            Provider::Gemini => Wire::Gemini,
            _ => Wire::OpenAi,
        }
    }

    /// Perplexity's online models reject tool definitions.
    pub fn supports_tools(self) -> bool {
        self != Provider::Perplexity
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Provider {
    type Err = GhostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        Provider::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| GhostError::Validation(format!("unknown provider: {s}")))
    }
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub provider: Provider,
    pub url: String,
    pub key: String,
    pub model: String,
}

impl ProviderConfig {
    pub fn new(provider: Provider, key: impl Into<String>) -> Self {
        Self {
            provider,
            url: provider.default_url().to_string(),
            key: key.into(),
            model: provider.default_model().to_string(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn from_env(provider: Provider) -> Option<Self> {
        let key = std::env::var(provider.key_env()).ok().filter(|k| !k.trim().is_empty())?;
        let upper = provider.name().to_ascii_uppercase();
        let mut cfg = Self::new(provider, key.trim());
        if let Ok(url) = std::env::var(format!("GHOST_{upper}_URL")) {
            cfg.url = url;
        }
        if let Ok(model) = std::env::var(format!("GHOST_{upper}_MODEL")) {
            cfg.model = model;
        }
        Some(cfg)
    }
}

/// Every configured provider plus the routing policy between them.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub providers: Vec<ProviderConfig>,
    pub primary: Provider,
    pub fallback: bool,
}

impl LlmConfig {
    /// The first provider in the list becomes the primary. `None` for an
    /// empty list.
    pub fn new(providers: Vec<ProviderConfig>) -> Option<Self> {
        let primary = providers.first()?.provider;
        Some(Self { providers, primary, fallback: true })
    }

    pub fn with_primary(mut self, primary: Provider) -> Self {
        if self.get(primary).is_some() {
            self.primary = primary;
        }
        self
    }

    pub fn with_fallback(mut self, on: bool) -> Self {
        self.fallback = on;
        self
    }

    /// Returns `None` when no provider key is set.
    pub fn from_env() -> Option<Self> {
        let providers: Vec<ProviderConfig> =
            Provider::ALL.into_iter().filter_map(ProviderConfig::from_env).collect();
        let mut cfg = Self::new(providers)?;

        if let Ok(p) = std::env::var("GHOST_PRIMARY_PROVIDER") {
            match p.parse::<Provider>() {
                Ok(p) if cfg.get(p).is_some() => cfg.primary = p,
                Ok(p) => warn!(provider = %p, "primary provider has no API key, using {}", cfg.primary),
                Err(e) => warn!(error = %e, "ignoring GHOST_PRIMARY_PROVIDER"),
            }
        }
        cfg.fallback = std::env::var("GHOST_PROVIDER_FALLBACK")
            .map(|v| !matches!(v.trim(), "0" | "false" | "off" | "no"))
            .unwrap_or(true);
        Some(cfg)
    }

    pub fn get(&self, provider: Provider) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.provider == provider)
    }

    /// Ordered list of (provider, model) attempts for a model reference.
    ///
    /// `provider:model` pins the provider, `provider` alone uses its default
    /// model, and a bare model name runs on the primary. With fallback on,
    /// the remaining providers follow with their default models.
    pub fn plan(&self, model_ref: Option<&str>) -> Result<Vec<(&ProviderConfig, String)>, GhostError> {
        let model_ref = model_ref.map(str::trim).filter(|m| !m.is_empty());
        let (first, model) = match model_ref {
            None => (self.primary, None),
            Some(r) => match r.split_once(':') {
                Some((p, m)) if p.parse::<Provider>().is_ok() => {
                    (p.parse::<Provider>()?, Some(m.trim().to_string()).filter(|m| !m.is_empty()))
                }
                _ => match r.parse::<Provider>() {
                    Ok(p) => (p, None),
                    Err(_) => (self.primary, Some(r.to_string())),
                },
            },
        };

        let head = self
            .get(first)
            .ok_or_else(|| GhostError::Validation(format!("provider {first} is not configured")))?;
        let mut plan = vec![(head, model.unwrap_or_else(|| head.model.clone()))];
        if self.fallback {
            plan.extend(
                self.providers
                    .iter()
                    .filter(|p| p.provider != first)
                    .map(|p| (p, p.model.clone())),
            );
        }
        Ok(plan)
    }

    pub fn status(&self) -> Vec<ProviderStatus> {
        status(Some(self))
    }
}

/// One row per known provider, configured or not.
pub fn status(cfg: Option<&LlmConfig>) -> Vec<ProviderStatus> {
    Provider::ALL
        .into_iter()
        .map(|p| {
            let pc = cfg.and_then(|c| c.get(p));
            ProviderStatus {
                name: p.name(),
                configured: pc.is_some(),
                model: pc.map(|c| c.model.clone()).unwrap_or_else(|| p.default_model().to_string()),
                primary: pc.is_some() && cfg.is_some_and(|c| c.primary == p),
                supports_tools: p.supports_tools(),
            }
        })
        .collect()
}

#[derive(Debug, Serialize)]
pub struct ProviderStatus {
    pub name: &'static str,
    pub model: String,
    pub configured: bool,
    pub primary: bool,
    pub supports_tools: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One entry of a conversation. Tool calls and tool results ride on the
/// same type so a session can be replayed to any provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: MessageRole,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Tool name on `tool` messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    fn plain(role: MessageRole, content: impl Into<String>) -> Self {
        Self { role, content: content.into(), tool_calls: vec![], tool_call_id: None, name: None }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(MessageRole::Assistant, content)
    }

    pub fn assistant_tool_calls(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self { tool_calls: calls, ..Self::plain(MessageRole::Assistant, content) }
    }

    pub fn tool_result(call: &ToolCall, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call.id.clone()),
            name: Some(call.name.clone()),
            ..Self::plain(MessageRole::Tool, content)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolDef {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: serde_json::Value,
}

/// Tools sent with one request.
///
/// `Final` still carries the definitions but forbids new calls. The
/// Anthropic API rejects `tool_use` history without definitions, so a forced
/// final answer can't simply drop them.
#[derive(Debug, Clone, Copy, Default)]
pub enum ToolOffer<'a> {
    #[default]
    Off,
    Auto(&'a [ToolDef]),
    Final(&'a [ToolDef]),
}

impl<'a> ToolOffer<'a> {
    pub fn defs(self) -> Option<&'a [ToolDef]> {
        match self {
            ToolOffer::Off => None,
            ToolOffer::Auto(d) | ToolOffer::Final(d) => Some(d).filter(|d| !d.is_empty()),
        }
    }

    pub fn allows_calls(self) -> bool {
        matches!(self, ToolOffer::Auto(d) if !d.is_empty())
    }
}

/// Parsed model output, independent of wire shape.
#[derive(Debug, Clone, Default)]
pub(crate) struct WireReply {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
}

#[derive(Debug, Clone)]
pub struct LlmReply {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
    pub provider: Provider,
    pub model: String,
}

impl LlmReply {
    /// `provider:model`, the form stored on sessions.
    pub fn model_ref(&self) -> String {
        format!("{}:{}", self.provider, self.model)
    }
}

/// Run one completion, walking the fallback plan until a provider answers.
/// The last provider error is returned when all of them fail.
pub async fn complete(
    client: &reqwest::Client,
    cfg: &LlmConfig,
    model_ref: Option<&str>,
    messages: &[ChatMessage],
    tools: ToolOffer<'_>,
) -> Result<LlmReply, GhostError> {
    let plan = cfg.plan(model_ref)?;
    let mut last_err = None;
    for (pc, model) in plan {
        match call_provider(client, pc, &model, messages, tools).await {
            Ok(reply) => return Ok(reply),
            Err(e) => {
                warn!(provider = %pc.provider, %model, error = %e, "provider call failed");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or(GhostError::AiNotConfigured))
}

/// Call a single provider, no fallback.
pub async fn call_provider(
    client: &reqwest::Client,
    pc: &ProviderConfig,
    model: &str,
    messages: &[ChatMessage],
    tools: ToolOffer<'_>,
) -> Result<LlmReply, GhostError> {
    let tools = if tools.defs().is_some() && pc.provider.supports_tools() { tools } else { ToolOffer::Off };
    let start = std::time::Instant::now();

    let builder = match pc.provider.wire() {
        Wire::OpenAi => {
            let body = openai::build_request(model, messages, tools);
            let mut b = client.post(&pc.url).bearer_auth(&pc.key).json(&body);
            if pc.provider == Provider::OpenRouter {
                b = b
                    .header("HTTP-Referer", "https://github.com/ghost-protocol")
                    .header("X-Title", "Ghost Protocol");
            }
            b
        }
        Wire::Anthropic => {
            let body = anthropic::build_request(model, messages, tools, MAX_OUTPUT_TOKENS);
            client
                .post(&pc.url)
                .header("x-api-key", &pc.key)
                .header("anthropic-version", "2023-06-01")
                .json(&body)
        }
        Wire::Gemini => {
            let body = gemini::build_request(messages, tools, MAX_OUTPUT_TOKENS);
            let url = format!("{}/models/{}:generateContent", pc.url.trim_end_matches('/'), model);
            client.post(url).query(&[("key", pc.key.as_str())]).json(&body)
        }
    };

    let resp = builder
        .send()
        .await
        .map_err(|e| ai_err(format!("{} request failed: {e}", pc.provider)))?;
    let status = resp.status();
    let text = resp
        .text()
        .await
        .map_err(|e| ai_err(format!("{} response read failed: {e}", pc.provider)))?;
    if !status.is_success() {
        return Err(ai_err(format!(
            "{} returned {status}: {}",
            pc.provider,
            truncate_chars(&text, 300)
        )));
    }

    let parsed = match pc.provider.wire() {
        Wire::OpenAi => openai::parse_response(&text),
        Wire::Anthropic => anthropic::parse_response(&text),
        Wire::Gemini => gemini::parse_response(&text),
    }
    .map_err(|e| ai_err(format!("{}: {e}", pc.provider)))?;

    debug!(
        provider = %pc.provider,
        model,
        tool_calls = parsed.tool_calls.len(),
        tokens = parsed.usage.total_tokens,
        ms = start.elapsed().as_millis() as u64,
        "completion"
    );
    Ok(LlmReply {
        content: parsed.content,
        tool_calls: parsed.tool_calls,
        usage: parsed.usage,
        provider: pc.provider,
        model: model.to_string(),
    })
}

/// Tool results are JSON text; providers that want structured results get
/// an object, wrapping anything else.
fn tool_result_value(content: &str) -> serde_json::Value {
    match serde_json::from_str::<serde_json::Value>(content) {
        Ok(v @ serde_json::Value::Object(_)) => v,
        Ok(v) => serde_json::json!({ "result": v }),
        Err(_) => serde_json::json!({ "result": content }),
    }
}
