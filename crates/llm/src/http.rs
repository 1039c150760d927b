//! HTTP-based generation backends.
//!
//! Supports OpenAI-compatible APIs (OpenAI, Google Gemini, DeepSeek, etc.)
//! and Anthropic's native Messages API.

use crate::provider::{
    GenerateFuture, GenerateRequest, LlmError, LlmProvider, ProviderRegistry, Role,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Per-request timeout applied when none is configured.
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Inferred provider kind from model name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Google,
    DeepSeek,
    /// Falls back to OpenAI-compatible format.
    Unknown,
}

impl ProviderKind {
    /// Infer provider from model name prefix.
    pub fn from_model(model: &str) -> Self {
        let m = model.to_lowercase();
        if m.starts_with("gpt-")
            || m.starts_with("o1-")
            || m.starts_with("o3-")
            || m.starts_with("o4-")
        {
            Self::OpenAi
        } else if m.starts_with("claude-") {
            Self::Anthropic
        } else if m.starts_with("gemini-") {
            Self::Google
        } else if m.starts_with("deepseek-") {
            Self::DeepSeek
        } else {
            Self::Unknown
        }
    }

    fn default_base_url(self) -> &'static str {
        match self {
            Self::OpenAi | Self::Unknown => "https://api.openai.com/v1",
            Self::Anthropic => "https://api.anthropic.com",
            Self::Google => "https://generativelanguage.googleapis.com/v1beta/openai",
            Self::DeepSeek => "https://api.deepseek.com",
        }
    }

    fn is_anthropic(self) -> bool {
        matches!(self, Self::Anthropic)
    }
}

// ── OpenAI-compatible request/response types ──

#[derive(Serialize)]
struct OaiRequest {
    model: String,
    messages: Vec<OaiMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct OaiMessage {
    role: &'static str,
    content: OaiContent,
}

#[derive(Serialize)]
#[serde(untagged)]
enum OaiContent {
    Text(String),
    Parts(Vec<OaiPart>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OaiPart {
    Text { text: String },
    ImageUrl { image_url: OaiImageUrl },
}

#[derive(Serialize)]
struct OaiImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct OaiResponse {
    choices: Vec<OaiChoice>,
}

#[derive(Deserialize)]
struct OaiChoice {
    message: OaiChoiceMessage,
}

#[derive(Deserialize)]
struct OaiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

// ── Anthropic Messages API types ──

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    temperature: f32,
}

#[derive(Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: AnthropicMessageContent,
}

/// Message content: either a plain string or an array of content blocks.
#[derive(Serialize)]
#[serde(untagged)]
enum AnthropicMessageContent {
    Text(String),
    Blocks(Vec<AnthropicBlock>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicBlock {
    Text { text: String },
    Image { source: AnthropicImageSource },
}

#[derive(Serialize)]
struct AnthropicImageSource {
    #[serde(rename = "type")]
    kind: &'static str,
    url: String,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicResponseBlock>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicResponseBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

// ── Provider ──

/// HTTP-based provider. Handles both OpenAI-compatible and Anthropic APIs.
pub struct HttpProvider {
    kind: ProviderKind,
    model: String,
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpProvider {
    /// Build from model name + API key + optional base URL override.
    pub fn new(model: String, api_key: String, base_url: Option<String>) -> Self {
        Self::with_timeout(model, api_key, base_url, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Same as [`HttpProvider::new`] with an explicit per-request timeout.
    pub fn with_timeout(
        model: String,
        api_key: String,
        base_url: Option<String>,
        timeout: Duration,
    ) -> Self {
        let kind = ProviderKind::from_model(&model);
        let base = base_url.unwrap_or_else(|| kind.default_base_url().to_owned());
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            kind,
            model,
            client,
            base_url: base.trim_end_matches('/').to_owned(),
            api_key,
        }
    }

    fn endpoint(&self) -> String {
        if self.kind.is_anthropic() {
            format!("{}/v1/messages", self.base_url)
        } else {
            format!("{}/chat/completions", self.base_url)
        }
    }
}

fn role_str(role: &Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

/// Parse error response, returning RateLimited for 429.
fn check_error(status: reqwest::StatusCode, body: String) -> LlmError {
    match status.as_u16() {
        429 => LlmError::RateLimited,
        401 | 403 => LlmError::Unavailable(format!("{status}: {body}")),
        _ => LlmError::RequestFailed(format!("{status}: {body}")),
    }
}

fn transport_error(e: reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout
    } else if e.is_connect() {
        LlmError::Unavailable(e.to_string())
    } else {
        LlmError::RequestFailed(e.to_string())
    }
}

impl LlmProvider for HttpProvider {
    fn name(&self) -> &str {
        match self.kind {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Google => "google",
            ProviderKind::DeepSeek => "deepseek",
            ProviderKind::Unknown => "unknown",
        }
    }

    fn generate(&self, request: GenerateRequest) -> GenerateFuture<'_> {
        if self.kind.is_anthropic() {
            Box::pin(self.generate_anthropic(request))
        } else {
            Box::pin(self.generate_openai(request))
        }
    }
}

impl HttpProvider {
    /// OpenAI-compatible completion (OpenAI, Gemini, DeepSeek, Unknown).
    async fn generate_openai(&self, request: GenerateRequest) -> Result<String, LlmError> {
        let mut messages = Vec::with_capacity(request.context.len() + 2);
        if let Some(system) = &request.system_prompt {
            messages.push(OaiMessage {
                role: "system",
                content: OaiContent::Text(system.clone()),
            });
        }
        messages.extend(request.context.iter().map(|m| OaiMessage {
            role: role_str(&m.role),
            content: OaiContent::Text(m.content.clone()),
        }));
        let user_content = if request.image_refs.is_empty() {
            OaiContent::Text(request.prompt.clone())
        } else {
            let mut parts = vec![OaiPart::Text { text: request.prompt.clone() }];
            parts.extend(request.image_refs.iter().map(|url| OaiPart::ImageUrl {
                image_url: OaiImageUrl { url: url.clone() },
            }));
            OaiContent::Parts(parts)
        };
        messages.push(OaiMessage { role: "user", content: user_content });

        let body = OaiRequest {
            model: self.model.clone(),
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let resp = self.client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(check_error(status, text));
        }

        let api: OaiResponse = resp.json().await.map_err(transport_error)?;

        Ok(api.choices.into_iter().next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }

    /// Anthropic Messages API completion.
    async fn generate_anthropic(&self, request: GenerateRequest) -> Result<String, LlmError> {
        let mut system = request.system_prompt.clone();
        let mut messages: Vec<AnthropicMessage> = Vec::with_capacity(request.context.len() + 1);
        for m in &request.context {
            if m.role == Role::System {
                // Anthropic takes the system prompt at top level.
                system = Some(match system {
                    Some(s) => format!("{s}\n\n{}", m.content),
                    None => m.content.clone(),
                });
                continue;
            }
            messages.push(AnthropicMessage {
                role: role_str(&m.role),
                content: AnthropicMessageContent::Text(m.content.clone()),
            });
        }

        let user_content = if request.image_refs.is_empty() {
            AnthropicMessageContent::Text(request.prompt.clone())
        } else {
            let mut blocks: Vec<AnthropicBlock> = request.image_refs.iter().map(|url| {
                AnthropicBlock::Image {
                    source: AnthropicImageSource { kind: "url", url: url.clone() },
                }
            }).collect();
            blocks.push(AnthropicBlock::Text { text: request.prompt.clone() });
            AnthropicMessageContent::Blocks(blocks)
        };
        messages.push(AnthropicMessage { role: "user", content: user_content });

        let body = AnthropicRequest {
            model: self.model.clone(),
            max_tokens: request.max_tokens,
            system,
            messages,
            temperature: request.temperature,
        };

        let resp = self.client
            .post(self.endpoint())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(check_error(status, text));
        }

        let api: AnthropicResponse = resp.json().await.map_err(transport_error)?;

        Ok(api.content.into_iter().filter_map(|b| match b {
            AnthropicResponseBlock::Text { text } => Some(text),
            AnthropicResponseBlock::Other => None,
        }).collect::<Vec<_>>().join(""))
    }
}

/// Parse a `MURMUR_PROVIDERS` style spec: `id=model,id2=model2`.
/// Entries without `=` use the model name as the id.
pub fn parse_provider_specs(spec: &str) -> Vec<(String, String)> {
    spec.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((id, model)) => (id.trim().to_owned(), model.trim().to_owned()),
            None => (entry.to_owned(), entry.to_owned()),
        })
        .filter(|(id, model)| !id.is_empty() && !model.is_empty())
        .collect()
}

/// Build a registry from environment variables.
/// Reads `MURMUR_PROVIDERS`, `MURMUR_LLM_API_KEY`, optionally `MURMUR_LLM_BASE_URL`
/// and `MURMUR_LLM_TIMEOUT_SECS`. Returns an empty registry if unset.
pub fn registry_from_env() -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    let Ok(spec) = std::env::var("MURMUR_PROVIDERS") else {
        return registry;
    };
    let Ok(api_key) = std::env::var("MURMUR_LLM_API_KEY") else {
        tracing::warn!("MURMUR_PROVIDERS set but MURMUR_LLM_API_KEY missing, no providers registered");
        return registry;
    };
    let base_url = std::env::var("MURMUR_LLM_BASE_URL").ok();
    let timeout = std::env::var("MURMUR_LLM_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_TIMEOUT_SECS);

    for (id, model) in parse_provider_specs(&spec) {
        let provider = HttpProvider::with_timeout(
            model,
            api_key.clone(),
            base_url.clone(),
            Duration::from_secs(timeout),
        );
        registry.register(id, Arc::new(provider));
    }
    registry
}
