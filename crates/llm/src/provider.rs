use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A single prior turn handed to a backend as context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Backend-agnostic generation request: `generate(prompt, context, systemPrompt, imageRefs)`.
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    pub prompt: String,
    /// Prior turns, oldest first.
    pub context: Vec<ChatMessage>,
    pub system_prompt: Option<String>,
    /// Image URLs forwarded to vision-capable backends.
    pub image_refs: Vec<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            max_tokens: 512,
            temperature: 0.7,
            ..Self::default()
        }
    }

    pub fn with_system(mut self, system_prompt: impl Into<String>) -> Self {
        let s = system_prompt.into();
        self.system_prompt = (!s.is_empty()).then_some(s);
        self
    }

    pub fn with_context(mut self, context: Vec<ChatMessage>) -> Self {
        self.context = context;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Error type for backend calls.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("rate limited")]
    RateLimited,
    #[error("request timed out")]
    Timeout,
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("empty response")]
    EmptyResponse,
}

pub type GenerateFuture<'a> = Pin<Box<dyn Future<Output = Result<String, LlmError>> + Send + 'a>>;

/// Trait for generation backends (OpenAI-compatible, Anthropic, test doubles).
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    fn generate(&self, request: GenerateRequest) -> GenerateFuture<'_>;
}

/// Resolves provider ids to callables. A missing id is a normal failover case.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: impl Into<String>, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(id.into(), provider);
    }

    pub fn with(mut self, id: impl Into<String>, provider: Arc<dyn LlmProvider>) -> Self {
        self.register(id, provider);
        self
    }

    pub fn resolve(&self, id: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers.get(id).cloned()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&str> = self.ids().collect();
        ids.sort_unstable();
        f.debug_struct("ProviderRegistry").field("providers", &ids).finish()
    }
}

/// Test double that replays a queue of canned results.
/// Once the queue is drained, the last result repeats.
#[derive(Clone)]
pub struct ScriptedProvider {
    name: String,
    script: Arc<Mutex<VecDeque<Result<String, LlmError>>>>,
    last: Arc<Mutex<Option<Result<String, LlmError>>>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedProvider {
    pub fn new(name: impl Into<String>, script: Vec<Result<String, LlmError>>) -> Self {
        Self {
            name: name.into(),
            script: Arc::new(Mutex::new(script.into())),
            last: Arc::new(Mutex::new(None)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Always answers with the same text.
    pub fn always(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(name, vec![Ok(text.into())])
    }

    /// Always fails with the given error.
    pub fn failing(name: impl Into<String>, err: LlmError) -> Self {
        Self::new(name, vec![Err(err)])
    }

    /// Number of `generate` calls observed so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_result(&self) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        match script.pop_front() {
            Some(result) => {
                *last = Some(result.clone());
                result
            }
            None => last
                .clone()
                .unwrap_or_else(|| Err(LlmError::Unavailable(format!("{} has no script", self.name)))),
        }
    }
}

impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn generate(&self, _request: GenerateRequest) -> GenerateFuture<'_> {
        let result = self.next_result();
        Box::pin(async move { result })
    }
}
