//! Prompt collaborator. The core treats every rendered prompt as opaque;
//! [`BasicPrompts`] is a plain-text implementation for the binary and tests.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use murmur_llm::provider::ChatMessage;
use murmur_llm::GenerateRequest;

use crate::cache::SingleFlight;
use crate::error::EngageError;
use crate::types::{ConversationState, InboundMessage, ReplyKind, UserProfile};

/// Lines of history kept per conversation.
const HISTORY_CAP: usize = 30;

#[async_trait]
pub trait PromptSource: Send + Sync {
    /// Called for every message that reaches the engine, before gating.
    fn observe(&self, _message: &InboundMessage) {}

    /// Called after a reply was delivered.
    fn record_reply(&self, _conversation_id: &str, _text: &str) {}

    /// Drop everything kept for a conversation that was reset.
    fn forget(&self, _conversation_id: &str) {}

    async fn judge_prompt(
        &self,
        message: &InboundMessage,
        state: &ConversationState,
        profile: Option<&UserProfile>,
    ) -> Result<GenerateRequest, EngageError>;

    async fn batch_prompt(&self, conversation_id: &str, count: u32) -> Result<GenerateRequest, EngageError>;

    async fn recovery_prompt(&self, conversation_id: &str) -> Result<GenerateRequest, EngageError>;

    async fn reply_prompt(&self, message: &InboundMessage, kind: ReplyKind) -> Result<GenerateRequest, EngageError>;

    async fn proactive_prompt(&self, conversation_id: &str) -> Result<GenerateRequest, EngageError>;
}

#[derive(Debug, Clone)]
enum Line {
    User { name: String, text: String },
    Bot(String),
}

/// Plain-text prompts over an in-memory rolling history.
pub struct BasicPrompts {
    persona_file: Option<PathBuf>,
    personas: SingleFlight<PathBuf, Arc<str>>,
    include_reasoning: bool,
    reply_threshold: f32,
    history: Mutex<HashMap<String, VecDeque<Line>>>,
}

impl BasicPrompts {
    pub fn new(include_reasoning: bool, reply_threshold: f32) -> Self {
        Self {
            persona_file: None,
            personas: SingleFlight::new(),
            include_reasoning,
            reply_threshold,
            history: Mutex::new(HashMap::new()),
        }
    }

    /// Read the persona from a file, once, on first use.
    pub fn with_persona_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.persona_file = Some(path.into());
        self
    }

    async fn persona(&self) -> Result<Option<Arc<str>>, EngageError> {
        let Some(path) = &self.persona_file else {
            return Ok(None);
        };
        let text = self
            .personas
            .get_or_try_init(path.clone(), || async {
                let raw = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|e| EngageError::Prompt(format!("persona {}: {e}", path.display())))?;
                tracing::info!(path = %path.display(), chars = raw.len(), "persona loaded");
                Ok::<_, EngageError>(Arc::from(raw.trim()))
            })
            .await?;
        Ok(Some(text))
    }

    fn push(&self, conversation_id: &str, line: Line) {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        let lines = history.entry(conversation_id.to_owned()).or_default();
        if lines.len() == HISTORY_CAP {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    fn recent(&self, conversation_id: &str, n: usize) -> Vec<Line> {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history
            .get(conversation_id)
            .map(|lines| lines.iter().rev().take(n).rev().cloned().collect())
            .unwrap_or_default()
    }

    fn transcript(&self, conversation_id: &str, n: usize) -> String {
        self.recent(conversation_id, n)
            .into_iter()
            .map(|line| match line {
                Line::User { name, text } => format!("[{name}] {text}"),
                Line::Bot(text) => format!("[me] {text}"),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn context(&self, conversation_id: &str, n: usize) -> Vec<ChatMessage> {
        self.recent(conversation_id, n)
            .into_iter()
            .map(|line| match line {
                Line::User { name, text } => ChatMessage::user(format!("[{name}] {text}")),
                Line::Bot(text) => ChatMessage::assistant(text),
            })
            .collect()
    }

    async fn request(&self, prompt: String) -> Result<GenerateRequest, EngageError> {
        let req = GenerateRequest::new(prompt);
        Ok(match self.persona().await? {
            Some(persona) => req.with_system(persona.to_string()),
            None => req,
        })
    }
}

#[async_trait]
impl PromptSource for BasicPrompts {
    fn observe(&self, message: &InboundMessage) {
        self.push(
            &message.conversation_id,
            Line::User { name: message.sender_name.clone(), text: message.text.clone() },
        );
    }

    fn record_reply(&self, conversation_id: &str, text: &str) {
        self.push(conversation_id, Line::Bot(text.to_owned()));
    }

    fn forget(&self, conversation_id: &str) {
        self.history.lock().unwrap_or_else(|e| e.into_inner()).remove(conversation_id);
    }

    async fn judge_prompt(
        &self,
        message: &InboundMessage,
        state: &ConversationState,
        profile: Option<&UserProfile>,
    ) -> Result<GenerateRequest, EngageError> {
        let relation = profile
            .map(|p| format!("{} (score {:.1})", p.relationship_tier.as_str(), p.social_score))
            .unwrap_or_else(|| "unknown".to_owned());
        let reasoning = if self.include_reasoning { ",\n  \"reasoning\": \"short explanation\"" } else { "" };
        let prompt = format!(
            "Decide whether to join this group chat.\n\
             My energy: {energy:.2}, my mood: {mood:.2}, relationship with sender: {relation}.\n\
             Recent messages:\n{history}\n\n\
             Message to judge from [{sender}]: {text}\n\n\
             Score each criterion from 0 to 10 (reply threshold {threshold}):\n\
             relevance, willingness, social, timing, continuity.\n\
             Answer with JSON only:\n\
             {{\n  \"relevance\": 0,\n  \"willingness\": 0,\n  \"social\": 0,\n  \"timing\": 0,\n  \
             \"continuity\": 0,\n  \"inferred_mood\": \"positive|neutral|negative\"{reasoning}\n}}",
            energy = state.energy,
            mood = state.mood,
            history = self.transcript(&message.conversation_id, 10),
            sender = message.sender_name,
            text = message.text,
            threshold = self.reply_threshold,
        );
        let mut req = self.request(prompt).await?.with_temperature(0.2);
        req.image_refs = message.image_refs.clone();
        Ok(req)
    }

    async fn batch_prompt(&self, conversation_id: &str, count: u32) -> Result<GenerateRequest, EngageError> {
        let prompt = format!(
            "These are the last {count} messages of a group chat:\n{}\n\n\
             Is one summarising reply from me warranted? Answer YES or NO.",
            self.transcript(conversation_id, count as usize),
        );
        Ok(self.request(prompt).await?.with_temperature(0.0))
    }

    async fn recovery_prompt(&self, conversation_id: &str) -> Result<GenerateRequest, EngageError> {
        let prompt = format!(
            "I was unable to follow this group chat for a while. Recent messages:\n{}\n\n\
             Should I say something now? Answer YES or NO.",
            self.transcript(conversation_id, HISTORY_CAP),
        );
        Ok(self.request(prompt).await?.with_temperature(0.0))
    }

    async fn reply_prompt(&self, message: &InboundMessage, kind: ReplyKind) -> Result<GenerateRequest, EngageError> {
        let prompt = match kind {
            ReplyKind::Batch { count } => format!(
                "Reply once to the last {count} messages as a whole. Keep it short and natural."
            ),
            ReplyKind::Recovery => "Rejoin the conversation with one short, natural message.".to_owned(),
            ReplyKind::PerMessage | ReplyKind::Proactive => format!(
                "Reply to [{}]: {}\nKeep it short and natural.",
                message.sender_name, message.text
            ),
        };
        let mut req = self.request(prompt).await?.with_context(self.context(&message.conversation_id, 20));
        req.image_refs = message.image_refs.clone();
        Ok(req)
    }

    async fn proactive_prompt(&self, conversation_id: &str) -> Result<GenerateRequest, EngageError> {
        let prompt = "The group has been quiet for a while. Start a light, natural topic in one short message.";
        Ok(self.request(prompt.to_owned()).await?.with_context(self.context(conversation_id, 10)))
    }
}
