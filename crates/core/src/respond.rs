use std::sync::Arc;

use async_trait::async_trait;
use murmur_llm::ElasticDispatcher;

use crate::prompt::PromptSource;
use crate::types::{InboundMessage, ReplyKind};

/// Reply composition collaborator. `None` means no text could be produced;
/// the engine then treats the message as unanswered.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn compose(&self, message: &InboundMessage, kind: ReplyKind) -> Option<String>;

    /// Opening line for a quiet conversation.
    async fn open(&self, conversation_id: &str) -> Option<String>;
}

/// Composes replies through the reply chain (reply pool → general pool).
/// Opening lines may use their own chain.
pub struct DispatchResponder {
    dispatcher: ElasticDispatcher,
    prompts: Arc<dyn PromptSource>,
    chain: Vec<String>,
    opening_chain: Vec<String>,
}

impl DispatchResponder {
    pub fn new(dispatcher: ElasticDispatcher, prompts: Arc<dyn PromptSource>, chain: Vec<String>) -> Self {
        Self { dispatcher, prompts, opening_chain: chain.clone(), chain }
    }

    pub fn with_opening_chain(mut self, chain: Vec<String>) -> Self {
        self.opening_chain = chain;
        self
    }
}

#[async_trait]
impl Responder for DispatchResponder {
    async fn compose(&self, message: &InboundMessage, kind: ReplyKind) -> Option<String> {
        let request = match self.prompts.reply_prompt(message, kind).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(conversation = %message.conversation_id, error = %e, "reply prompt unavailable");
                return None;
            }
        };
        let out = self.dispatcher.text(&self.chain, 0, &request).await?;
        tracing::debug!(conversation = %message.conversation_id, provider = %out.provider_id, ?kind, "reply composed");
        Some(out.value)
    }

    async fn open(&self, conversation_id: &str) -> Option<String> {
        let request = match self.prompts.proactive_prompt(conversation_id).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(conversation = %conversation_id, error = %e, "proactive prompt unavailable");
                return None;
            }
        };
        self.dispatcher.text(&self.opening_chain, 0, &request).await.map(|d| d.value)
    }
}
