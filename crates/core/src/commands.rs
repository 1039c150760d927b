//! Operator commands: thin reads and deletes against the store.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::affect::AffectStore;
use crate::error::EngageError;
use crate::persistence::SnapshotStore;
use crate::prompt::PromptSource;
use crate::scoring::overload::OverloadTracker;
use crate::scoring::OverloadStatus;
use crate::types::{JudgmentMode, RelationshipTier};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeakerStatus {
    pub user_id: String,
    pub display_name: String,
    pub social_score: f32,
    pub tier: RelationshipTier,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub conversation_id: String,
    pub mode: JudgmentMode,
    pub message_counter: u32,
    /// Batch size or per-message window, depending on mode.
    pub window: u32,
    pub consecutive_reply_count: u32,
    pub max_consecutive_replies: u32,
    pub energy: f32,
    pub mood: f32,
    pub minutes_since_reply: Option<i64>,
    pub total_messages: u64,
    pub total_replies: u64,
    pub speaker: Option<SpeakerStatus>,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "conversation {}", self.conversation_id)?;
        writeln!(f, "  mode: {} ({}/{})", self.mode.as_str(), self.message_counter, self.window)?;
        writeln!(f, "  cooldown: {}/{}", self.consecutive_reply_count, self.max_consecutive_replies)?;
        writeln!(f, "  energy: {:.2}  mood: {:+.2}", self.energy, self.mood)?;
        match self.minutes_since_reply {
            Some(m) => writeln!(f, "  last reply: {m} min ago")?,
            None => writeln!(f, "  last reply: never")?,
        }
        write!(f, "  messages: {}  replies: {}", self.total_messages, self.total_replies)?;
        if let Some(s) = &self.speaker {
            write!(f, "\n  {}: {} ({:.1})", s.display_name, s.tier.as_str(), s.social_score)?;
        }
        Ok(())
    }
}

impl fmt::Display for OverloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.in_cooldown, self.deadline) {
            (true, Some(deadline)) => write!(
                f,
                "overloaded: cooling down for {}s more (until {})",
                self.remaining_secs,
                deadline.format("%H:%M:%S")
            )?,
            _ => write!(f, "not in cooldown")?,
        }
        if self.pending_recovery {
            write!(f, "; recovery judgment pending")?;
        }
        Ok(())
    }
}

pub struct Commands {
    store: AffectStore,
    overload: Arc<OverloadTracker>,
    snapshots: Arc<dyn SnapshotStore>,
    prompts: Option<Arc<dyn PromptSource>>,
}

impl Commands {
    pub fn new(store: AffectStore, overload: Arc<OverloadTracker>, snapshots: Arc<dyn SnapshotStore>) -> Self {
        Self { store, overload, snapshots, prompts: None }
    }

    /// Also drop the prompt history of reset conversations.
    pub fn with_prompts(mut self, prompts: Arc<dyn PromptSource>) -> Self {
        self.prompts = Some(prompts);
        self
    }

    /// Delete a conversation's state, overload entries and prompt history,
    /// then persist. Returns whether the conversation existed.
    pub async fn reset_conversation(&self, conversation_id: &str) -> Result<bool, EngageError> {
        let existed = self.store.delete_conversation(conversation_id);
        self.overload.clear(conversation_id);
        if let Some(prompts) = &self.prompts {
            prompts.forget(conversation_id);
        }
        self.snapshots.save(&self.store.snapshot()).await?;
        tracing::info!(conversation = %conversation_id, existed, "conversation reset");
        Ok(existed)
    }

    /// Status of an existing conversation; never creates one.
    pub fn status(&self, conversation_id: &str, speaker_id: Option<&str>, now: DateTime<Utc>) -> Option<StatusReport> {
        let state = self.store.conversation_if_present(conversation_id)?;
        let cfg = self.store.cfg();
        let window = match state.mode {
            JudgmentMode::Batched => cfg.batch_size,
            JudgmentMode::PerMessage => cfg.per_message_window,
        };
        let speaker = speaker_id
            .filter(|_| cfg.enable_user_profiles)
            .and_then(|id| self.store.user_if_present(id))
            .map(|p| SpeakerStatus {
                user_id: p.user_id,
                display_name: p.display_name,
                social_score: p.social_score,
                tier: p.relationship_tier,
            });
        Some(StatusReport {
            conversation_id: conversation_id.to_owned(),
            mode: state.mode,
            message_counter: state.message_counter,
            window,
            consecutive_reply_count: state.consecutive_reply_count,
            max_consecutive_replies: cfg.max_consecutive_replies,
            energy: state.energy,
            mood: state.mood,
            minutes_since_reply: state.minutes_since_reply(now),
            total_messages: state.total_messages,
            total_replies: state.total_replies,
            speaker,
        })
    }

    pub fn overload_status(&self, conversation_id: &str, now: DateTime<Utc>) -> OverloadStatus {
        self.overload.status(conversation_id, now)
    }
}
