//! Per-conversation engagement state machine.
//!
//! `Batched` conversations buffer messages and run one summary judgment per
//! batch; `PerMessage` conversations score every message. Forced messages
//! (bonus score or special event) are always scored individually and skip
//! both the overload cooldown and the consecutive-reply veto.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::affect::EngineHandle;
use crate::config::EngageCfg;
use crate::error::EngageError;
use crate::prompt::PromptSource;
use crate::respond::Responder;
use crate::scoring::overload::OverloadTracker;
use crate::scoring::{BinaryJudgment, ScoringEngine};
use crate::types::{
    ConversationState, InboundMessage, InferredMood, JudgmentMode, Outcome, ReplyKind,
    ScoringVerdict, SilenceReason,
};

/// Mood scales the static threshold by up to ±50%.
const MOOD_THRESHOLD_FACTOR: f32 = 0.5;
const DYNAMIC_THRESHOLD_MIN: f32 = 0.2;
const DYNAMIC_THRESHOLD_MAX: f32 = 0.9;

/// `clamp(static × (1 − mood × 0.5), 0.2, 0.9)`.
pub fn dynamic_threshold(static_threshold: f32, mood: f32) -> f32 {
    (static_threshold * (1.0 - mood * MOOD_THRESHOLD_FACTOR)).clamp(DYNAMIC_THRESHOLD_MIN, DYNAMIC_THRESHOLD_MAX)
}

/// Final per-message decision after the verdict.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub dynamic_threshold: f32,
    pub reply: bool,
    /// A reply was warranted but the consecutive-reply cooldown blocked it.
    pub vetoed: bool,
}

pub fn decide(cfg: &EngageCfg, state: &ConversationState, verdict: &ScoringVerdict, forced: bool) -> Decision {
    let threshold = dynamic_threshold(cfg.reply_threshold, state.mood);
    if verdict.exhausted {
        return Decision { dynamic_threshold: threshold, reply: false, vetoed: false };
    }
    let wants = verdict.overall_score >= threshold || state.energy >= cfg.energy_threshold;
    let vetoed = wants && !forced && state.consecutive_reply_count >= cfg.max_consecutive_replies;
    Decision { dynamic_threshold: threshold, reply: wants && !vetoed, vetoed }
}

pub struct EngagementMachine {
    cfg: Arc<EngageCfg>,
    store: EngineHandle,
    scoring: ScoringEngine,
    prompts: Arc<dyn PromptSource>,
    responder: Arc<dyn Responder>,
}

impl EngagementMachine {
    pub fn new(
        cfg: Arc<EngageCfg>,
        store: EngineHandle,
        scoring: ScoringEngine,
        prompts: Arc<dyn PromptSource>,
        responder: Arc<dyn Responder>,
    ) -> Self {
        Self { cfg, store, scoring, prompts, responder }
    }

    pub fn overload(&self) -> &Arc<OverloadTracker> {
        self.scoring.overload()
    }

    pub async fn handle(&self, message: &InboundMessage) -> Outcome {
        self.handle_at(message, Utc::now()).await
    }

    /// Handle one message at `now`. Never fails: any collaborator error is
    /// logged and becomes silence.
    pub async fn handle_at(&self, message: &InboundMessage, now: DateTime<Utc>) -> Outcome {
        match self.process(message, now).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(
                    conversation = %message.conversation_id,
                    message_id = %message.id,
                    error = %e,
                    "message handling failed, staying silent"
                );
                Outcome::Silent(SilenceReason::Error)
            }
        }
    }

    async fn process(&self, message: &InboundMessage, now: DateTime<Utc>) -> Result<Outcome, EngageError> {
        let id = message.conversation_id.as_str();
        let forced = message.is_forced();
        self.prompts.observe(message);

        if !forced {
            let overload = self.scoring.overload();
            if overload.in_cooldown(id, now) {
                tracing::debug!(conversation = %id, "overload cooldown, message dropped");
                return Ok(Outcome::Silent(SilenceReason::Cooldown));
            }
            if overload.claim_recovery(id, now) {
                return self.recover(message, now).await;
            }
        }

        if self.cfg.enable_user_profiles {
            self.store.touch_user(&message.sender_id, &message.sender_name, now);
        }

        let mode = self.store.conversation(id, now).mode;
        if mode == JudgmentMode::Batched && !forced {
            return self.batched(message, now).await;
        }
        if forced {
            tracing::debug!(conversation = %id, bonus = message.bonus_score, special = message.special_event, "forced message, scoring now");
        }
        self.per_message(message, forced, now).await
    }

    async fn batched(&self, message: &InboundMessage, now: DateTime<Utc>) -> Result<Outcome, EngageError> {
        let id = message.conversation_id.as_str();
        let count = self.store.update(id, now, |s| {
            s.message_counter += 1;
            s.message_counter
        });
        if count < self.cfg.batch_size {
            tracing::debug!(conversation = %id, count, batch_size = self.cfg.batch_size, "message absorbed into batch");
            return Ok(Outcome::Silent(SilenceReason::Absorbed));
        }

        tracing::debug!(conversation = %id, count, "batch full, running summary judgment");
        let request = self.prompts.batch_prompt(id, count).await?;
        let kind = BinaryJudgment::Batch { count };
        if self.scoring.judge_binary(id, kind, &request).await {
            tracing::info!(conversation = %id, count, "batch judgment wants a reply");
            return Ok(self.reply(message, ReplyKind::Batch { count }, InferredMood::Neutral, false, now).await);
        }

        self.store.update(id, now, |s| s.message_counter = 0);
        self.store.record_passive(id, count, None, None, now);
        Ok(Outcome::Silent(SilenceReason::Declined))
    }

    async fn per_message(
        &self,
        message: &InboundMessage,
        forced: bool,
        now: DateTime<Utc>,
    ) -> Result<Outcome, EngageError> {
        let id = message.conversation_id.as_str();
        let state = self.store.conversation(id, now);
        let profile = if self.cfg.enable_user_profiles { self.store.user(&message.sender_id) } else { None };
        let request = self.prompts.judge_prompt(message, &state, profile.as_ref()).await?;
        let verdict = self.scoring.judge_message(id, &request, message.bonus_score, now).await;

        // state may have moved while the judge was running
        let state = self.store.conversation(id, now);
        let decision = decide(&self.cfg, &state, &verdict, forced);
        tracing::debug!(
            conversation = %id,
            score = verdict.overall_score,
            threshold = decision.dynamic_threshold,
            energy = state.energy,
            reply = decision.reply,
            "per-message decision"
        );
        if decision.vetoed {
            tracing::info!(
                conversation = %id,
                consecutive = state.consecutive_reply_count,
                "reply vetoed by consecutive-reply cooldown"
            );
        }

        if decision.reply {
            return Ok(self.reply(message, ReplyKind::PerMessage, verdict.inferred_mood, forced, now).await);
        }

        let window = self.cfg.per_message_window;
        let switched = self.store.update(id, now, |s| {
            s.message_counter += 1;
            if s.mode == JudgmentMode::PerMessage && s.message_counter >= window {
                s.mode = JudgmentMode::Batched;
                s.message_counter = 0;
                true
            } else {
                false
            }
        });
        if switched {
            tracing::info!(conversation = %id, window, "per-message window ended, back to batched");
        }
        self.store.record_passive(id, 1, Some(verdict.inferred_mood), Some(&message.sender_id), now);
        Ok(Outcome::Silent(SilenceReason::Declined))
    }

    async fn recover(&self, message: &InboundMessage, now: DateTime<Utc>) -> Result<Outcome, EngageError> {
        let id = message.conversation_id.as_str();
        tracing::info!(conversation = %id, "cooldown over, running recovery judgment");
        let request = self.prompts.recovery_prompt(id).await?;
        if self.scoring.judge_binary(id, BinaryJudgment::Recovery, &request).await {
            return Ok(self.reply(message, ReplyKind::Recovery, InferredMood::Neutral, false, now).await);
        }
        self.store.record_passive(id, 1, None, Some(&message.sender_id), now);
        Ok(Outcome::Silent(SilenceReason::Declined))
    }

    /// Compose and record a reply. A failed composition downgrades to a
    /// passive update of the same size, with no mode change.
    async fn reply(
        &self,
        message: &InboundMessage,
        kind: ReplyKind,
        mood: InferredMood,
        forced: bool,
        now: DateTime<Utc>,
    ) -> Outcome {
        let id = message.conversation_id.as_str();
        match self.responder.compose(message, kind).await {
            Some(text) => {
                self.store.record_active_reply(id, Some(&message.sender_id), mood, forced, now);
                self.prompts.record_reply(id, &text);
                tracing::info!(conversation = %id, ?kind, forced, "replied");
                Outcome::Replied { kind, text }
            }
            None => {
                tracing::warn!(conversation = %id, ?kind, "reply composition failed, treating as unanswered");
                match kind {
                    ReplyKind::Batch { count } => {
                        self.store.update(id, now, |s| s.message_counter = 0);
                        self.store.record_passive(id, count, None, None, now);
                    }
                    _ => self.store.record_passive(id, 1, Some(mood), Some(&message.sender_id), now),
                }
                Outcome::Silent(SilenceReason::ComposeFailed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(score: f32) -> ScoringVerdict {
        ScoringVerdict { overall_score: score, ..ScoringVerdict::silent("test") }
    }

    fn state(mood: f32, energy: f32, consecutive: u32) -> ConversationState {
        let mut s = ConversationState::new(energy, mood, Utc::now());
        s.consecutive_reply_count = consecutive;
        s
    }

    #[test]
    fn dynamic_threshold_follows_mood_and_clamps() {
        assert!((dynamic_threshold(0.6, 0.4) - 0.48).abs() < 1e-6);
        assert!((dynamic_threshold(0.6, 0.0) - 0.6).abs() < 1e-6);
        assert!((dynamic_threshold(0.6, -1.0) - 0.9).abs() < 1e-6);
        assert!((dynamic_threshold(0.3, 1.0) - 0.2).abs() < 1e-6);
    }

    #[test]
    fn score_or_energy_triggers_reply() {
        let cfg = EngageCfg::default();
        assert!(decide(&cfg, &state(0.4, 0.5, 0), &verdict(0.5), false).reply);
        assert!(!decide(&cfg, &state(0.0, 0.5, 0), &verdict(0.5), false).reply);
        assert!(decide(&cfg, &state(0.0, 0.85, 0), &verdict(0.0), false).reply);
    }

    #[test]
    fn cooldown_vetoes_unless_forced() {
        let cfg = EngageCfg::default();
        let d = decide(&cfg, &state(0.0, 0.5, 3), &verdict(0.9), false);
        assert!(!d.reply);
        assert!(d.vetoed);
        let d = decide(&cfg, &state(0.0, 0.5, 3), &verdict(0.9), true);
        assert!(d.reply);
        assert!(!d.vetoed);
    }

    #[test]
    fn exhausted_verdict_never_replies_even_with_energy() {
        let cfg = EngageCfg::default();
        let d = decide(&cfg, &state(0.0, 1.0, 0), &ScoringVerdict::exhausted("down"), true);
        assert!(!d.reply);
    }
}
