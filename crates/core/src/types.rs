use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lower bound of conversation energy.
pub const ENERGY_FLOOR: f32 = 0.1;
/// Upper bound of conversation energy.
pub const ENERGY_CEIL: f32 = 1.0;

// ── Inbound ──────────────────────────────────────────────────

/// A chat message admitted by the ingestion layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: Uuid,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub text: String,
    pub image_refs: Vec<String>,
    /// Additive score from direct address (nickname). 0.0 when absent.
    pub bonus_score: f32,
    /// Interaction event such as a poke.
    pub special_event: bool,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(
        conversation_id: impl Into<String>,
        sender_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        let sender_id = sender_id.into();
        Self {
            id: Uuid::new_v4(),
            conversation_id: conversation_id.into(),
            sender_name: sender_id.clone(),
            sender_id,
            text: text.into(),
            image_refs: Vec::new(),
            bonus_score: 0.0,
            special_event: false,
            received_at: Utc::now(),
        }
    }

    pub fn with_sender_name(mut self, name: impl Into<String>) -> Self {
        self.sender_name = name.into();
        self
    }

    pub fn with_bonus(mut self, bonus: f32) -> Self {
        self.bonus_score = bonus.max(0.0);
        self
    }

    pub fn with_special_event(mut self) -> Self {
        self.special_event = true;
        self
    }

    pub fn with_images(mut self, refs: Vec<String>) -> Self {
        self.image_refs = refs;
        self
    }

    /// Forced messages bypass batching, cooldown veto and overload cooldown.
    pub fn is_forced(&self) -> bool {
        self.special_event || self.bonus_score > 0.0
    }
}

// ── Conversation affect ──────────────────────────────────────

/// Judgment strategy of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JudgmentMode {
    /// Messages are buffered; a periodic summary judgment decides.
    #[default]
    Batched,
    /// Every message is scored.
    PerMessage,
}

impl JudgmentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Batched => "batched",
            Self::PerMessage => "per_message",
        }
    }
}

/// Affect state of one conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub energy: f32,
    pub mood: f32,
    /// `None` until the first reply.
    pub last_reply_time: Option<DateTime<Utc>>,
    pub last_reset_date: Option<NaiveDate>,
    pub last_passive_decay_time: Option<DateTime<Utc>>,
    pub total_messages: u64,
    pub total_replies: u64,
    pub mode: JudgmentMode,
    pub message_counter: u32,
    pub consecutive_reply_count: u32,
}

impl ConversationState {
    pub fn new(energy: f32, mood: f32, now: DateTime<Utc>) -> Self {
        let mut state = Self {
            energy,
            mood,
            last_reply_time: None,
            last_reset_date: Some(now.date_naive()),
            last_passive_decay_time: Some(now),
            total_messages: 0,
            total_replies: 0,
            mode: JudgmentMode::Batched,
            message_counter: 0,
            consecutive_reply_count: 0,
        };
        state.clamp();
        state
    }

    /// Clamp energy to [0.1, 1.0] and mood to [-1.0, 1.0].
    pub fn clamp(&mut self) {
        self.energy = self.energy.clamp(ENERGY_FLOOR, ENERGY_CEIL);
        self.mood = self.mood.clamp(-1.0, 1.0);
    }

    /// Whole minutes since the last reply, `None` if never replied.
    pub fn minutes_since_reply(&self, now: DateTime<Utc>) -> Option<i64> {
        self.last_reply_time.map(|t| (now - t).num_minutes())
    }
}

// ── Social ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipTier {
    Avoiding,
    #[default]
    Stranger,
    Acquaintance,
    Friend,
}

impl RelationshipTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Avoiding => "avoiding",
            Self::Stranger => "stranger",
            Self::Acquaintance => "acquaintance",
            Self::Friend => "friend",
        }
    }
}

/// Per-user social profile. `relationship_tier` is derived from `social_score`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub display_name: String,
    pub social_score: f32,
    pub relationship_tier: RelationshipTier,
    pub last_seen: Option<DateTime<Utc>>,
    pub last_decay_check_time: Option<DateTime<Utc>>,
}

impl UserProfile {
    pub fn new(user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        Self {
            display_name: user_id.clone(),
            user_id,
            social_score: 0.0,
            relationship_tier: RelationshipTier::Stranger,
            last_seen: None,
            last_decay_check_time: None,
        }
    }
}

// ── Verdicts ─────────────────────────────────────────────────

/// Conversation atmosphere inferred by the judge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferredMood {
    Positive,
    #[default]
    Neutral,
    Negative,
}

impl InferredMood {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Neutral => "neutral",
            Self::Negative => "negative",
        }
    }

    /// Lenient parse; anything unrecognised is neutral.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "positive" => Self::Positive,
            "negative" => Self::Negative,
            _ => Self::Neutral,
        }
    }
}

/// Result of one scoring call. Sub-scores are in [0, 10].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringVerdict {
    pub relevance: f32,
    pub willingness: f32,
    pub social: f32,
    pub timing: f32,
    pub continuity: f32,
    pub inferred_mood: InferredMood,
    pub overall_score: f32,
    /// First-pass static decision; the engagement machine decides finally.
    pub should_reply: bool,
    pub reasoning: Option<String>,
    /// Every provider in every pool failed.
    pub exhausted: bool,
}

impl ScoringVerdict {
    /// Non-reply verdict carrying a diagnostic reason.
    pub fn silent(reason: impl Into<String>) -> Self {
        Self {
            relevance: 0.0,
            willingness: 0.0,
            social: 0.0,
            timing: 0.0,
            continuity: 0.0,
            inferred_mood: InferredMood::Neutral,
            overall_score: 0.0,
            should_reply: false,
            reasoning: Some(reason.into()),
            exhausted: false,
        }
    }

    pub fn exhausted(reason: impl Into<String>) -> Self {
        Self { exhausted: true, ..Self::silent(reason) }
    }
}

// ── Outcomes ─────────────────────────────────────────────────

/// Which reply-construction path produced a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ReplyKind {
    PerMessage,
    Batch { count: u32 },
    Recovery,
    Proactive,
}

/// Why a message produced no reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SilenceReason {
    /// Conversation is in overload cooldown.
    Cooldown,
    /// Buffered until the batch fills.
    Absorbed,
    /// Judged and declined.
    Declined,
    /// A reply was warranted but no text could be composed.
    ComposeFailed,
    /// An internal error was swallowed.
    Error,
}

/// Final result of handling one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Replied { kind: ReplyKind, text: String },
    Silent(SilenceReason),
}

impl Outcome {
    pub fn is_reply(&self) -> bool {
        matches!(self, Self::Replied { .. })
    }

    pub fn reply_text(&self) -> Option<&str> {
        match self {
            Self::Replied { text, .. } => Some(text),
            Self::Silent(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_state_is_clamped_and_batched() {
        let now = Utc::now();
        let s = ConversationState::new(3.0, -7.0, now);
        assert!((s.energy - 1.0).abs() < f32::EPSILON);
        assert!((s.mood + 1.0).abs() < f32::EPSILON);
        assert_eq!(s.mode, JudgmentMode::Batched);
        assert_eq!(s.last_reset_date, Some(now.date_naive()));
        assert!(s.minutes_since_reply(now).is_none());
    }

    #[test]
    fn forced_markers() {
        let m = InboundMessage::new("c", "u", "hi");
        assert!(!m.is_forced());
        assert!(m.clone().with_bonus(0.5).is_forced());
        assert!(m.clone().with_special_event().is_forced());
        assert!(!m.with_bonus(-1.0).is_forced());
    }

    #[test]
    fn inferred_mood_parse_is_lenient() {
        assert_eq!(InferredMood::parse(" Positive "), InferredMood::Positive);
        assert_eq!(InferredMood::parse("NEGATIVE"), InferredMood::Negative);
        assert_eq!(InferredMood::parse("meh"), InferredMood::Neutral);
    }

    #[test]
    fn exhausted_verdict_never_replies() {
        let v = ScoringVerdict::exhausted("all down");
        assert!(v.exhausted);
        assert!(!v.should_reply);
        assert_eq!(v.reasoning.as_deref(), Some("all down"));
    }
}
