//! Energy and mood dynamics of a single conversation.
//!
//! Everything here is a pure transformation of `ConversationState` at an
//! injected `now`; the store decides when to call what.

use chrono::{DateTime, Duration, Utc};

use crate::config::EngageCfg;
use crate::types::{ConversationState, InferredMood, JudgmentMode, ENERGY_CEIL};

/// Energy granted on the first access of a new calendar day.
pub const DAILY_ENERGY_BONUS: f32 = 0.2;
/// Ceiling of passive (silence) energy recovery.
pub const PASSIVE_RECOVERY_CAP: f32 = 0.8;
/// Energy regained per maintenance pass while silent.
pub const PASSIVE_RECOVERY_STEP: f32 = 0.1;
/// Silence (minutes) required before passive recovery applies.
pub const PASSIVE_RECOVERY_MIN_SILENCE_MINUTES: i64 = 60;

/// Nudge energy up and zero mood when the calendar day changed.
/// Returns true when a reset happened.
pub fn apply_daily_reset(state: &mut ConversationState, now: DateTime<Utc>) -> bool {
    let today = now.date_naive();
    if state.last_reset_date == Some(today) {
        return false;
    }
    state.energy = (state.energy + DAILY_ENERGY_BONUS).min(ENERGY_CEIL);
    state.mood = 0.0;
    state.last_reset_date = Some(today);
    state.clamp();
    true
}

/// Move mood by one step according to the inferred atmosphere.
/// Neutral relaxes toward zero without crossing it.
pub fn apply_mood_inertia(state: &mut ConversationState, mood: InferredMood, cfg: &EngageCfg) {
    match mood {
        InferredMood::Positive => state.mood += cfg.mood_increment,
        InferredMood::Negative => state.mood -= cfg.mood_increment,
        InferredMood::Neutral => state.mood = relax_toward_zero(state.mood, cfg.mood_decay),
    }
    state.clamp();
}

/// State change after the bot replied to a message.
pub fn apply_active_reply(
    state: &mut ConversationState,
    mood: InferredMood,
    forced: bool,
    cfg: &EngageCfg,
    now: DateTime<Utc>,
) {
    state.last_reply_time = Some(now);
    state.total_replies += 1;
    state.total_messages += 1;
    if !forced || cfg.forced_replies_count_toward_cooldown {
        state.consecutive_reply_count += 1;
    }
    if !forced {
        state.energy -= cfg.energy_decay_rate;
    }
    apply_mood_inertia(state, mood, cfg);
    state.mode = JudgmentMode::PerMessage;
    state.message_counter = 0;
    state.clamp();
}

/// State change after `count` messages went unanswered. Mood moves only for
/// a single ungrouped message.
pub fn apply_passive(
    state: &mut ConversationState,
    count: u32,
    mood: Option<InferredMood>,
    cfg: &EngageCfg,
) {
    state.total_messages += u64::from(count);
    state.energy += cfg.energy_recovery_rate * count as f32;
    state.consecutive_reply_count = 0;
    if count == 1 {
        if let Some(mood) = mood {
            apply_mood_inertia(state, mood, cfg);
        }
    }
    state.clamp();
}

/// State change after a proactive opener was sent.
pub fn apply_proactive(state: &mut ConversationState, cfg: &EngageCfg, now: DateTime<Utc>) {
    state.last_reply_time = Some(now);
    state.total_replies += 1;
    state.total_messages += 1;
    state.energy -= cfg.energy_decay_rate;
    state.mood = 0.0;
    state.mode = JudgmentMode::PerMessage;
    state.message_counter = 0;
    state.clamp();
}

/// Periodic relaxation: mood toward zero once per interval, energy toward
/// the recovery cap after an hour of silence. Conversations that never
/// replied do not recover.
pub fn apply_passive_decay(state: &mut ConversationState, cfg: &EngageCfg, now: DateTime<Utc>) {
    let interval_secs = (f64::from(cfg.mood_decay_interval_hours) * 3600.0) as i64;
    match state.last_passive_decay_time {
        None => state.last_passive_decay_time = Some(now),
        Some(last) if (now - last).num_seconds() >= interval_secs => {
            state.mood = relax_toward_zero(state.mood, cfg.mood_decay);
            state.last_passive_decay_time = Some(now);
        }
        Some(_) => {}
    }

    if let Some(last_reply) = state.last_reply_time {
        let silent_long_enough = now - last_reply > Duration::minutes(PASSIVE_RECOVERY_MIN_SILENCE_MINUTES);
        if silent_long_enough && state.energy < PASSIVE_RECOVERY_CAP {
            state.energy = (state.energy + PASSIVE_RECOVERY_STEP).min(PASSIVE_RECOVERY_CAP);
        }
    }
    state.clamp();
}

fn relax_toward_zero(value: f32, step: f32) -> f32 {
    if value > 0.0 {
        (value - step).max(0.0)
    } else if value < 0.0 {
        (value + step).min(0.0)
    } else {
        0.0
    }
}
