use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::{dynamics, social};
use crate::config::EngageCfg;
use crate::persistence::StoreSnapshot;
use crate::types::{ConversationState, InferredMood, UserProfile};

#[derive(Debug, Default)]
struct Maps {
    conversations: HashMap<String, ConversationState>,
    users: HashMap<String, UserProfile>,
}

/// Owned key-value store of conversation affect and user profiles.
///
/// Access is split into two handles: [`EngineHandle`] creates entries on
/// demand and is used by message handling; [`MaintenanceHandle`] can only
/// touch entries that already exist, so a background pass racing a reset
/// cannot bring a deleted conversation back.
#[derive(Debug, Clone)]
pub struct AffectStore {
    cfg: Arc<EngageCfg>,
    maps: Arc<Mutex<Maps>>,
}

impl AffectStore {
    pub fn new(cfg: Arc<EngageCfg>) -> Self {
        Self { cfg, maps: Arc::new(Mutex::new(Maps::default())) }
    }

    /// Build a store already hydrated from a snapshot.
    pub fn from_snapshot(cfg: Arc<EngageCfg>, snapshot: StoreSnapshot) -> Self {
        let store = Self::new(cfg);
        store.restore(snapshot);
        store
    }

    /// Replace the whole content with a snapshot. Loaded values are clamped
    /// and tiers recomputed against the current thresholds.
    pub fn restore(&self, snapshot: StoreSnapshot) {
        let mut maps = self.lock();
        maps.conversations = snapshot.conversations;
        for state in maps.conversations.values_mut() {
            state.clamp();
        }
        maps.users = snapshot.users;
        for profile in maps.users.values_mut() {
            profile.relationship_tier = social::tier_for(profile.social_score, &self.cfg);
        }
        tracing::info!(
            conversations = maps.conversations.len(),
            users = maps.users.len(),
            "affect store hydrated"
        );
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let maps = self.lock();
        StoreSnapshot {
            conversations: maps.conversations.clone(),
            users: maps.users.clone(),
        }
    }

    pub fn engine(&self) -> EngineHandle {
        EngineHandle { store: self.clone() }
    }

    pub fn maintenance(&self) -> MaintenanceHandle {
        MaintenanceHandle { store: self.clone() }
    }

    /// Drop a conversation's state. Returns true if it existed.
    pub fn delete_conversation(&self, conversation_id: &str) -> bool {
        self.lock().conversations.remove(conversation_id).is_some()
    }

    pub fn conversation_if_present(&self, conversation_id: &str) -> Option<ConversationState> {
        self.lock().conversations.get(conversation_id).cloned()
    }

    pub fn user_if_present(&self, user_id: &str) -> Option<UserProfile> {
        self.lock().users.get(user_id).cloned()
    }

    pub fn conversation_count(&self) -> usize {
        self.lock().conversations.len()
    }

    pub fn cfg(&self) -> &EngageCfg {
        &self.cfg
    }

    fn lock(&self) -> MutexGuard<'_, Maps> {
        // no await is ever held across this lock; a poisoned map is still consistent
        self.maps.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Create-if-absent access used while handling messages.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    store: AffectStore,
}

impl EngineHandle {
    /// Snapshot of a conversation, creating it (and applying the daily reset).
    pub fn conversation(&self, conversation_id: &str, now: DateTime<Utc>) -> ConversationState {
        self.update(conversation_id, now, |s| s.clone())
    }

    /// Mutate a conversation atomically, creating it if absent.
    pub fn update<R>(
        &self,
        conversation_id: &str,
        now: DateTime<Utc>,
        f: impl FnOnce(&mut ConversationState) -> R,
    ) -> R {
        let cfg = &self.store.cfg;
        let mut maps = self.store.lock();
        let state = maps
            .conversations
            .entry(conversation_id.to_owned())
            .or_insert_with(|| {
                tracing::debug!(conversation = %conversation_id, "conversation state created");
                ConversationState::new(cfg.energy_initial, cfg.mood_initial, now)
            });
        if dynamics::apply_daily_reset(state, now) {
            tracing::debug!(conversation = %conversation_id, energy = state.energy, "daily reset applied");
        }
        let out = f(state);
        state.clamp();
        out
    }

    /// Record a reply: energy cost (unless forced), mood inertia, counters,
    /// mode switch, and a positive interaction for the sender.
    pub fn record_active_reply(
        &self,
        conversation_id: &str,
        sender_id: Option<&str>,
        mood: InferredMood,
        forced: bool,
        now: DateTime<Utc>,
    ) {
        let cfg = Arc::clone(&self.store.cfg);
        let state = self.update(conversation_id, now, |s| {
            dynamics::apply_active_reply(s, mood, forced, &cfg, now);
            s.clone()
        });
        if cfg.enable_user_profiles {
            if let Some(user_id) = sender_id {
                self.update_user(user_id, |p| social::adjust_score(p, cfg.score_positive_interaction, &cfg));
            }
        }
        tracing::debug!(
            conversation = %conversation_id,
            energy = state.energy,
            mood = state.mood,
            consecutive = state.consecutive_reply_count,
            forced,
            "active state updated"
        );
    }

    /// Record `count` unanswered messages. A single message judged negative
    /// costs the sender social score.
    pub fn record_passive(
        &self,
        conversation_id: &str,
        count: u32,
        mood: Option<InferredMood>,
        sender_id: Option<&str>,
        now: DateTime<Utc>,
    ) {
        let cfg = Arc::clone(&self.store.cfg);
        let state = self.update(conversation_id, now, |s| {
            dynamics::apply_passive(s, count, mood, &cfg);
            s.clone()
        });
        if cfg.enable_user_profiles && count == 1 && mood == Some(InferredMood::Negative) {
            if let Some(user_id) = sender_id {
                self.update_user(user_id, |p| social::adjust_score(p, cfg.score_negative_interaction, &cfg));
            }
        }
        tracing::debug!(
            conversation = %conversation_id,
            count,
            energy = state.energy,
            mood = state.mood,
            "passive state updated"
        );
    }

    /// Refresh a sender's profile on every admitted message.
    pub fn touch_user(&self, user_id: &str, display_name: &str, now: DateTime<Utc>) {
        self.update_user(user_id, |p| social::touch(p, display_name, now));
    }

    pub fn user(&self, user_id: &str) -> Option<UserProfile> {
        self.store.user_if_present(user_id)
    }

    fn update_user<R>(&self, user_id: &str, f: impl FnOnce(&mut UserProfile) -> R) -> R {
        let mut maps = self.store.lock();
        let profile = maps
            .users
            .entry(user_id.to_owned())
            .or_insert_with(|| UserProfile::new(user_id));
        f(profile)
    }
}

/// Read-if-present access used by background passes. Cannot create entries.
#[derive(Debug, Clone)]
pub struct MaintenanceHandle {
    store: AffectStore,
}

impl MaintenanceHandle {
    pub fn conversation_ids(&self) -> Vec<String> {
        self.store.lock().conversations.keys().cloned().collect()
    }

    pub fn user_ids(&self) -> Vec<String> {
        self.store.lock().users.keys().cloned().collect()
    }

    /// Mutate a conversation only if it still exists.
    pub fn update_if_present<R>(
        &self,
        conversation_id: &str,
        f: impl FnOnce(&mut ConversationState) -> R,
    ) -> Option<R> {
        let mut maps = self.store.lock();
        let state = maps.conversations.get_mut(conversation_id)?;
        let out = f(state);
        state.clamp();
        Some(out)
    }

    pub fn update_user_if_present<R>(
        &self,
        user_id: &str,
        f: impl FnOnce(&mut UserProfile) -> R,
    ) -> Option<R> {
        let mut maps = self.store.lock();
        maps.users.get_mut(user_id).map(f)
    }

    pub fn cfg(&self) -> &EngageCfg {
        self.store.cfg()
    }
}
