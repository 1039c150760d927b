//! Background maintenance: passive affect decay, social decay, and
//! proactive conversation starters.
//!
//! Only ever goes through [`MaintenanceHandle`], so a conversation reset
//! while a pass is running stays deleted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::affect::{dynamics, social, MaintenanceHandle};
use crate::config::EngageCfg;
use crate::runtime::KeyedGate;
use crate::types::ConversationState;

/// Lower bound for the maintenance period.
const MIN_INTERVAL_SECS: u64 = 30;

/// Sends an opening line to a quiet conversation. Returns true if sent.
#[async_trait]
pub trait ProactiveInitiator: Send + Sync {
    async fn initiate(&self, conversation_id: &str) -> bool;
}

/// What one maintenance pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub conversations: usize,
    pub social_decayed: usize,
    pub initiated: usize,
}

pub struct Maintenance {
    store: MaintenanceHandle,
    cfg: Arc<EngageCfg>,
    initiator: Option<Arc<dyn ProactiveInitiator>>,
    gates: Option<Arc<KeyedGate>>,
}

/// Conversation is energetic, has replied before, and has been quiet long enough.
pub fn proactive_eligible(state: &ConversationState, cfg: &EngageCfg, now: DateTime<Utc>) -> bool {
    let Some(minutes) = state.minutes_since_reply(now) else {
        return false;
    };
    state.energy > cfg.proactive_energy_threshold && minutes > i64::from(cfg.proactive_silence_minutes)
}

impl Maintenance {
    pub fn new(store: MaintenanceHandle, cfg: Arc<EngageCfg>) -> Self {
        Self { store, cfg, initiator: None, gates: None }
    }

    /// Hold the conversation's gate from the eligibility check until the
    /// proactive reply is recorded, so message handling never sees a
    /// half-applied opener.
    pub fn with_gate(mut self, gates: Arc<KeyedGate>) -> Self {
        self.gates = Some(gates);
        self
    }

    pub fn with_initiator(mut self, initiator: Arc<dyn ProactiveInitiator>) -> Self {
        self.initiator = Some(initiator);
        self
    }

    /// One full pass at `now`. Stops early, keeping what was already applied,
    /// when `cancel` fires.
    pub async fn run_cycle(&self, now: DateTime<Utc>, cancel: &CancellationToken) -> CycleReport {
        let mut report = CycleReport::default();

        for id in self.store.conversation_ids() {
            if self
                .store
                .update_if_present(&id, |s| dynamics::apply_passive_decay(s, &self.cfg, now))
                .is_some()
            {
                report.conversations += 1;
            }
        }

        if self.cfg.enable_user_profiles {
            for user_id in self.store.user_ids() {
                let changed = self
                    .store
                    .update_user_if_present(&user_id, |p| social::apply_social_decay(p, &self.cfg, now))
                    .unwrap_or(false);
                if changed {
                    report.social_decayed += 1;
                }
            }
            if report.social_decayed > 0 {
                tracing::info!(users = report.social_decayed, "social scores decayed");
            }
        }

        if let Some(initiator) = self.initiator.as_ref().filter(|_| self.cfg.proactive_enabled) {
            report.initiated = self.proactive_pass(initiator.as_ref(), now, cancel).await;
        }
        report
    }

    async fn proactive_pass(
        &self,
        initiator: &dyn ProactiveInitiator,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> usize {
        let mut initiated = 0;
        for id in self.store.conversation_ids() {
            if cancel.is_cancelled() {
                break;
            }
            let gate = match &self.gates {
                Some(gates) => Some(gates.acquire(&id).await),
                None => None,
            };
            let eligible = self
                .store
                .update_if_present(&id, |s| proactive_eligible(s, &self.cfg, now))
                .unwrap_or(false);
            if !eligible {
                continue;
            }

            tracing::info!(conversation = %id, "conversation eligible for proactive start");
            if !initiator.initiate(&id).await {
                tracing::warn!(conversation = %id, "proactive start failed");
                continue;
            }
            let sent_at = Utc::now().max(now);
            if self
                .store
                .update_if_present(&id, |s| dynamics::apply_proactive(s, &self.cfg, sent_at))
                .is_none()
            {
                tracing::debug!(conversation = %id, "conversation reset during proactive start, not recorded");
                continue;
            }
            drop(gate);
            initiated += 1;

            let pause = Duration::from_secs(self.cfg.proactive_cooldown_secs);
            if !pause.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        }
        initiated
    }
}

/// Spawn the maintenance loop. Runs every `maintenance_interval_secs`
/// (at least 30s) until `cancel` fires.
pub fn spawn(maintenance: Maintenance, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval = Duration::from_secs(maintenance.cfg.maintenance_interval_secs.max(MIN_INTERVAL_SECS));
        tracing::info!(interval_secs = interval.as_secs(), "maintenance task started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("maintenance task shutting down");
                    return;
                }
                _ = tokio::time::sleep(interval) => {}
            }

            if cancel.is_cancelled() {
                return;
            }

            let report = maintenance.run_cycle(Utc::now(), &cancel).await;
            tracing::debug!(
                conversations = report.conversations,
                social_decayed = report.social_decayed,
                initiated = report.initiated,
                "maintenance cycle complete"
            );
        }
    })
}
