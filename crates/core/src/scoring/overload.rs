use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Ten years; keeps deadline arithmetic in range.
const MAX_COOLDOWN_SECS: i64 = 10 * 365 * 24 * 3600;

#[derive(Debug, Default)]
struct Inner {
    deadlines: HashMap<String, DateTime<Utc>>,
    pending: HashSet<String>,
}

/// Per-conversation overload bookkeeping: cooldown deadlines and the set of
/// conversations owed one recovery judgment.
#[derive(Debug, Default)]
pub struct OverloadTracker {
    inner: Mutex<Inner>,
}

/// Read-only view for the command surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OverloadStatus {
    pub in_cooldown: bool,
    pub deadline: Option<DateTime<Utc>>,
    pub remaining_secs: i64,
    pub pending_recovery: bool,
}

impl OverloadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter overload: cooldown until `now + cooldown_secs`, recovery owed.
    pub fn mark(&self, conversation_id: &str, now: DateTime<Utc>, cooldown_secs: u64) -> DateTime<Utc> {
        let secs = i64::try_from(cooldown_secs).unwrap_or(MAX_COOLDOWN_SECS).min(MAX_COOLDOWN_SECS);
        let deadline = now + Duration::seconds(secs);
        let mut inner = self.lock();
        inner.deadlines.insert(conversation_id.to_owned(), deadline);
        inner.pending.insert(conversation_id.to_owned());
        tracing::warn!(conversation = %conversation_id, %deadline, "conversation entered overload cooldown");
        deadline
    }

    pub fn in_cooldown(&self, conversation_id: &str, now: DateTime<Utc>) -> bool {
        self.lock()
            .deadlines
            .get(conversation_id)
            .is_some_and(|deadline| now < *deadline)
    }

    /// Claim the one-shot recovery judgment. True at most once per overload,
    /// and only after the deadline passed.
    pub fn claim_recovery(&self, conversation_id: &str, now: DateTime<Utc>) -> bool {
        let mut inner = self.lock();
        if inner.deadlines.get(conversation_id).is_some_and(|d| now < *d) {
            return false;
        }
        if !inner.pending.remove(conversation_id) {
            return false;
        }
        inner.deadlines.remove(conversation_id);
        true
    }

    /// Forget everything about a conversation (reset command).
    pub fn clear(&self, conversation_id: &str) {
        let mut inner = self.lock();
        inner.deadlines.remove(conversation_id);
        inner.pending.remove(conversation_id);
    }

    pub fn status(&self, conversation_id: &str, now: DateTime<Utc>) -> OverloadStatus {
        let inner = self.lock();
        let deadline = inner.deadlines.get(conversation_id).copied();
        let in_cooldown = deadline.is_some_and(|d| now < d);
        OverloadStatus {
            in_cooldown,
            deadline,
            remaining_secs: deadline.map(|d| (d - now).num_seconds().max(0)).unwrap_or(0),
            pending_recovery: inner.pending.contains(conversation_id),
        }
    }

    /// Number of conversations currently cooling down.
    pub fn cooling_count(&self, now: DateTime<Utc>) -> usize {
        self.lock().deadlines.values().filter(|d| now < **d).count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cooldown_then_single_recovery_claim() {
        let t = OverloadTracker::new();
        let now = Utc::now();
        let deadline = t.mark("c", now, 60);
        assert_eq!(deadline, now + Duration::seconds(60));
        assert!(t.in_cooldown("c", now + Duration::seconds(59)));
        assert!(!t.claim_recovery("c", now + Duration::seconds(30)));

        let later = now + Duration::seconds(61);
        assert!(!t.in_cooldown("c", later));
        assert!(t.claim_recovery("c", later));
        assert!(!t.claim_recovery("c", later));
        assert!(!t.status("c", later).pending_recovery);
    }

    #[test]
    fn status_reports_remaining_time() {
        let t = OverloadTracker::new();
        let now = Utc::now();
        t.mark("c", now, 60);
        let s = t.status("c", now + Duration::seconds(15));
        assert!(s.in_cooldown);
        assert_eq!(s.remaining_secs, 45);
        assert!(s.pending_recovery);
        assert_eq!(t.cooling_count(now), 1);

        let idle = t.status("other", now);
        assert!(!idle.in_cooldown);
        assert!(idle.deadline.is_none());
    }

    #[test]
    fn clear_forgets_overload() {
        let t = OverloadTracker::new();
        let now = Utc::now();
        t.mark("c", now, 60);
        t.clear("c");
        assert!(!t.in_cooldown("c", now));
        assert!(!t.claim_recovery("c", now + Duration::seconds(120)));
    }
}
