//! Social scores and relationship tiers.

use chrono::{DateTime, Duration, Utc};

use crate::config::EngageCfg;
use crate::types::{RelationshipTier, UserProfile};

/// Tier for a score: a pure three-threshold partition.
pub fn tier_for(score: f32, cfg: &EngageCfg) -> RelationshipTier {
    if score <= cfg.tier_avoiding_score {
        RelationshipTier::Avoiding
    } else if score >= cfg.tier_friend_score {
        RelationshipTier::Friend
    } else if score >= cfg.tier_acquaintance_score {
        RelationshipTier::Acquaintance
    } else {
        RelationshipTier::Stranger
    }
}

/// Add `delta` to the score and recompute the tier.
pub fn adjust_score(profile: &mut UserProfile, delta: f32, cfg: &EngageCfg) {
    profile.social_score += delta;
    profile.relationship_tier = tier_for(profile.social_score, cfg);
    tracing::debug!(
        user = %profile.user_id,
        delta,
        score = profile.social_score,
        tier = profile.relationship_tier.as_str(),
        "social score adjusted"
    );
}

/// Refresh display name and last-seen time.
pub fn touch(profile: &mut UserProfile, display_name: &str, now: DateTime<Utc>) {
    if !display_name.is_empty() {
        profile.display_name = display_name.to_owned();
    }
    profile.last_seen = Some(now);
}

/// Rolling 24h decay toward zero for users silent past the grace period.
/// Returns true when the score changed.
pub fn apply_social_decay(profile: &mut UserProfile, cfg: &EngageCfg, now: DateTime<Utc>) -> bool {
    match profile.last_decay_check_time {
        None => {
            profile.last_decay_check_time = Some(now);
            return false;
        }
        Some(last) if now - last < Duration::hours(24) => return false,
        Some(_) => profile.last_decay_check_time = Some(now),
    }

    let silent = profile.last_seen.map(|seen| now - seen);
    let grace = Duration::days(i64::from(cfg.social_decay_grace_days));
    if !matches!(silent, Some(s) if s > grace) {
        return false;
    }

    let step = cfg.score_decay_per_day;
    let before = profile.social_score;
    let after = if before > step {
        before - step
    } else if before < -step {
        before + step
    } else {
        0.0
    };
    if after == before {
        return false;
    }
    profile.social_score = after;
    profile.relationship_tier = tier_for(after, cfg);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> EngageCfg {
        EngageCfg::default()
    }

    #[test]
    fn tier_partition_boundaries() {
        let c = cfg();
        assert_eq!(tier_for(-20.0, &c), RelationshipTier::Avoiding);
        assert_eq!(tier_for(-19.9, &c), RelationshipTier::Stranger);
        assert_eq!(tier_for(9.99, &c), RelationshipTier::Stranger);
        assert_eq!(tier_for(10.0, &c), RelationshipTier::Acquaintance);
        assert_eq!(tier_for(49.9, &c), RelationshipTier::Acquaintance);
        assert_eq!(tier_for(50.0, &c), RelationshipTier::Friend);
    }

    #[test]
    fn tier_is_consistent_after_every_mutation() {
        let c = cfg();
        let mut p = UserProfile::new("u");
        let deltas = [1.0, -1.5, 12.0, 40.0, -90.0, 3.3, 55.5, -0.25];
        for round in 0..20 {
            let delta = deltas[round % deltas.len()];
            adjust_score(&mut p, delta, &c);
            assert_eq!(p.relationship_tier, tier_for(p.social_score, &c));
        }
    }

    #[test]
    fn decay_waits_for_rolling_window_and_grace() {
        let c = cfg();
        let now = Utc::now();
        let mut p = UserProfile::new("u");
        p.social_score = 12.0;
        p.relationship_tier = tier_for(12.0, &c);
        p.last_seen = Some(now - Duration::days(10));

        // first check only starts the window
        assert!(!apply_social_decay(&mut p, &c, now));
        assert!(!apply_social_decay(&mut p, &c, now + Duration::hours(23)));
        assert!(apply_social_decay(&mut p, &c, now + Duration::hours(25)));
        assert!((p.social_score - 11.5).abs() < 1e-6);
    }

    #[test]
    fn decay_skips_recently_seen_users() {
        let c = cfg();
        let now = Utc::now();
        let mut p = UserProfile::new("u");
        p.social_score = 12.0;
        p.last_seen = Some(now - Duration::days(1));
        p.last_decay_check_time = Some(now - Duration::days(2));
        assert!(!apply_social_decay(&mut p, &c, now));
        assert!((p.social_score - 12.0).abs() < 1e-6);
    }

    #[test]
    fn decay_clamps_across_zero() {
        let c = cfg();
        let now = Utc::now();
        let mut p = UserProfile::new("u");
        p.social_score = -0.3;
        p.last_seen = Some(now - Duration::days(5));
        p.last_decay_check_time = Some(now - Duration::days(1));
        assert!(apply_social_decay(&mut p, &c, now));
        assert_eq!(p.social_score, 0.0);
        assert_eq!(p.relationship_tier, RelationshipTier::Stranger);
    }

    #[test]
    fn decay_demotes_tier_immediately() {
        let c = cfg();
        let now = Utc::now();
        let mut p = UserProfile::new("u");
        adjust_score(&mut p, 10.2, &c);
        assert_eq!(p.relationship_tier, RelationshipTier::Acquaintance);
        p.last_seen = Some(now - Duration::days(4));
        p.last_decay_check_time = Some(now - Duration::hours(30));
        assert!(apply_social_decay(&mut p, &c, now));
        assert_eq!(p.relationship_tier, RelationshipTier::Stranger);
    }
}
