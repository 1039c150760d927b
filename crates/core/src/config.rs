use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;

/// Prefix for environment overrides, e.g. `MURMUR_BATCH_SIZE=5`.
const ENV_PREFIX: &str = "MURMUR_";

/// Smallest accepted mood relaxation period (one minute).
pub const MIN_MOOD_DECAY_INTERVAL_HOURS: f32 = 1.0 / 60.0;

/// Per-criterion scoring weights. Normalised to sum to 1.0 by [`EngageCfg::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub relevance: f32,
    pub willingness: f32,
    pub social: f32,
    pub timing: f32,
    pub continuity: f32,
}

impl ScoreWeights {
    pub fn sum(&self) -> f32 {
        self.relevance + self.willingness + self.social + self.timing + self.continuity
    }

    fn as_array(&self) -> [f32; 5] {
        [self.relevance, self.willingness, self.social, self.timing, self.continuity]
    }

    /// Every weight finite and non-negative, with a positive sum.
    pub fn is_usable(&self) -> bool {
        self.as_array().iter().all(|w| w.is_finite() && *w >= 0.0) && self.sum() > 0.0
    }

    /// Rescale proportionally when the sum is off by more than 1e-6.
    /// Returns `None` when already normalised or when the weights are not usable.
    pub fn normalized(&self) -> Option<Self> {
        let sum = self.sum();
        if !self.is_usable() || (sum - 1.0).abs() <= 1e-6 {
            return None;
        }
        let total: f64 = self.as_array().iter().map(|w| f64::from(*w)).sum();
        let scale = |w: f32| (f64::from(w) / total) as f32;
        Some(Self {
            relevance: scale(self.relevance),
            willingness: scale(self.willingness),
            social: scale(self.social),
            timing: scale(self.timing),
            continuity: scale(self.continuity),
        })
    }
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            relevance: 0.25,
            willingness: 0.20,
            social: 0.20,
            timing: 0.15,
            continuity: 0.20,
        }
    }
}

/// All engagement parameters. Loaded from the `engage_config` table when a
/// database is configured, otherwise defaults overlaid by `MURMUR_*` env vars.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngageCfg {
    // provider pools
    pub general_pool: Vec<String>,
    pub judge_provider_names: Vec<String>,
    pub summarize_provider_names: Vec<String>,
    pub reply_provider_names: Vec<String>,

    // judgment
    pub reply_threshold: f32,
    pub judge_include_reasoning: bool,
    pub judge_max_retries: u32,
    pub overload_cooldown_secs: u64,
    pub force_reply_bonus: f32,
    pub weights: ScoreWeights,

    // batching
    pub batch_size: u32,
    pub per_message_window: u32,

    // energy
    pub energy_initial: f32,
    pub energy_threshold: f32,
    pub energy_decay_rate: f32,
    pub energy_recovery_rate: f32,

    // mood
    pub mood_initial: f32,
    pub mood_increment: f32,
    pub mood_decay: f32,
    pub mood_decay_interval_hours: f32,

    // social
    pub max_consecutive_replies: u32,
    pub forced_replies_count_toward_cooldown: bool,
    pub enable_user_profiles: bool,
    pub tier_friend_score: f32,
    pub tier_acquaintance_score: f32,
    pub tier_avoiding_score: f32,
    pub score_positive_interaction: f32,
    pub score_negative_interaction: f32,
    pub score_decay_per_day: f32,
    pub social_decay_grace_days: u32,

    // maintenance & proactive
    pub maintenance_interval_secs: u64,
    pub proactive_enabled: bool,
    pub proactive_energy_threshold: f32,
    pub proactive_silence_minutes: u32,
    pub proactive_cooldown_secs: u64,

    // ingestion
    pub bot_nicknames: Vec<String>,
}

impl Default for EngageCfg {
    fn default() -> Self {
        Self {
            general_pool: Vec::new(),
            judge_provider_names: Vec::new(),
            summarize_provider_names: Vec::new(),
            reply_provider_names: Vec::new(),
            reply_threshold: 0.6,
            judge_include_reasoning: true,
            judge_max_retries: 3,
            overload_cooldown_secs: 60,
            force_reply_bonus: 0.5,
            weights: ScoreWeights::default(),
            batch_size: 10,
            per_message_window: 10,
            energy_initial: 0.5,
            energy_threshold: 0.8,
            energy_decay_rate: 0.1,
            energy_recovery_rate: 0.02,
            mood_initial: 0.0,
            mood_increment: 0.1,
            mood_decay: 0.05,
            mood_decay_interval_hours: 1.0,
            max_consecutive_replies: 3,
            forced_replies_count_toward_cooldown: true,
            enable_user_profiles: false,
            tier_friend_score: 50.0,
            tier_acquaintance_score: 10.0,
            tier_avoiding_score: -20.0,
            score_positive_interaction: 1.0,
            score_negative_interaction: -1.5,
            score_decay_per_day: 0.5,
            social_decay_grace_days: 3,
            maintenance_interval_secs: 600,
            proactive_enabled: false,
            proactive_energy_threshold: 0.9,
            proactive_silence_minutes: 120,
            proactive_cooldown_secs: 60,
            bot_nicknames: Vec::new(),
        }
    }
}

impl EngageCfg {
    /// Load config from `engage_config` table. If table is empty, seed with defaults.
    pub async fn load(pool: &PgPool) -> Result<Self, sqlx::Error> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT key, value FROM engage_config")
                .fetch_all(pool)
                .await?;

        if rows.is_empty() {
            let cfg = Self::default();
            cfg.seed(pool).await?;
            return Ok(cfg.validate());
        }

        let map: HashMap<String, String> = rows.into_iter().collect();
        Ok(Self::from_map(&map).validate())
    }

    /// Defaults overlaid by `MURMUR_<KEY>` environment variables.
    pub fn from_env() -> Self {
        let map: HashMap<String, String> = std::env::vars()
            .filter_map(|(k, v)| {
                k.strip_prefix(ENV_PREFIX).map(|key| (key.to_ascii_lowercase(), v))
            })
            .collect();
        Self::from_map(&map).validate()
    }

    /// Write all default values into `engage_config` table.
    async fn seed(&self, pool: &PgPool) -> Result<(), sqlx::Error> {
        let entries = self.to_entries();
        for (key, value, desc) in &entries {
            sqlx::query(
                "INSERT INTO engage_config (key, value, description) VALUES ($1, $2, $3) \
                 ON CONFLICT (key) DO NOTHING",
            )
            .bind(key)
            .bind(value)
            .bind(desc)
            .execute(pool)
            .await?;
        }
        Ok(())
    }

    pub fn from_map(m: &HashMap<String, String>) -> Self {
        let d = Self::default();
        Self {
            general_pool: get_list(m, "general_pool", d.general_pool),
            judge_provider_names: get_list(m, "judge_provider_names", d.judge_provider_names),
            summarize_provider_names: get_list(m, "summarize_provider_names", d.summarize_provider_names),
            reply_provider_names: get_list(m, "reply_provider_names", d.reply_provider_names),
            reply_threshold: get_or(m, "reply_threshold", d.reply_threshold),
            judge_include_reasoning: get_or(m, "judge_include_reasoning", d.judge_include_reasoning),
            judge_max_retries: get_or(m, "judge_max_retries", d.judge_max_retries),
            overload_cooldown_secs: get_or(m, "overload_cooldown_secs", d.overload_cooldown_secs),
            force_reply_bonus: get_or(m, "force_reply_bonus", d.force_reply_bonus),
            weights: ScoreWeights {
                relevance: get_or(m, "weight_relevance", d.weights.relevance),
                willingness: get_or(m, "weight_willingness", d.weights.willingness),
                social: get_or(m, "weight_social", d.weights.social),
                timing: get_or(m, "weight_timing", d.weights.timing),
                continuity: get_or(m, "weight_continuity", d.weights.continuity),
            },
            batch_size: get_or(m, "batch_size", d.batch_size),
            per_message_window: get_or(m, "per_message_window", d.per_message_window),
            energy_initial: get_or(m, "energy_initial", d.energy_initial),
            energy_threshold: get_or(m, "energy_threshold", d.energy_threshold),
            energy_decay_rate: get_or(m, "energy_decay_rate", d.energy_decay_rate),
            energy_recovery_rate: get_or(m, "energy_recovery_rate", d.energy_recovery_rate),
            mood_initial: get_or(m, "mood_initial", d.mood_initial),
            mood_increment: get_or(m, "mood_increment", d.mood_increment),
            mood_decay: get_or(m, "mood_decay", d.mood_decay),
            mood_decay_interval_hours: get_or(m, "mood_decay_interval_hours", d.mood_decay_interval_hours),
            max_consecutive_replies: get_or(m, "max_consecutive_replies", d.max_consecutive_replies),
            forced_replies_count_toward_cooldown: get_or(m, "forced_replies_count_toward_cooldown", d.forced_replies_count_toward_cooldown),
            enable_user_profiles: get_or(m, "enable_user_profiles", d.enable_user_profiles),
            tier_friend_score: get_or(m, "tier_friend_score", d.tier_friend_score),
            tier_acquaintance_score: get_or(m, "tier_acquaintance_score", d.tier_acquaintance_score),
            tier_avoiding_score: get_or(m, "tier_avoiding_score", d.tier_avoiding_score),
            score_positive_interaction: get_or(m, "score_positive_interaction", d.score_positive_interaction),
            score_negative_interaction: get_or(m, "score_negative_interaction", d.score_negative_interaction),
            score_decay_per_day: get_or(m, "score_decay_per_day", d.score_decay_per_day),
            social_decay_grace_days: get_or(m, "social_decay_grace_days", d.social_decay_grace_days),
            maintenance_interval_secs: get_or(m, "maintenance_interval_secs", d.maintenance_interval_secs),
            proactive_enabled: get_or(m, "proactive_enabled", d.proactive_enabled),
            proactive_energy_threshold: get_or(m, "proactive_energy_threshold", d.proactive_energy_threshold),
            proactive_silence_minutes: get_or(m, "proactive_silence_minutes", d.proactive_silence_minutes),
            proactive_cooldown_secs: get_or(m, "proactive_cooldown_secs", d.proactive_cooldown_secs),
            bot_nicknames: get_list(m, "bot_nicknames", d.bot_nicknames),
        }
    }

    /// Repair values that would break invariants. Never fails; every
    /// correction is logged.
    pub fn validate(mut self) -> Self {
        if !self.weights.is_usable() {
            tracing::warn!(weights = ?self.weights, "scoring weights negative, non-finite or all zero, restoring defaults");
            self.weights = ScoreWeights::default();
        } else if let Some(w) = self.weights.normalized() {
            tracing::warn!(sum = self.weights.sum(), "scoring weights do not sum to 1, normalising");
            self.weights = w;
            tracing::info!(weights = ?self.weights, "scoring weights normalised");
        }

        if !(self.mood_decay_interval_hours.is_finite() && self.mood_decay_interval_hours >= MIN_MOOD_DECAY_INTERVAL_HOURS) {
            tracing::warn!(
                value = self.mood_decay_interval_hours,
                min = MIN_MOOD_DECAY_INTERVAL_HOURS,
                "mood_decay_interval_hours too small or not a number, using minimum"
            );
            self.mood_decay_interval_hours = MIN_MOOD_DECAY_INTERVAL_HOURS;
        }

        let clamped = self.energy_initial.clamp(0.1, 1.0);
        if clamped != self.energy_initial {
            tracing::warn!(value = self.energy_initial, "energy_initial out of [0.1, 1.0], clamping");
            self.energy_initial = clamped;
        }
        let clamped = self.mood_initial.clamp(-1.0, 1.0);
        if clamped != self.mood_initial {
            tracing::warn!(value = self.mood_initial, "mood_initial out of [-1.0, 1.0], clamping");
            self.mood_initial = clamped;
        }

        if !(self.tier_avoiding_score < self.tier_acquaintance_score
            && self.tier_acquaintance_score < self.tier_friend_score)
        {
            let d = Self::default();
            tracing::warn!(
                avoiding = self.tier_avoiding_score,
                acquaintance = self.tier_acquaintance_score,
                friend = self.tier_friend_score,
                "relationship tier thresholds not strictly ordered, restoring defaults"
            );
            self.tier_avoiding_score = d.tier_avoiding_score;
            self.tier_acquaintance_score = d.tier_acquaintance_score;
            self.tier_friend_score = d.tier_friend_score;
        }

        if self.batch_size == 0 {
            tracing::warn!("batch_size 0 is not allowed, using 1");
            self.batch_size = 1;
        }
        if self.per_message_window == 0 {
            tracing::warn!("per_message_window 0 is not allowed, using 1");
            self.per_message_window = 1;
        }
        self
    }

    /// Summary / recovery chain: summarizer → general pool → judgment pool, deduplicated.
    pub fn summary_chain(&self) -> Vec<String> {
        let all: Vec<&String> = self.summarize_provider_names.iter()
            .chain(&self.general_pool)
            .chain(&self.judge_provider_names)
            .collect();
        murmur_llm::dispatch::dedup_ordered(&all)
    }

    /// Reply composition chain: reply pool → general pool, deduplicated.
    pub fn reply_chain(&self) -> Vec<String> {
        let all: Vec<&String> = self.reply_provider_names.iter()
            .chain(&self.general_pool)
            .collect();
        murmur_llm::dispatch::dedup_ordered(&all)
    }

    fn to_entries(&self) -> Vec<(&str, String, &str)> {
        vec![
            ("general_pool", self.general_pool.join(","), "Shared provider pool (comma-separated ids)"),
            ("judge_provider_names", self.judge_provider_names.join(","), "Dedicated judgment providers"),
            ("summarize_provider_names", self.summarize_provider_names.join(","), "Batch/recovery judgment providers"),
            ("reply_provider_names", self.reply_provider_names.join(","), "Reply composition providers"),
            ("reply_threshold", self.reply_threshold.to_string(), "Static reply threshold"),
            ("judge_include_reasoning", self.judge_include_reasoning.to_string(), "Keep judge reasoning text"),
            ("judge_max_retries", self.judge_max_retries.to_string(), "Extra attempts on malformed JSON"),
            ("overload_cooldown_secs", self.overload_cooldown_secs.to_string(), "Silence after all providers fail"),
            ("force_reply_bonus", self.force_reply_bonus.to_string(), "Bonus score for direct address"),
            ("weight_relevance", self.weights.relevance.to_string(), "Relevance weight"),
            ("weight_willingness", self.weights.willingness.to_string(), "Willingness weight"),
            ("weight_social", self.weights.social.to_string(), "Social weight"),
            ("weight_timing", self.weights.timing.to_string(), "Timing weight"),
            ("weight_continuity", self.weights.continuity.to_string(), "Continuity weight"),
            ("batch_size", self.batch_size.to_string(), "Messages per batch judgment"),
            ("per_message_window", self.per_message_window.to_string(), "Unanswered messages before batching again"),
            ("energy_initial", self.energy_initial.to_string(), "Energy of a new conversation"),
            ("energy_threshold", self.energy_threshold.to_string(), "Energy that forces a reply"),
            ("energy_decay_rate", self.energy_decay_rate.to_string(), "Energy cost per reply"),
            ("energy_recovery_rate", self.energy_recovery_rate.to_string(), "Energy regained per unanswered message"),
            ("mood_initial", self.mood_initial.to_string(), "Mood of a new conversation"),
            ("mood_increment", self.mood_increment.to_string(), "Mood step per judged mood"),
            ("mood_decay", self.mood_decay.to_string(), "Mood relaxation step"),
            ("mood_decay_interval_hours", self.mood_decay_interval_hours.to_string(), "Hours between passive mood relaxation"),
            ("max_consecutive_replies", self.max_consecutive_replies.to_string(), "Replies in a row before cooldown veto"),
            ("forced_replies_count_toward_cooldown", self.forced_replies_count_toward_cooldown.to_string(), "Forced replies increment the consecutive counter"),
            ("enable_user_profiles", self.enable_user_profiles.to_string(), "Track per-user social scores"),
            ("tier_friend_score", self.tier_friend_score.to_string(), "Score at or above which a user is a friend"),
            ("tier_acquaintance_score", self.tier_acquaintance_score.to_string(), "Score at or above which a user is an acquaintance"),
            ("tier_avoiding_score", self.tier_avoiding_score.to_string(), "Score at or below which a user is avoided"),
            ("score_positive_interaction", self.score_positive_interaction.to_string(), "Social score per reply"),
            ("score_negative_interaction", self.score_negative_interaction.to_string(), "Social score per negative unanswered message"),
            ("score_decay_per_day", self.score_decay_per_day.to_string(), "Daily social score decay magnitude"),
            ("social_decay_grace_days", self.social_decay_grace_days.to_string(), "Silent days before social decay"),
            ("maintenance_interval_secs", self.maintenance_interval_secs.to_string(), "Background maintenance period"),
            ("proactive_enabled", self.proactive_enabled.to_string(), "Allow proactive conversation starters"),
            ("proactive_energy_threshold", self.proactive_energy_threshold.to_string(), "Energy required for proactive start"),
            ("proactive_silence_minutes", self.proactive_silence_minutes.to_string(), "Silence required for proactive start"),
            ("proactive_cooldown_secs", self.proactive_cooldown_secs.to_string(), "Pause after each proactive start"),
            ("bot_nicknames", self.bot_nicknames.join(","), "Names that address the bot directly"),
        ]
    }
}

fn get_or<T: std::str::FromStr>(map: &HashMap<String, String>, key: &str, default: T) -> T {
    map.get(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn get_list(map: &HashMap<String, String>, key: &str, default: Vec<String>) -> Vec<String> {
    match map.get(key) {
        Some(v) => v
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect(),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_weights_already_normalised() {
        let cfg = EngageCfg::default().validate();
        assert!((cfg.weights.sum() - 1.0).abs() < 1e-6);
        assert_eq!(cfg.weights, ScoreWeights::default());
    }

    #[test]
    fn skewed_weights_are_rescaled() {
        let mut m = HashMap::new();
        m.insert("weight_relevance".to_owned(), "2".to_owned());
        m.insert("weight_willingness".to_owned(), "2".to_owned());
        m.insert("weight_social".to_owned(), "2".to_owned());
        m.insert("weight_timing".to_owned(), "2".to_owned());
        m.insert("weight_continuity".to_owned(), "2".to_owned());
        let cfg = EngageCfg::from_map(&m).validate();
        assert!((cfg.weights.sum() - 1.0).abs() < 1e-6);
        assert!((cfg.weights.relevance - 0.2).abs() < 1e-6);
    }

    #[test]
    fn arbitrary_weight_sets_normalise_to_one() {
        let sets = [
            [0.1, 0.1, 0.1, 0.1, 0.1],
            [5.0, 0.0, 0.0, 0.0, 0.0],
            [0.3, 0.7, 1.9, 0.01, 42.0],
            [1e-3, 2e-3, 3e-3, 4e-3, 5e-3],
        ];
        for s in sets {
            let w = ScoreWeights { relevance: s[0], willingness: s[1], social: s[2], timing: s[3], continuity: s[4] };
            let n = w.normalized().unwrap_or(w);
            let total: f64 = [n.relevance, n.willingness, n.social, n.timing, n.continuity]
                .iter()
                .map(|w| f64::from(*w))
                .sum();
            assert!((total - 1.0).abs() < 1e-6, "{s:?} -> {total}");
        }
    }

    #[test]
    fn zero_weights_fall_back_to_defaults() {
        let mut cfg = EngageCfg::default();
        cfg.weights = ScoreWeights { relevance: 0.0, willingness: 0.0, social: 0.0, timing: 0.0, continuity: 0.0 };
        let cfg = cfg.validate();
        assert_eq!(cfg.weights, ScoreWeights::default());
    }

    #[test]
    fn negative_or_nan_weight_restores_defaults() {
        let bad = [
            ScoreWeights { relevance: -1.0, willingness: 1.0, social: 1.0, timing: 0.0, continuity: 0.0 },
            ScoreWeights { relevance: f32::NAN, ..ScoreWeights::default() },
            ScoreWeights { timing: f32::INFINITY, ..ScoreWeights::default() },
        ];
        for w in bad {
            let cfg = EngageCfg { weights: w, ..EngageCfg::default() }.validate();
            assert_eq!(cfg.weights, ScoreWeights::default(), "{w:?}");
        }
    }

    #[test]
    fn validated_weights_keep_weighted_score_in_unit_range() {
        use crate::scoring::verdict::Subscores;
        let w = EngageCfg {
            weights: ScoreWeights { relevance: -1.0, willingness: 1.0, social: 1.0, timing: 0.0, continuity: 0.0 },
            ..EngageCfg::default()
        }
        .validate()
        .weights;
        let extremes = [
            Subscores { relevance: 0.0, willingness: 10.0, social: 10.0, timing: 0.0, continuity: 0.0 },
            Subscores { relevance: 10.0, willingness: 10.0, social: 10.0, timing: 10.0, continuity: 10.0 },
            Subscores { relevance: 0.0, willingness: 0.0, social: 0.0, timing: 0.0, continuity: 0.0 },
        ];
        for sub in extremes {
            let score = sub.weighted(&w);
            assert!((0.0..=1.0 + 1e-6).contains(&score), "{sub:?} -> {score}");
        }
    }

    #[test]
    fn mood_decay_interval_gets_a_positive_floor() {
        for bad in [0.0, -2.0, f32::NAN] {
            let cfg = EngageCfg { mood_decay_interval_hours: bad, ..EngageCfg::default() }.validate();
            assert_eq!(cfg.mood_decay_interval_hours, MIN_MOOD_DECAY_INTERVAL_HOURS);
        }
        let cfg = EngageCfg { mood_decay_interval_hours: 2.5, ..EngageCfg::default() }.validate();
        assert_eq!(cfg.mood_decay_interval_hours, 2.5);
    }

    #[test]
    fn lists_parse_from_comma_separated_values() {
        let mut m = HashMap::new();
        m.insert("general_pool".to_owned(), " a, b ,,c".to_owned());
        m.insert("batch_size".to_owned(), "3".to_owned());
        m.insert("reply_threshold".to_owned(), "not-a-number".to_owned());
        let cfg = EngageCfg::from_map(&m);
        assert_eq!(cfg.general_pool, vec!["a", "b", "c"]);
        assert_eq!(cfg.batch_size, 3);
        assert!((cfg.reply_threshold - 0.6).abs() < f32::EPSILON);
    }

    #[test]
    fn misordered_tiers_restore_defaults() {
        let mut cfg = EngageCfg::default();
        cfg.tier_acquaintance_score = 80.0;
        let cfg = cfg.validate();
        assert!(cfg.tier_avoiding_score < cfg.tier_acquaintance_score);
        assert!(cfg.tier_acquaintance_score < cfg.tier_friend_score);
    }

    #[test]
    fn summary_chain_orders_and_dedups() {
        let cfg = EngageCfg {
            summarize_provider_names: vec!["sum".into()],
            general_pool: vec!["g1".into(), "sum".into()],
            judge_provider_names: vec!["j1".into(), "g1".into()],
            ..EngageCfg::default()
        };
        assert_eq!(cfg.summary_chain(), vec!["sum", "g1", "j1"]);
        assert_eq!(cfg.reply_chain(), vec!["g1", "sum"]);
    }

    #[test]
    fn to_entries_roundtrip_through_map() {
        let mut cfg = EngageCfg::default();
        cfg.batch_size = 4;
        cfg.judge_provider_names = vec!["x".into(), "y".into()];
        let map: HashMap<String, String> = cfg
            .to_entries()
            .into_iter()
            .map(|(k, v, _)| (k.to_owned(), v))
            .collect();
        let back = EngageCfg::from_map(&map);
        assert_eq!(back.batch_size, 4);
        assert_eq!(back.judge_provider_names, vec!["x", "y"]);
    }
}
