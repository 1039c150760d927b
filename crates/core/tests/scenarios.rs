//! End-to-end engagement scenarios against scripted providers, no database.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use murmur_core::affect::AffectStore;
use murmur_core::config::EngageCfg;
use murmur_core::engagement::EngagementMachine;
use murmur_core::prompt::BasicPrompts;
use murmur_core::respond::DispatchResponder;
use murmur_core::scoring::ScoringEngine;
use murmur_core::scoring::overload::OverloadTracker;
use murmur_core::types::{InboundMessage, JudgmentMode, Outcome, ReplyKind, SilenceReason};
use murmur_llm::provider::{LlmError, ScriptedProvider};
use murmur_llm::{ElasticDispatcher, ProviderRegistry};

const CONV: &str = "room";

fn verdict_json(score: u8, mood: &str) -> String {
    format!(
        r#"{{"relevance":{score},"willingness":{score},"social":{score},"timing":{score},"continuity":{score},"inferred_mood":"{mood}"}}"#
    )
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).single().unwrap()
}

struct Harness {
    store: AffectStore,
    machine: EngagementMachine,
    judge: ScriptedProvider,
    summary: ScriptedProvider,
    writer: ScriptedProvider,
}

impl Harness {
    fn new(cfg: EngageCfg, judge: ScriptedProvider, summary: ScriptedProvider, writer: ScriptedProvider) -> Self {
        let cfg = Arc::new(EngageCfg {
            judge_provider_names: vec!["judge".into()],
            summarize_provider_names: vec!["summary".into()],
            reply_provider_names: vec!["writer".into()],
            judge_max_retries: 0,
            ..cfg
        });
        let registry = ProviderRegistry::new()
            .with("judge", Arc::new(judge.clone()))
            .with("summary", Arc::new(summary.clone()))
            .with("writer", Arc::new(writer.clone()));
        let dispatcher = ElasticDispatcher::new(Arc::new(registry));
        let prompts = Arc::new(BasicPrompts::new(false, cfg.reply_threshold));
        let store = AffectStore::new(Arc::clone(&cfg));
        let scoring = ScoringEngine::new(dispatcher.clone(), Arc::clone(&cfg), Arc::new(OverloadTracker::new()));
        let responder = Arc::new(DispatchResponder::new(dispatcher, prompts.clone(), cfg.reply_chain()));
        let machine = EngagementMachine::new(Arc::clone(&cfg), store.engine(), scoring, prompts, responder);
        Self { store, machine, judge, summary, writer }
    }

    fn set_state(&self, now: DateTime<Utc>, f: impl FnOnce(&mut murmur_core::types::ConversationState)) {
        self.store.engine().update(CONV, now, f);
    }

    async fn send(&self, message: InboundMessage, now: DateTime<Utc>) -> Outcome {
        self.machine.handle_at(&message, now).await
    }
}

fn plain(text: &str) -> InboundMessage {
    InboundMessage::new(CONV, "ann", text)
}

#[tokio::test]
async fn declined_batch_stays_batched_and_recovers_energy() {
    let h = Harness::new(
        EngageCfg { batch_size: 3, ..EngageCfg::default() },
        ScriptedProvider::always("judge", verdict_json(9, "neutral")),
        ScriptedProvider::always("summary", "no, nothing worth saying"),
        ScriptedProvider::always("writer", "unused"),
    );
    let now = t0();

    assert_eq!(h.send(plain("one"), now).await, Outcome::Silent(SilenceReason::Absorbed));
    assert_eq!(h.send(plain("two"), now).await, Outcome::Silent(SilenceReason::Absorbed));
    assert_eq!(h.send(plain("three"), now).await, Outcome::Silent(SilenceReason::Declined));

    let s = h.store.conversation_if_present(CONV).unwrap();
    assert_eq!(s.mode, JudgmentMode::Batched);
    assert_eq!(s.message_counter, 0);
    assert!((s.energy - 0.56).abs() < 1e-5);
    assert_eq!(s.total_messages, 3);
    assert_eq!(h.summary.calls(), 1);
    assert_eq!(h.judge.calls(), 0);
    assert_eq!(h.writer.calls(), 0);
}

#[tokio::test]
async fn partial_batch_never_calls_a_provider() {
    let batch_size = 4;
    let h = Harness::new(
        EngageCfg { batch_size, ..EngageCfg::default() },
        ScriptedProvider::always("judge", verdict_json(9, "positive")),
        ScriptedProvider::always("summary", "YES"),
        ScriptedProvider::always("writer", "unused"),
    );
    let mut now = t0();
    for i in 0..batch_size - 1 {
        let out = h.send(plain(&format!("message {i}")), now).await;
        assert_eq!(out, Outcome::Silent(SilenceReason::Absorbed));
        now += Duration::seconds(20);
    }

    assert_eq!(h.judge.calls(), 0);
    assert_eq!(h.summary.calls(), 0);
    assert_eq!(h.writer.calls(), 0);
    let s = h.store.conversation_if_present(CONV).unwrap();
    assert_eq!(s.mode, JudgmentMode::Batched);
    assert_eq!(s.message_counter, batch_size - 1);
}

#[tokio::test]
async fn accepted_batch_replies_and_switches_to_per_message() {
    let h = Harness::new(
        EngageCfg { batch_size: 2, ..EngageCfg::default() },
        ScriptedProvider::always("judge", verdict_json(0, "neutral")),
        ScriptedProvider::always("summary", "Yes"),
        ScriptedProvider::always("writer", "count me in"),
    );
    let now = t0();

    h.send(plain("lunch?"), now).await;
    let out = h.send(plain("anyone?"), now).await;
    assert_eq!(out, Outcome::Replied { kind: ReplyKind::Batch { count: 2 }, text: "count me in".into() });

    let s = h.store.conversation_if_present(CONV).unwrap();
    assert_eq!(s.mode, JudgmentMode::PerMessage);
    assert_eq!(s.message_counter, 0);
    assert_eq!(s.consecutive_reply_count, 1);
    assert_eq!(s.last_reply_time, Some(now));
    assert!((s.energy - 0.4).abs() < 1e-5);
}

#[tokio::test]
async fn positive_mood_lowers_threshold_enough_to_reply() {
    let h = Harness::new(
        EngageCfg::default(),
        ScriptedProvider::always("judge", verdict_json(5, "neutral")),
        ScriptedProvider::always("summary", "no"),
        ScriptedProvider::always("writer", "ha, agreed"),
    );
    let now = t0();
    h.set_state(now, |s| {
        s.mode = JudgmentMode::PerMessage;
        s.mood = 0.4;
    });

    let out = h.send(plain("nice weather"), now).await;
    assert_eq!(out, Outcome::Replied { kind: ReplyKind::PerMessage, text: "ha, agreed".into() });
    assert_eq!(h.store.conversation_if_present(CONV).unwrap().total_replies, 1);
}

#[tokio::test]
async fn neutral_mood_keeps_same_score_silent() {
    let h = Harness::new(
        EngageCfg::default(),
        ScriptedProvider::always("judge", verdict_json(5, "neutral")),
        ScriptedProvider::always("summary", "no"),
        ScriptedProvider::always("writer", "unused"),
    );
    let now = t0();
    h.set_state(now, |s| s.mode = JudgmentMode::PerMessage);

    assert_eq!(h.send(plain("nice weather"), now).await, Outcome::Silent(SilenceReason::Declined));
    let s = h.store.conversation_if_present(CONV).unwrap();
    assert_eq!(s.message_counter, 1);
    assert_eq!(h.writer.calls(), 0);
}

#[tokio::test]
async fn consecutive_reply_cooldown_vetoes_and_counts_message() {
    let h = Harness::new(
        EngageCfg::default(),
        ScriptedProvider::always("judge", verdict_json(9, "positive")),
        ScriptedProvider::always("summary", "no"),
        ScriptedProvider::always("writer", "unused"),
    );
    let now = t0();
    h.set_state(now, |s| {
        s.mode = JudgmentMode::PerMessage;
        s.consecutive_reply_count = 3;
    });

    assert_eq!(h.send(plain("what do you think?"), now).await, Outcome::Silent(SilenceReason::Declined));
    let s = h.store.conversation_if_present(CONV).unwrap();
    assert_eq!(s.message_counter, 1);
    assert_eq!(s.total_replies, 0);
    assert_eq!(h.judge.calls(), 1);
    assert_eq!(h.writer.calls(), 0);
}

#[tokio::test]
async fn forced_message_ignores_consecutive_reply_cooldown() {
    let h = Harness::new(
        EngageCfg::default(),
        ScriptedProvider::always("judge", verdict_json(9, "positive")),
        ScriptedProvider::always("summary", "no"),
        ScriptedProvider::always("writer", "you called?"),
    );
    let now = t0();
    h.set_state(now, |s| {
        s.mode = JudgmentMode::PerMessage;
        s.consecutive_reply_count = 3;
    });

    let out = h.send(plain("murmur!").with_bonus(0.5), now).await;
    assert!(out.is_reply());
    let s = h.store.conversation_if_present(CONV).unwrap();
    assert_eq!(s.consecutive_reply_count, 4);
    // forced replies are free
    assert!((s.energy - 0.5).abs() < 1e-5);
}

#[tokio::test]
async fn provider_exhaustion_enters_overload_and_drops_messages() {
    let h = Harness::new(
        EngageCfg::default(),
        ScriptedProvider::failing("judge", LlmError::Timeout),
        ScriptedProvider::failing("summary", LlmError::RateLimited),
        ScriptedProvider::always("writer", "unused"),
    );
    let now = t0();
    h.set_state(now, |s| s.mode = JudgmentMode::PerMessage);

    assert_eq!(h.send(plain("hello?"), now).await, Outcome::Silent(SilenceReason::Declined));
    let status = h.machine.overload().status(CONV, now);
    assert!(status.in_cooldown);
    assert_eq!(status.deadline, Some(now + Duration::seconds(60)));
    assert!(status.pending_recovery);

    let before = h.store.conversation_if_present(CONV).unwrap();
    let judge_calls = h.judge.calls();
    let later = now + Duration::seconds(10);
    assert_eq!(h.send(plain("still there?"), later).await, Outcome::Silent(SilenceReason::Cooldown));
    assert_eq!(h.store.conversation_if_present(CONV).unwrap(), before);
    assert_eq!(h.judge.calls(), judge_calls);
}

#[tokio::test]
async fn recovery_judgment_runs_once_after_cooldown() {
    let h = Harness::new(
        EngageCfg::default(),
        ScriptedProvider::failing("judge", LlmError::Timeout),
        ScriptedProvider::always("summary", "YES"),
        ScriptedProvider::always("writer", "sorry, I'm back"),
    );
    let now = t0();
    h.set_state(now, |s| s.mode = JudgmentMode::PerMessage);
    h.send(plain("hello?"), now).await;
    assert!(h.machine.overload().status(CONV, now).pending_recovery);

    let after = now + Duration::seconds(61);
    let out = h.send(plain("anyone home"), after).await;
    assert_eq!(out, Outcome::Replied { kind: ReplyKind::Recovery, text: "sorry, I'm back".into() });
    let status = h.machine.overload().status(CONV, after);
    assert!(!status.in_cooldown);
    assert!(!status.pending_recovery);
    assert_eq!(h.summary.calls(), 1);

    // next message goes back to normal scoring, which fails again
    h.send(plain("again"), after).await;
    assert!(h.machine.overload().status(CONV, after).in_cooldown);
    assert_eq!(h.summary.calls(), 1);
}

#[tokio::test]
async fn forced_message_bypasses_batch_window() {
    let h = Harness::new(
        EngageCfg { batch_size: 5, ..EngageCfg::default() },
        ScriptedProvider::always("judge", verdict_json(2, "neutral")),
        ScriptedProvider::always("summary", "no"),
        ScriptedProvider::always("writer", "hi!"),
    );
    let now = t0();
    assert_eq!(h.send(plain("first"), now).await, Outcome::Silent(SilenceReason::Absorbed));
    assert_eq!(h.store.conversation_if_present(CONV).unwrap().message_counter, 1);

    let out = h.send(plain("murmur, hi").with_bonus(0.5), now).await;
    assert_eq!(out, Outcome::Replied { kind: ReplyKind::PerMessage, text: "hi!".into() });
    assert_eq!(h.judge.calls(), 1);
    assert_eq!(h.summary.calls(), 0);

    let s = h.store.conversation_if_present(CONV).unwrap();
    assert_eq!(s.mode, JudgmentMode::PerMessage);
    assert_eq!(s.message_counter, 0);
}

#[tokio::test]
async fn forced_message_skips_overload_cooldown() {
    let h = Harness::new(
        EngageCfg::default(),
        ScriptedProvider::new(
            "judge",
            vec![Err(LlmError::Timeout), Ok(verdict_json(3, "neutral"))],
        ),
        ScriptedProvider::always("summary", "no"),
        ScriptedProvider::always("writer", "here"),
    );
    let now = t0();
    h.set_state(now, |s| s.mode = JudgmentMode::PerMessage);
    h.send(plain("ping"), now).await;
    assert!(h.machine.overload().in_cooldown(CONV, now));

    let poke = InboundMessage::new(CONV, "ann", "(poke)").with_special_event();
    let out = h.send(poke, now + Duration::seconds(5)).await;
    assert_eq!(out, Outcome::Silent(SilenceReason::Declined));
    assert_eq!(h.judge.calls(), 2);
    assert!(h.machine.overload().in_cooldown(CONV, now + Duration::seconds(5)));
}

#[tokio::test]
async fn per_message_window_falls_back_to_batched() {
    let h = Harness::new(
        EngageCfg { per_message_window: 3, ..EngageCfg::default() },
        ScriptedProvider::always("judge", verdict_json(1, "neutral")),
        ScriptedProvider::always("summary", "no"),
        ScriptedProvider::always("writer", "unused"),
    );
    let now = t0();
    h.set_state(now, |s| s.mode = JudgmentMode::PerMessage);

    for _ in 0..2 {
        h.send(plain("chatter"), now).await;
        assert_eq!(h.store.conversation_if_present(CONV).unwrap().mode, JudgmentMode::PerMessage);
    }
    h.send(plain("chatter"), now).await;
    let s = h.store.conversation_if_present(CONV).unwrap();
    assert_eq!(s.mode, JudgmentMode::Batched);
    assert_eq!(s.message_counter, 0);
}

#[tokio::test]
async fn failed_composition_is_treated_as_unanswered() {
    let h = Harness::new(
        EngageCfg::default(),
        ScriptedProvider::always("judge", verdict_json(9, "neutral")),
        ScriptedProvider::always("summary", "no"),
        ScriptedProvider::failing("writer", LlmError::EmptyResponse),
    );
    let now = t0();
    h.set_state(now, |s| s.mode = JudgmentMode::PerMessage);

    assert_eq!(h.send(plain("question"), now).await, Outcome::Silent(SilenceReason::ComposeFailed));
    let s = h.store.conversation_if_present(CONV).unwrap();
    assert_eq!(s.total_replies, 0);
    assert_eq!(s.last_reply_time, None);
    assert_eq!(s.mode, JudgmentMode::PerMessage);
    assert!((s.energy - 0.52).abs() < 1e-5);
}

#[tokio::test]
async fn affect_stays_in_bounds_under_mixed_traffic() {
    let moods = ["positive", "negative", "neutral"];
    let script = (0..60)
        .map(|i| Ok(verdict_json((i * 7 % 11) as u8, moods[i % 3])))
        .collect();
    let h = Harness::new(
        EngageCfg { batch_size: 2, per_message_window: 4, ..EngageCfg::default() },
        ScriptedProvider::new("judge", script),
        ScriptedProvider::new("summary", vec![Ok("yes".into()), Ok("no".into()), Ok("no".into())]),
        ScriptedProvider::always("writer", "ok"),
    );
    let mut now = t0();
    for i in 0..60 {
        let mut msg = plain("msg");
        if i % 5 == 0 {
            msg = msg.with_bonus(0.5);
        }
        h.send(msg, now).await;
        let s = h.store.conversation_if_present(CONV).unwrap();
        assert!((0.1..=1.0).contains(&s.energy), "energy {} out of bounds", s.energy);
        assert!((-1.0..=1.0).contains(&s.mood), "mood {} out of bounds", s.mood);
        now += Duration::minutes(7);
    }
}

#[tokio::test]
async fn reset_forgets_conversation_until_next_message() {
    let h = Harness::new(
        EngageCfg::default(),
        ScriptedProvider::always("judge", verdict_json(9, "neutral")),
        ScriptedProvider::always("summary", "no"),
        ScriptedProvider::always("writer", "hello"),
    );
    let now = t0();
    h.send(plain("hi").with_bonus(0.5), now).await;
    assert!(h.store.delete_conversation(CONV));
    assert!(h.store.conversation_if_present(CONV).is_none());

    h.send(plain("hi again"), now).await;
    let s = h.store.conversation_if_present(CONV).unwrap();
    assert_eq!(s.mode, JudgmentMode::Batched);
    assert_eq!(s.total_replies, 0);
}
