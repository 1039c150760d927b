//! Scoring engine: weighted multi-criteria verdicts and the two binary
//! judgments (batch summary, overload recovery).

pub mod overload;
pub mod verdict;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use murmur_llm::{ElasticDispatcher, GenerateRequest};

use crate::config::EngageCfg;
use crate::types::ScoringVerdict;
use overload::OverloadTracker;
use verdict::RawVerdict;

pub use overload::OverloadStatus;

/// Which binary judgment is being asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryJudgment {
    Batch { count: u32 },
    Recovery,
}

impl BinaryJudgment {
    fn label(&self) -> &'static str {
        match self {
            Self::Batch { .. } => "batch",
            Self::Recovery => "recovery",
        }
    }
}

pub struct ScoringEngine {
    dispatcher: ElasticDispatcher,
    cfg: Arc<EngageCfg>,
    overload: Arc<OverloadTracker>,
    /// Round-robin start into `judge_provider_names`; advances past each winner.
    judge_offset: AtomicUsize,
}

impl ScoringEngine {
    pub fn new(dispatcher: ElasticDispatcher, cfg: Arc<EngageCfg>, overload: Arc<OverloadTracker>) -> Self {
        Self { dispatcher, cfg, overload, judge_offset: AtomicUsize::new(0) }
    }

    pub fn overload(&self) -> &Arc<OverloadTracker> {
        &self.overload
    }

    /// Score one message. Never fails: exhaustion marks the conversation as
    /// overloaded and yields an `exhausted` non-reply verdict.
    pub async fn judge_message(
        &self,
        conversation_id: &str,
        request: &GenerateRequest,
        bonus_score: f32,
        now: DateTime<Utc>,
    ) -> ScoringVerdict {
        let judges = &self.cfg.judge_provider_names;
        let general = &self.cfg.general_pool;
        if judges.is_empty() && general.is_empty() {
            tracing::warn!(conversation = %conversation_id, "no judgment providers configured");
            return ScoringVerdict::silent("no judgment providers configured");
        }

        let retries = self.cfg.judge_max_retries;
        let mut dispatched = None;
        if !judges.is_empty() {
            let start = self.judge_offset.load(Ordering::Relaxed) % judges.len();
            dispatched = self.dispatcher.json::<RawVerdict, _>(judges, start, request, retries).await;
            if let Some(d) = &dispatched {
                self.judge_offset.store((d.position + 1) % judges.len(), Ordering::Relaxed);
            } else if !general.is_empty() {
                tracing::warn!(conversation = %conversation_id, "judgment pool exhausted, falling back to general pool");
            }
        }
        if dispatched.is_none() && !general.is_empty() {
            dispatched = self.dispatcher.json::<RawVerdict, _>(general, 0, request, retries).await;
        }

        let Some(dispatched) = dispatched else {
            self.overload.mark(conversation_id, now, self.cfg.overload_cooldown_secs);
            return ScoringVerdict::exhausted("all judgment providers failed, entering overload cooldown");
        };

        let raw = dispatched.value;
        let sub = raw.subscores();
        let weighted = sub.weighted(&self.cfg.weights);
        let overall_score = weighted + bonus_score;
        let should_reply = overall_score >= self.cfg.reply_threshold;
        let inferred_mood = raw.inferred_mood();

        if bonus_score > 0.0 {
            tracing::info!(conversation = %conversation_id, bonus_score, weighted, overall_score, "bonus applied");
        }
        tracing::info!(
            conversation = %conversation_id,
            provider = %dispatched.provider_id,
            overall_score,
            mood = inferred_mood.as_str(),
            should_reply,
            "message judged"
        );

        ScoringVerdict {
            relevance: sub.relevance,
            willingness: sub.willingness,
            social: sub.social,
            timing: sub.timing,
            continuity: sub.continuity,
            inferred_mood,
            overall_score,
            should_reply,
            reasoning: if self.cfg.judge_include_reasoning { raw.reasoning() } else { None },
            exhausted: false,
        }
    }

    /// Yes/no judgment over the summary chain (summarizer → general → judgment).
    /// Exhaustion or an empty chain answers "no".
    pub async fn judge_binary(
        &self,
        conversation_id: &str,
        kind: BinaryJudgment,
        request: &GenerateRequest,
    ) -> bool {
        let chain = self.cfg.summary_chain();
        if chain.is_empty() {
            tracing::warn!(conversation = %conversation_id, judgment = kind.label(), "no summary providers configured");
            return false;
        }
        match self.dispatcher.text(&chain, 0, request).await {
            Some(d) => {
                let yes = parse_yes(&d.value);
                tracing::info!(
                    conversation = %conversation_id,
                    judgment = kind.label(),
                    provider = %d.provider_id,
                    yes,
                    "binary judgment"
                );
                yes
            }
            None => {
                tracing::warn!(conversation = %conversation_id, judgment = kind.label(), "binary judgment exhausted");
                false
            }
        }
    }
}

/// Case-insensitive substring match for "YES".
pub fn parse_yes(text: &str) -> bool {
    text.to_ascii_uppercase().contains("YES")
}
