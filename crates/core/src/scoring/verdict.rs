use serde::Deserialize;
use serde_json::Value;

use crate::config::ScoreWeights;
use crate::types::InferredMood;

/// Judge output as it comes off the wire. Every field is optional; ranges
/// are enforced in [`RawVerdict::subscores`], not downstream.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawVerdict {
    relevance: Option<Value>,
    willingness: Option<Value>,
    social: Option<Value>,
    timing: Option<Value>,
    continuity: Option<Value>,
    #[serde(alias = "mood")]
    inferred_mood: Option<Value>,
    reasoning: Option<Value>,
}

/// Five sub-scores, each in [0, 10].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Subscores {
    pub relevance: f32,
    pub willingness: f32,
    pub social: f32,
    pub timing: f32,
    pub continuity: f32,
}

impl Subscores {
    /// `Σ(subscore × weight) / 10`. In [0, 1] for normalised weights.
    pub fn weighted(&self, w: &ScoreWeights) -> f32 {
        (self.relevance * w.relevance
            + self.willingness * w.willingness
            + self.social * w.social
            + self.timing * w.timing
            + self.continuity * w.continuity)
            / 10.0
    }
}

impl RawVerdict {
    pub fn subscores(&self) -> Subscores {
        Subscores {
            relevance: score_field(self.relevance.as_ref()),
            willingness: score_field(self.willingness.as_ref()),
            social: score_field(self.social.as_ref()),
            timing: score_field(self.timing.as_ref()),
            continuity: score_field(self.continuity.as_ref()),
        }
    }

    pub fn inferred_mood(&self) -> InferredMood {
        match &self.inferred_mood {
            Some(Value::String(s)) => InferredMood::parse(s),
            _ => InferredMood::Neutral,
        }
    }

    pub fn reasoning(&self) -> Option<String> {
        match &self.reasoning {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_owned()),
            _ => None,
        }
    }
}

/// Numbers and numeric strings are accepted; anything else scores 0.
fn score_field(value: Option<&Value>) -> f32 {
    let raw = match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    if raw.is_finite() { (raw as f32).clamp(0.0, 10.0) } else { 0.0 }
}
