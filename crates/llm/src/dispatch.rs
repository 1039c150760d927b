//! Elastic dispatch: ordered-list failover over interchangeable backends.
//!
//! Two modes: free text (`text`, first non-empty answer wins) and
//! structured JSON (`json`, malformed output retried on the same backend).
//! The dispatcher is stateless. Callers own any round-robin offset and pass
//! it in as `start`; every backend error is logged and absorbed here, so the
//! only thing a caller ever sees is a result or `None`.

use std::collections::HashSet;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::provider::{GenerateRequest, LlmError, ProviderRegistry};

/// Outcome of a single call against a single backend.
#[derive(Debug)]
pub enum Attempt<T> {
    Success(T),
    /// Id did not resolve in the registry.
    NotFound,
    /// Backend answered with blank text.
    Empty,
    /// Backend answered but the body did not decode.
    Malformed(String),
    /// Transport, auth, rate-limit or backend error.
    Failed(LlmError),
}

impl<T> Attempt<T> {
    fn describe(&self) -> String {
        match self {
            Self::Success(_) => "success".into(),
            Self::NotFound => "provider not found".into(),
            Self::Empty => "empty response".into(),
            Self::Malformed(e) => format!("malformed response: {e}"),
            Self::Failed(e) => e.to_string(),
        }
    }
}

/// A successful dispatch and where it came from.
#[derive(Debug, Clone)]
pub struct Dispatched<T> {
    pub value: T,
    pub provider_id: String,
    /// Index of the winning id in the caller's (un-rotated) list.
    pub position: usize,
}

/// Remove duplicate ids, keeping the first occurrence.
pub fn dedup_ordered<S: AsRef<str>>(ids: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.iter()
        .map(|s| s.as_ref())
        .filter(|s| seen.insert(*s))
        .map(str::to_owned)
        .collect()
}

/// Rotate `ids` to begin at `start % len`, then drop duplicates.
/// Each entry carries its index in the original list.
pub fn attempt_order<S: AsRef<str>>(ids: &[S], start: usize) -> Vec<(usize, &str)> {
    if ids.is_empty() {
        return Vec::new();
    }
    let len = ids.len();
    let mut seen = HashSet::new();
    (0..len)
        .map(|i| (start + i) % len)
        .map(|pos| (pos, ids[pos].as_ref()))
        .filter(|(_, id)| seen.insert(*id))
        .collect()
}

/// Strip a surrounding markdown code fence (```json ... ```), if present.
pub fn strip_code_fence(text: &str) -> &str {
    let t = text.trim();
    let Some(rest) = t.strip_prefix("```") else {
        return t;
    };
    let rest = rest.strip_prefix("json").or_else(|| rest.strip_prefix("JSON")).unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Decode a JSON body, tolerating code fences and chatter around one object.
pub fn decode_json<T: DeserializeOwned>(text: &str) -> Result<T, String> {
    let body = strip_code_fence(text);
    match serde_json::from_str(body) {
        Ok(v) => Ok(v),
        Err(first) => {
            let (Some(open), Some(close)) = (body.find('{'), body.rfind('}')) else {
                return Err(first.to_string());
            };
            if close <= open {
                return Err(first.to_string());
            }
            serde_json::from_str(&body[open..=close]).map_err(|_| first.to_string())
        }
    }
}

/// Stateless failover caller over a shared provider registry.
#[derive(Debug, Clone)]
pub struct ElasticDispatcher {
    registry: Arc<ProviderRegistry>,
}

impl ElasticDispatcher {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Free-text dispatch: first non-empty answer wins.
    pub async fn text<S: AsRef<str>>(
        &self,
        ids: &[S],
        start: usize,
        request: &GenerateRequest,
    ) -> Option<Dispatched<String>> {
        let order = attempt_order(ids, start);
        let mut last_error = String::from("no providers in list");

        for (position, id) in &order {
            let attempt = self.call_text(id, request).await;
            match attempt {
                Attempt::Success(text) => {
                    tracing::debug!(provider = %id, "text dispatch succeeded");
                    return Some(Dispatched { value: text, provider_id: (*id).to_owned(), position: *position });
                }
                other => {
                    last_error = other.describe();
                    tracing::warn!(provider = %id, reason = %last_error, "text dispatch failed over");
                }
            }
        }

        let tried: Vec<&str> = order.iter().map(|(_, id)| *id).collect();
        tracing::error!(providers = ?tried, last_error = %last_error, "all providers exhausted");
        None
    }

    /// Structured dispatch: decode `T` from the first backend that produces
    /// valid JSON. Malformed output is retried on the same backend; any call
    /// failure abandons that backend at once.
    pub async fn json<T: DeserializeOwned, S: AsRef<str>>(
        &self,
        ids: &[S],
        start: usize,
        request: &GenerateRequest,
        retries: u32,
    ) -> Option<Dispatched<T>> {
        let order = attempt_order(ids, start);
        let mut last_error = String::from("no providers in list");

        'providers: for (position, id) in &order {
            for attempt_no in 0..=retries {
                let attempt = self.call_json::<T>(id, request).await;
                match attempt {
                    Attempt::Success(value) => {
                        tracing::debug!(provider = %id, attempt = attempt_no + 1, "json dispatch succeeded");
                        return Some(Dispatched { value, provider_id: (*id).to_owned(), position: *position });
                    }
                    Attempt::Empty | Attempt::Malformed(_) => {
                        last_error = attempt.describe();
                        tracing::warn!(
                            provider = %id,
                            attempt = attempt_no + 1,
                            max_attempts = retries + 1,
                            reason = %last_error,
                            "json dispatch got unusable output"
                        );
                    }
                    Attempt::NotFound | Attempt::Failed(_) => {
                        last_error = attempt.describe();
                        tracing::warn!(provider = %id, reason = %last_error, "json dispatch failed over");
                        continue 'providers;
                    }
                }
            }
            tracing::warn!(provider = %id, "retry budget spent, abandoning provider");
        }

        let tried: Vec<&str> = order.iter().map(|(_, id)| *id).collect();
        tracing::error!(providers = ?tried, last_error = %last_error, "all providers exhausted");
        None
    }

    async fn call_text(&self, id: &str, request: &GenerateRequest) -> Attempt<String> {
        let Some(provider) = self.registry.resolve(id) else {
            return Attempt::NotFound;
        };
        match provider.generate(request.clone()).await {
            Ok(text) if text.trim().is_empty() => Attempt::Empty,
            Ok(text) => Attempt::Success(text.trim().to_owned()),
            Err(e) => Attempt::Failed(e),
        }
    }

    async fn call_json<T: DeserializeOwned>(&self, id: &str, request: &GenerateRequest) -> Attempt<T> {
        match self.call_text(id, request).await {
            Attempt::Success(text) => match decode_json(&text) {
                Ok(v) => Attempt::Success(v),
                Err(e) => Attempt::Malformed(e),
            },
            Attempt::NotFound => Attempt::NotFound,
            Attempt::Empty => Attempt::Empty,
            Attempt::Malformed(e) => Attempt::Malformed(e),
            Attempt::Failed(e) => Attempt::Failed(e),
        }
    }
}
