//! Score requester: one rubric request per candidate, five sub-scores parsed back out.
//!
//! Rubric dimensions (each 1–10): condition, features, ownership, maintenance, value.
//! The parser accepts a JSON object (possibly fenced or wrapped in prose) and falls back
//! to `label: number` lines in any case or order. A candidate whose call fails, times
//! out or yields no complete score set gets `SubScores::fallback()`; the others are
//! unaffected. A rejected credential, or a channel that answers none of the calls, is a
//! run-level failure reported through `ScoreBatch::channel_error`.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use once_cell::sync::OnceCell;
use regex::Regex;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::{EvalError, LlmError};
use crate::listing::{RawListing, ScoredListing, SubScores};
use crate::llm::{extract_json_object, DynLlmClient};

const DESCRIPTION_MAX: usize = 800;

/// Short descriptive block for one listing, shared with the selection prompt.
pub fn vehicle_text(l: &RawListing) -> String {
    let mut parts = vec![
        format!("Name/Model: {}", if l.title.is_empty() { "N/A" } else { l.title.as_str() }),
        format!("Price (LKR): {}", l.price),
        format!("Mileage (km): {}", l.mileage),
        format!("Year: {}", l.year),
    ];
    let d = &l.details;
    for (label, v) in [
        ("Make", &d.make),
        ("Model", &d.model),
        ("Gear", &d.gear),
        ("Fuel Type", &d.fuel_type),
        ("Engine (cc)", &d.engine_cc),
        ("Options", &d.options),
    ] {
        if !v.is_empty() {
            parts.push(format!("{label}: {v}"));
        }
    }
    let desc: String = l.description.chars().take(DESCRIPTION_MAX).collect();
    if !desc.is_empty() {
        parts.push(format!("Description/Features: {desc}"));
    }
    parts.join("\n")
}

pub fn rubric_prompt(l: &RawListing) -> String {
    format!(
        r#"You are a vehicle evaluation expert. Score the following used vehicle listing on five criteria, each an integer from 1 (poor) to 10 (excellent):
- condition: apparent physical and mechanical condition
- features: equipment, options and specifications
- ownership: ownership history and documentation
- maintenance: expected maintenance cost and service record
- value: value for money at the asking price

Listing:
{}

Respond with ONLY a JSON object with exactly these integer keys: "condition", "features", "ownership", "maintenance", "value".
No markdown, no extra text."#,
        vehicle_text(l)
    )
}

#[derive(Default)]
struct Partial {
    condition: Option<i64>,
    features: Option<i64>,
    ownership: Option<i64>,
    maintenance: Option<i64>,
    value: Option<i64>,
}

impl Partial {
    fn set(&mut self, label: &str, v: i64) {
        let slot = match label {
            "condition" => &mut self.condition,
            "feature" | "features" => &mut self.features,
            "ownership" => &mut self.ownership,
            "maintenance" => &mut self.maintenance,
            "value" => &mut self.value,
            _ => return,
        };
        slot.get_or_insert(v);
    }

    fn finish(self) -> Option<SubScores> {
        Some(SubScores::clamped(
            self.condition?,
            self.features?,
            self.ownership?,
            self.maintenance?,
            self.value?,
        ))
    }
}

fn json_number(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.round() as i64)),
        Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f.round() as i64),
        _ => None,
    }
}

fn normalize_label(key: &str) -> String {
    let k = key.trim().to_lowercase();
    k.trim_end_matches("_score")
        .trim_end_matches(" score")
        .trim()
        .to_string()
}

fn parse_json_scores(text: &str) -> Option<SubScores> {
    let mut obj = extract_json_object(text)?;
    // Some models nest the object: {"scores": {...}}
    if let Some(Value::Object(inner)) = obj.remove("scores") {
        obj = inner;
    }
    let mut p = Partial::default();
    for (k, v) in &obj {
        if let Some(n) = json_number(v) {
            p.set(&normalize_label(k), n);
        }
    }
    p.finish()
}

/// Blank out echoed rubric ranges ("(1-10)", "1 to 10") so the value after them is read
/// instead of the range bound.
fn strip_scale_hints(text: &str) -> String {
    static RE_SCALE: OnceCell<Regex> = OnceCell::new();
    let re = RE_SCALE.get_or_init(|| {
        Regex::new(r"(?i)[(\[]\s*\d+\s*(?:-|–|to)\s*\d+\s*[)\]]|\b[01]\s*(?:-|–|to)\s*10\b")
            .unwrap()
    });
    re.replace_all(text, " ").into_owned()
}

fn parse_labelled_scores(text: &str) -> Option<SubScores> {
    let text = strip_scale_hints(text);
    static RE_LABEL: OnceCell<Regex> = OnceCell::new();
    let re = RE_LABEL.get_or_init(|| {
        Regex::new(
            r"(?i)\b(condition|features?|ownership|maintenance|value)\b[^\d\n]{0,24}?(-?\d+(?:\.\d+)?)",
        )
        .unwrap()
    });
    let mut p = Partial::default();
    for cap in re.captures_iter(&text) {
        let label = cap[1].to_lowercase();
        if let Ok(f) = cap[2].parse::<f64>() {
            p.set(&label, f.round() as i64);
        }
    }
    p.finish()
}

/// Recover the five sub-scores from free-form model output, clamped to [1, 10].
/// `None` when no complete set is present.
pub fn parse_scores(text: &str) -> Option<SubScores> {
    parse_json_scores(text).or_else(|| parse_labelled_scores(text))
}

/// How one scoring call ended, beyond the listing it produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallOutcome {
    Answered,
    /// No usable reply: transport error, error status, timeout or empty completion.
    Failed,
    /// The provider refused the credential (401/403) or no client is configured.
    Rejected,
}

fn classify(err: &LlmError) -> CallOutcome {
    match err {
        LlmError::Status(401 | 403) | LlmError::NotConfigured(_) => CallOutcome::Rejected,
        _ => CallOutcome::Failed,
    }
}

/// Result of scoring one candidate set.
#[derive(Debug, Clone)]
pub struct ScoreBatch {
    /// One entry per candidate, in input order.
    pub scored: Vec<ScoredListing>,
    /// Calls that got no usable reply from the channel.
    pub failed_calls: usize,
    /// Calls refused for lack of a valid credential.
    pub rejected_calls: usize,
    last_error: Option<String>,
}

impl ScoreBatch {
    /// Run-level failure hidden behind per-listing fallbacks: a rejected credential, or a
    /// channel that answered none of the calls.
    pub fn channel_error(&self) -> Option<EvalError> {
        let detail = self.last_error.clone().unwrap_or_default();
        if self.rejected_calls > 0 {
            return Some(EvalError::Configuration(format!(
                "scoring provider rejected the credential: {detail}"
            )));
        }
        if !self.scored.is_empty() && self.failed_calls == self.scored.len() {
            return Some(EvalError::llm(format!(
                "all {} scoring calls failed, last: {detail}",
                self.failed_calls
            )));
        }
        None
    }
}

/// Fans candidates out to the scoring channel with bounded concurrency.
pub struct ScoreRequester {
    client: DynLlmClient,
    concurrency: usize,
    call_timeout: Duration,
}

impl ScoreRequester {
    pub fn new(client: DynLlmClient, concurrency: usize, call_timeout: Duration) -> Self {
        Self {
            client,
            concurrency: concurrency.max(1),
            call_timeout,
        }
    }

    async fn score_one(
        client: DynLlmClient,
        listing: RawListing,
        call_timeout: Duration,
    ) -> (ScoredListing, CallOutcome, Option<String>) {
        let prompt = rubric_prompt(&listing);
        counter!("scoring_calls_total").increment(1);
        let reply = tokio::time::timeout(call_timeout, client.complete(&prompt))
            .await
            .unwrap_or(Err(LlmError::Timeout(call_timeout)));
        let text = match reply {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(url = %listing.source_url, error = %e, "scoring call failed");
                counter!("scoring_fallback_total").increment(1);
                return (ScoredListing::fallback(listing), classify(&e), Some(e.to_string()));
            }
        };
        match parse_scores(&text) {
            Some(scores) => (ScoredListing::scored(listing, scores), CallOutcome::Answered, None),
            None => {
                tracing::warn!(url = %listing.source_url, "unparseable scoring response");
                counter!("scoring_fallback_total").increment(1);
                (ScoredListing::fallback(listing), CallOutcome::Answered, None)
            }
        }
    }

    /// Score every candidate. Output is in input (scrape) order regardless of
    /// completion order.
    ///
    /// Calls live in a `JoinSet`, so dropping this future (run timeout) aborts the
    /// calls not yet finished or started.
    pub async fn score_all(&self, candidates: Vec<RawListing>) -> ScoreBatch {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut set = JoinSet::new();
        for (idx, listing) in candidates.iter().cloned().enumerate() {
            let sem = semaphore.clone();
            let client = self.client.clone();
            let call_timeout = self.call_timeout;
            set.spawn(async move {
                let _permit = sem.acquire_owned().await;
                (idx, Self::score_one(client, listing, call_timeout).await)
            });
        }

        let mut slots: Vec<Option<ScoredListing>> = vec![None; candidates.len()];
        let mut failed_calls = 0;
        let mut rejected_calls = 0;
        let mut last_error = None;
        while let Some(res) = set.join_next().await {
            match res {
                Ok((idx, (scored, outcome, err))) => {
                    match outcome {
                        CallOutcome::Answered => {}
                        CallOutcome::Failed => failed_calls += 1,
                        CallOutcome::Rejected => rejected_calls += 1,
                    }
                    if err.is_some() {
                        last_error = err;
                    }
                    slots[idx] = Some(scored);
                }
                Err(e) => tracing::error!(error = %e, "scoring task aborted"),
            }
        }

        let scored = slots
            .into_iter()
            .zip(candidates)
            .map(|(slot, listing)| slot.unwrap_or_else(|| ScoredListing::fallback(listing)))
            .collect();
        ScoreBatch {
            scored,
            failed_calls,
            rejected_calls,
            last_error,
        }
    }
}
