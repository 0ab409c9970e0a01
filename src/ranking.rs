// src/ranking.rs
//! Ranking + best-pick selection.
//!
//! Ranking is a stable sort on `total_score` (descending), so equal totals keep
//! scrape order. Selection is a second model call over the ranked shortlist; if it
//! fails in any way the shortlist is returned untouched with no best picks.

use std::collections::HashSet;
use std::time::Duration;

use metrics::counter;
use serde_json::Value;

use crate::error::LlmError;
use crate::listing::{ScoreStatus, ScoredListing};
use crate::llm::{extract_json_object, sanitize_reason, DynLlmClient};
use crate::scoring::vehicle_text;

const REASON_MAX: usize = 1200;

/// Stable sort by total descending, truncated to `top_n`.
pub fn rank(mut scored: Vec<ScoredListing>, top_n: usize) -> Vec<ScoredListing> {
    scored.sort_by(|a, b| b.total_score.cmp(&a.total_score));
    scored.truncate(top_n);
    scored
}

pub fn selection_prompt(ranked: &[ScoredListing], best_n: usize) -> String {
    let blocks: Vec<String> = ranked
        .iter()
        .enumerate()
        .map(|(i, s)| {
            format!(
                "[Index {i}]\n{}\nScores: condition {}, features {}, ownership {}, maintenance {}, value {} (total {}/50)",
                vehicle_text(&s.listing),
                s.scores.condition,
                s.scores.features,
                s.scores.ownership,
                s.scores.maintenance,
                s.scores.value,
                s.total_score,
            )
        })
        .collect();
    let n = best_n.min(ranked.len());
    format!(
        r#"You are a vehicle evaluation expert. Below are the top-ranked used vehicle listings with their rubric scores.
Choose the best {n} for a buyer and explain why they stand out against the others.

Vehicles (each starts with [Index N]):
{}

Respond with ONLY a valid JSON object with two keys:
"best_indices": array of up to {n} integers (0-{}) naming the chosen vehicles, best first;
"reason": a short paragraph justifying the choice.
No markdown, no extra text."#,
        blocks.join("\n\n"),
        ranked.len().saturating_sub(1),
    )
}

/// Parsed selection: indices into the ranked list plus the shared justification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub indices: Vec<usize>,
    pub reason: String,
}

fn as_index(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parse the selection response. Indices outside `0..available` and duplicates are
/// dropped; at most `best_n` are kept. `None` without any valid index or reason.
pub fn parse_selection(text: &str, available: usize, best_n: usize) -> Option<Selection> {
    let obj = extract_json_object(text)?;

    let raw = obj
        .get("best_indices")
        .or_else(|| obj.get("indices"))
        .or_else(|| obj.get("best"))?;
    let items: Vec<&Value> = match raw {
        Value::Array(a) => a.iter().collect(),
        single => vec![single],
    };

    let mut seen = HashSet::new();
    let indices: Vec<usize> = items
        .into_iter()
        .filter_map(as_index)
        .filter(|&i| i >= 0 && (i as usize) < available)
        .map(|i| i as usize)
        .filter(|i| seen.insert(*i))
        .take(best_n)
        .collect();

    let reason = obj
        .get("reason")
        .or_else(|| obj.get("explanation"))
        .and_then(Value::as_str)
        .map(|r| sanitize_reason(r, REASON_MAX))
        .unwrap_or_default();

    if indices.is_empty() || reason.is_empty() {
        return None;
    }
    Some(Selection { indices, reason })
}

/// Ask the model for the best picks among `ranked` and mark them in place.
/// Returns the explanation, or an empty string when selection failed or was skipped.
pub async fn select_best(
    client: &DynLlmClient,
    ranked: &mut [ScoredListing],
    best_n: usize,
    call_timeout: Duration,
) -> String {
    // Fallback entries total 0 and rank after every scored one, so the scored
    // listings form a prefix; only they may become best picks.
    let eligible = ranked
        .iter()
        .take_while(|s| s.score_status == ScoreStatus::Scored)
        .count();
    if eligible == 0 || best_n == 0 {
        return String::new();
    }
    let ranked = &mut ranked[..eligible];
    let prompt = selection_prompt(ranked, best_n);
    let reply = tokio::time::timeout(call_timeout, client.complete(&prompt))
        .await
        .unwrap_or(Err(LlmError::Timeout(call_timeout)));
    let text = match reply {
        Ok(t) => t,
        Err(e) => {
            tracing::warn!(error = %e, "best-pick request failed");
            counter!("selection_failures_total").increment(1);
            return String::new();
        }
    };
    let Some(sel) = parse_selection(&text, ranked.len(), best_n) else {
        tracing::warn!("unparseable best-pick response");
        counter!("selection_failures_total").increment(1);
        return String::new();
    };

    for &i in &sel.indices {
        ranked[i].mark_best_pick(&sel.reason);
    }
    tracing::info!(picks = ?sel.indices, "best picks selected");
    sel.reason
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing::{RawListing, SubScores};
    use crate::llm::MockClient;
    use std::sync::Arc;

    fn scored(title: &str, s: u8) -> ScoredListing {
        let l = RawListing {
            title: title.into(),
            price: 1,
            mileage: 1,
            year: 2018,
            description: String::new(),
            source_url: title.into(),
            details: Default::default(),
        };
        ScoredListing::scored(l, SubScores::clamped(s as i64, s as i64, s as i64, s as i64, s as i64))
    }

    #[test]
    fn rank_is_descending_and_stable() {
        let out = rank(
            vec![scored("a", 5), scored("b", 9), scored("c", 5), scored("d", 9)],
            10,
        );
        let titles: Vec<_> = out.iter().map(|s| s.listing.title.as_str()).collect();
        assert_eq!(titles, vec!["b", "d", "a", "c"]);
    }

    #[test]
    fn rank_truncates() {
        let out = rank((0..15).map(|i| scored(&i.to_string(), 5)).collect(), 10);
        assert_eq!(out.len(), 10);
        assert_eq!(out[9].listing.title, "9");
    }

    #[test]
    fn selection_filters_bad_indices() {
        let t = r#"{"best_indices": [2, 2, 9, -1, "0", 1], "reason": "Low mileage\nand  full service history."}"#;
        let sel = parse_selection(t, 3, 3).unwrap();
        assert_eq!(sel.indices, vec![2, 0, 1]);
        assert_eq!(sel.reason, "Low mileage and full service history.");
    }

    #[test]
    fn selection_caps_at_best_n() {
        let t = r#"{"best_indices": [0, 1, 2, 3], "reason": "r"}"#;
        assert_eq!(parse_selection(t, 10, 3).unwrap().indices, vec![0, 1, 2]);
    }

    #[test]
    fn selection_requires_reason_and_index() {
        assert!(parse_selection(r#"{"best_indices": [0], "reason": "  "}"#, 3, 3).is_none());
        assert!(parse_selection(r#"{"best_indices": [7], "reason": "x"}"#, 3, 3).is_none());
        assert!(parse_selection("The first one is best.", 3, 3).is_none());
    }

    #[tokio::test]
    async fn fallback_entries_are_never_best_picks() {
        let mut ranked = vec![
            scored("Aqua", 8),
            ScoredListing::fallback(scored("Vezel", 1).listing),
        ];
        let mock = MockClient::fixed(r#"{"best_indices": [0, 1], "reason": "Cleanest history."}"#);
        let client: DynLlmClient = Arc::new(mock.clone());

        let why = select_best(&client, &mut ranked, 3, Duration::from_secs(1)).await;
        assert_eq!(why, "Cleanest history.");
        assert!(ranked[0].is_best_pick);
        assert!(!ranked[1].is_best_pick);
        assert!(ranked[1].best_pick_reason.is_empty());
    }

    #[tokio::test]
    async fn all_fallback_shortlist_skips_selection() {
        let mut ranked = vec![ScoredListing::fallback(scored("Vezel", 1).listing)];
        let mock = MockClient::fixed(r#"{"best_indices": [0], "reason": "x"}"#);
        let client: DynLlmClient = Arc::new(mock.clone());

        let why = select_best(&client, &mut ranked, 3, Duration::from_secs(1)).await;
        assert!(why.is_empty());
        assert_eq!(mock.calls(), 0);
        assert!(!ranked[0].is_best_pick);
    }

    #[test]
    fn prompt_lists_every_candidate() {
        let ranked = vec![scored("Aqua", 8), scored("Vezel", 7)];
        let p = selection_prompt(&ranked, 3);
        assert!(p.contains("[Index 0]") && p.contains("[Index 1]"));
        assert!(p.contains("best 2"));
        assert!(p.contains("(total 40/50)"));
    }
}
