// src/listing.rs
//! Records flowing through one evaluation run: scraped listings, user criteria,
//! scored listings and the final run result.

use serde::{Deserialize, Serialize};

/// Optional vehicle attributes read from a listing's detail page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleDetails {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub make: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub gear: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub fuel_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub engine_cc: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub options: String,
}

/// One scraped advertisement. Numeric fields are always parsed; a listing
/// whose price, mileage or year could not be read never becomes a `RawListing`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawListing {
    pub title: String,
    /// Asking price in LKR.
    pub price: u64,
    /// Odometer reading in km.
    pub mileage: u64,
    /// Year of manufacture.
    pub year: u16,
    pub description: String,
    pub source_url: String,
    #[serde(default)]
    pub details: VehicleDetails,
}

/// Powertrain filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleCategory {
    Hybrid,
    NonHybrid,
    #[default]
    Any,
}

/// User constraints for one run. Every bound is inclusive; `None` means unbounded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterCriteria {
    #[serde(default)]
    pub max_price: Option<u64>,
    #[serde(default)]
    pub max_mileage: Option<u64>,
    #[serde(default)]
    pub min_year: Option<u16>,
    #[serde(default)]
    pub vehicle_category: VehicleCategory,

    #[serde(default)]
    pub min_price: Option<u64>,
    #[serde(default)]
    pub max_year: Option<u16>,

    /// Search hints, only used to build the marketplace query.
    #[serde(default)]
    pub make: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

pub const MIN_SUB_SCORE: u8 = 1;
pub const MAX_SUB_SCORE: u8 = 10;

/// The five rubric dimensions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubScores {
    pub condition: u8,
    pub features: u8,
    pub ownership: u8,
    pub maintenance: u8,
    pub value: u8,
}

impl SubScores {
    /// Build from raw model values, clamping each into [1, 10].
    pub fn clamped(condition: i64, features: i64, ownership: i64, maintenance: i64, value: i64) -> Self {
        fn c(x: i64) -> u8 {
            x.clamp(MIN_SUB_SCORE as i64, MAX_SUB_SCORE as i64) as u8
        }
        Self {
            condition: c(condition),
            features: c(features),
            ownership: c(ownership),
            maintenance: c(maintenance),
            value: c(value),
        }
    }

    /// All-zero scores assigned when a listing could not be scored.
    pub fn fallback() -> Self {
        Self::default()
    }

    pub fn total(&self) -> u32 {
        [
            self.condition,
            self.features,
            self.ownership,
            self.maintenance,
            self.value,
        ]
        .iter()
        .map(|&s| s as u32)
        .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreStatus {
    Scored,
    /// Transport failure, timeout or unparseable model output.
    Fallback,
}

/// A candidate with its evaluation attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoredListing {
    #[serde(flatten)]
    pub listing: RawListing,
    pub scores: SubScores,
    pub total_score: u32,
    pub score_status: ScoreStatus,
    pub is_best_pick: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub best_pick_reason: String,
}

impl ScoredListing {
    pub fn scored(listing: RawListing, scores: SubScores) -> Self {
        Self {
            listing,
            total_score: scores.total(),
            scores,
            score_status: ScoreStatus::Scored,
            is_best_pick: false,
            best_pick_reason: String::new(),
        }
    }

    pub fn fallback(listing: RawListing) -> Self {
        let scores = SubScores::fallback();
        Self {
            listing,
            total_score: scores.total(),
            scores,
            score_status: ScoreStatus::Fallback,
            is_best_pick: false,
            best_pick_reason: String::new(),
        }
    }

    pub(crate) fn mark_best_pick(&mut self, reason: &str) {
        self.is_best_pick = true;
        self.best_pick_reason = reason.to_string();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    /// Nothing survived scraping + filtering; no scoring was attempted.
    NoMatches,
}

/// Result of one run. Immutable once returned; callers may cache it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRun {
    pub criteria: FilterCriteria,
    pub status: RunStatus,
    /// Sorted by `total_score` descending, ties in scrape order.
    pub ranked: Vec<ScoredListing>,
    /// Best-pick justification; empty when selection failed or was skipped.
    pub explanation: String,
    pub search_url: String,
    pub scraped: usize,
    pub candidates: usize,
    pub finished_at: chrono::DateTime<chrono::Utc>,
}

impl EvaluationRun {
    pub fn no_matches(criteria: FilterCriteria, search_url: String, scraped: usize) -> Self {
        Self {
            criteria,
            status: RunStatus::NoMatches,
            ranked: Vec::new(),
            explanation: String::new(),
            search_url,
            scraped,
            candidates: 0,
            finished_at: chrono::Utc::now(),
        }
    }

    pub fn best_picks(&self) -> impl Iterator<Item = &ScoredListing> {
        self.ranked.iter().filter(|s| s.is_best_pick)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_out_of_range_sub_scores() {
        let s = SubScores::clamped(0, 11, -3, 7, 100);
        assert_eq!(s, SubScores { condition: 1, features: 10, ownership: 1, maintenance: 7, value: 10 });
        assert_eq!(s.total(), 29);
    }

    #[test]
    fn fallback_listing_totals_zero() {
        let l = RawListing {
            title: "Toyota Aqua".into(),
            price: 1,
            mileage: 1,
            year: 2015,
            description: String::new(),
            source_url: String::new(),
            details: VehicleDetails::default(),
        };
        let s = ScoredListing::fallback(l);
        assert_eq!(s.total_score, 0);
        assert_eq!(s.score_status, ScoreStatus::Fallback);
        assert!(!s.is_best_pick);
    }

    #[test]
    fn criteria_deserializes_with_defaults() {
        let c: FilterCriteria = serde_json::from_str(r#"{"max_price": 2000000}"#).unwrap();
        assert_eq!(c.max_price, Some(2_000_000));
        assert_eq!(c.vehicle_category, VehicleCategory::Any);
        assert!(c.min_year.is_none());
    }
}
