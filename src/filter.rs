// src/filter.rs
//! Criteria filter: inclusive numeric bounds + best-effort powertrain keyword match,
//! then an order-preserving cap on the number of candidates.

use crate::listing::{FilterCriteria, RawListing, VehicleCategory};

/// Lowercased keywords that mark a listing as hybrid.
#[derive(Debug, Clone)]
pub struct CategoryKeywords(Vec<String>);

impl CategoryKeywords {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            keywords
                .into_iter()
                .map(|k| k.as_ref().trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        )
    }

    /// Substring match over title, description and fuel type (case-insensitive).
    pub fn is_hybrid(&self, l: &RawListing) -> bool {
        let haystack = format!(
            "{} {} {}",
            l.title, l.description, l.details.fuel_type
        )
        .to_lowercase();
        self.0.iter().any(|k| haystack.contains(k.as_str()))
    }
}

impl Default for CategoryKeywords {
    fn default() -> Self {
        Self::new(["hybrid"])
    }
}

fn within<T: PartialOrd>(v: T, lo: Option<T>, hi: Option<T>) -> bool {
    lo.map_or(true, |lo| v >= lo) && hi.map_or(true, |hi| v <= hi)
}

/// True when the listing satisfies every bound that is set.
pub fn matches(l: &RawListing, c: &FilterCriteria, keywords: &CategoryKeywords) -> bool {
    if !within(l.price, c.min_price, c.max_price)
        || !within(l.mileage, None, c.max_mileage)
        || !within(l.year, c.min_year, c.max_year)
    {
        return false;
    }
    match c.vehicle_category {
        VehicleCategory::Any => true,
        VehicleCategory::Hybrid => keywords.is_hybrid(l),
        VehicleCategory::NonHybrid => !keywords.is_hybrid(l),
    }
}

/// Keep matching listings in scrape order, truncated to the first `cap`.
pub fn filter_candidates(
    listings: Vec<RawListing>,
    criteria: &FilterCriteria,
    keywords: &CategoryKeywords,
    cap: usize,
) -> Vec<RawListing> {
    let total = listings.len();
    let kept: Vec<RawListing> = listings
        .into_iter()
        .filter(|l| matches(l, criteria, keywords))
        .take(cap)
        .collect();
    tracing::debug!(total, kept = kept.len(), cap, "criteria filter applied");
    kept
}
