// src/scrape/query.rs
//! Marketplace search URL construction.
//!
//! Without filters the site paginates `/search?page=N`. With filters the path is
//! `/search/cars/{make}/{model}/{location}/{minYear}-{maxYear}/price-{min}-{max}`,
//! each segment present only when its filter is.

use chrono::Datelike;
use serde::{Deserialize, Serialize};

use crate::listing::FilterCriteria;

const DEFAULT_MIN_YEAR: u16 = 2000;
const DEFAULT_MAX_PRICE: u64 = 50_000_000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub make: Option<String>,
    pub model: Option<String>,
    pub location: Option<String>,
    pub min_year: Option<u16>,
    pub max_year: Option<u16>,
    pub min_price: Option<u64>,
    pub max_price: Option<u64>,
}

fn slug(s: Option<&str>) -> Option<String> {
    let t = s?.trim();
    if t.is_empty() {
        return None;
    }
    Some(t.to_lowercase().replace(' ', "-"))
}

impl SearchQuery {
    pub fn from_criteria(c: &FilterCriteria) -> Self {
        Self {
            make: c.make.clone(),
            model: c.model.clone(),
            location: c.location.clone(),
            min_year: c.min_year,
            max_year: c.max_year,
            min_price: c.min_price,
            max_price: c.max_price,
        }
    }

    fn year_bounds(&self) -> Option<(u16, u16)> {
        let lo = self.min_year.filter(|&y| y > 0);
        let hi = self.max_year.filter(|&y| y > 0);
        if lo.is_none() && hi.is_none() {
            return None;
        }
        let this_year = chrono::Utc::now().year() as u16;
        Some((lo.unwrap_or(DEFAULT_MIN_YEAR), hi.unwrap_or(this_year)))
    }

    fn price_bounds(&self) -> Option<(u64, u64)> {
        let hi = self.max_price.filter(|&p| p > 0);
        if self.min_price.is_none() && hi.is_none() {
            return None;
        }
        Some((self.min_price.unwrap_or(0), hi.unwrap_or(DEFAULT_MAX_PRICE)))
    }

    pub fn has_filters(&self) -> bool {
        slug(self.make.as_deref()).is_some()
            || slug(self.model.as_deref()).is_some()
            || slug(self.location.as_deref()).is_some()
            || self.year_bounds().is_some()
            || self.price_bounds().is_some()
    }

    /// Search results URL for `page` (1-based).
    pub fn url(&self, base_url: &str, page: u32) -> String {
        let base = base_url.trim_end_matches('/');
        let mut url = if self.has_filters() {
            let mut path = String::from("search/cars");
            for seg in [&self.make, &self.model, &self.location] {
                if let Some(s) = slug(seg.as_deref()) {
                    path.push('/');
                    path.push_str(&s);
                }
            }
            if let Some((lo, hi)) = self.year_bounds() {
                path.push_str(&format!("/{lo}-{hi}"));
            }
            if let Some((lo, hi)) = self.price_bounds() {
                path.push_str(&format!("/price-{lo}-{hi}"));
            }
            format!("{base}/{path}")
        } else {
            format!("{base}/search")
        };
        if page > 1 {
            url.push_str(&format!("?page={page}"));
        }
        url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://riyasewana.com";

    #[test]
    fn no_filters_uses_plain_search() {
        let q = SearchQuery::default();
        assert_eq!(q.url(BASE, 1), "https://riyasewana.com/search");
        assert_eq!(q.url(BASE, 3), "https://riyasewana.com/search?page=3");
    }

    #[test]
    fn filters_build_path_segments() {
        let q = SearchQuery {
            make: Some("Toyota".into()),
            model: Some(" Prius C ".into()),
            location: None,
            min_year: Some(2015),
            max_year: Some(2020),
            min_price: None,
            max_price: Some(2_000_000),
        };
        assert_eq!(
            q.url(BASE, 2),
            "https://riyasewana.com/search/cars/toyota/prius-c/2015-2020/price-0-2000000?page=2"
        );
    }

    #[test]
    fn missing_year_bound_defaults() {
        let q = SearchQuery {
            max_year: Some(2018),
            ..SearchQuery::default()
        };
        assert_eq!(q.url(BASE, 1), "https://riyasewana.com/search/cars/2000-2018");
    }

    #[test]
    fn min_price_zero_counts_as_filter() {
        let q = SearchQuery {
            min_price: Some(0),
            ..SearchQuery::default()
        };
        assert_eq!(q.url(BASE, 1), "https://riyasewana.com/search/cars/price-0-50000000");
    }
}
