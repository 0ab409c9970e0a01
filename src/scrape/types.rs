// src/scrape/types.rs
use crate::error::EvalError;
use crate::listing::RawListing;
use crate::scrape::SearchQuery;

/// Stage-1 result: a detail page to visit.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ListingLink {
    pub url: String,
    /// Card title, used when the detail page has no heading.
    pub title: String,
}

/// Anything that can turn a search query into listings.
///
/// Implementations skip individual malformed listings and only fail when no
/// listing could be obtained at all.
#[async_trait::async_trait]
pub trait ListingSource: Send + Sync {
    async fn fetch_listings(&self, query: &SearchQuery) -> Result<Vec<RawListing>, EvalError>;
    fn name(&self) -> &'static str;
}
