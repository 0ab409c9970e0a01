// src/scrape/mod.rs
//! Listing extraction: marketplace HTML -> `RawListing`.
//!
//! Field parsing is fallible everywhere. A listing block that lacks a numeric field is
//! dropped here so nothing downstream ever sees a half-parsed record.

pub mod query;
pub mod riyasewana;
pub mod types;

use once_cell::sync::OnceCell;
use regex::Regex;

pub use query::SearchQuery;
pub use riyasewana::{parse_detail_page, parse_search_page, RiyasewanaSource};
pub use types::{ListingLink, ListingSource};

/// Decode entities, strip tags, normalize quotes and collapse whitespace.
/// Output is capped at `max_chars` characters.
pub fn normalize_text(s: &str, max_chars: usize) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").trim().to_string();

    if out.chars().count() > max_chars {
        out = out.chars().take(max_chars).collect();
    }
    out
}

/// First numeric token of `raw` with thousands separators removed and any
/// decimal part dropped. `"Rs. 5,500,000.00"` -> 5500000, `"85,000 km"` -> 85000.
fn first_amount(raw: &str) -> Option<u64> {
    static RE_AMOUNT: OnceCell<Regex> = OnceCell::new();
    let re = RE_AMOUNT.get_or_init(|| Regex::new(r"\d[\d,]*(?:\.\d+)?").unwrap());
    let m = re.find(raw)?;
    let int_part = m.as_str().split('.').next().unwrap_or_default();
    let digits: String = int_part.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Price in LKR; `None` for "Negotiable", "-", empty and the like.
pub fn parse_price(raw: &str) -> Option<u64> {
    first_amount(raw)
}

/// Mileage in km; `None` when the field carries no digits.
pub fn parse_mileage(raw: &str) -> Option<u64> {
    first_amount(raw)
}

/// First 4-digit run, accepted only within 1900..=next year.
pub fn parse_year(raw: &str) -> Option<u16> {
    use chrono::Datelike;

    static RE_YEAR: OnceCell<Regex> = OnceCell::new();
    let re = RE_YEAR.get_or_init(|| Regex::new(r"\b(\d{4})\b").unwrap());
    let year: u16 = re.captures(raw)?.get(1)?.as_str().parse().ok()?;
    let latest = chrono::Utc::now().year() + 1;
    (1900..=latest).contains(&(year as i32)).then_some(year)
}
