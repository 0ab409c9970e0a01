// src/scrape/riyasewana.rs
//! Riyasewana search + detail page extraction.
//!
//! Stage 1: search result pages list `li.item` cards, each linking to a detail page.
//! Stage 2: a detail page carries `table.moret` rows where a `p.moreh` cell holds the
//! label and the next `td` holds the value.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use metrics::{counter, histogram};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, REFERER};
use scraper::{ElementRef, Html, Selector};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::MarketplaceConfig;
use crate::error::{EvalError, ExtractError};
use crate::listing::{RawListing, VehicleDetails};
use crate::scrape::types::{ListingLink, ListingSource};
use crate::scrape::{normalize_text, parse_mileage, parse_price, parse_year, SearchQuery};

const TITLE_MAX: usize = 200;
const DESCRIPTION_MAX: usize = 1500;
const OPTIONS_MAX: usize = 500;

fn selector(css: &'static str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid selector {css:?}: {e:?}"))
}

/// Card link candidates, most specific first.
const CARD_LINKS: [&str; 3] = ["h2.more a", ".imgbox a", r#"a[href*="/buy/"]"#];

/// Text of an element with each text node trimmed and joined by single spaces.
fn element_text(el: &ElementRef<'_>) -> String {
    el.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn absolutize(base: &url::Url, href: &str) -> Option<String> {
    base.join(href.trim()).ok().map(|u| u.to_string())
}

/// Stage 1: detail links from a search results page, in page order.
/// Hrefs resolve against `page_url`, the address the page was fetched from.
/// Cards without a usable link are skipped.
pub fn parse_search_page(html: &str, page_url: &str) -> Vec<ListingLink> {
    let Ok(base) = url::Url::parse(page_url) else {
        tracing::warn!(page_url, "invalid search page url");
        return Vec::new();
    };
    let doc = Html::parse_document(html);
    let card_sel = selector("li.item");
    let link_sels = CARD_LINKS.map(selector);

    let mut out = Vec::new();
    for card in doc.select(&card_sel) {
        let link = link_sels
            .iter()
            .find_map(|sel| card.select(sel).find(|a| a.value().attr("href").is_some()));
        let Some(link) = link else {
            tracing::debug!("search card without link skipped");
            continue;
        };
        let Some(url) = link.value().attr("href").and_then(|h| absolutize(&base, h)) else {
            continue;
        };
        let title = link
            .value()
            .attr("title")
            .map(str::to_string)
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| element_text(&link));
        out.push(ListingLink {
            url,
            title: normalize_text(&title, TITLE_MAX),
        });
    }
    out
}

/// Label/value pairs of the detail table.
fn detail_rows(table: &ElementRef<'_>) -> Vec<(String, String)> {
    let label_sel = selector("p.moreh");
    let mut rows = Vec::new();
    for label_el in table.select(&label_sel) {
        let label = element_text(&label_el);
        if label.is_empty() {
            continue;
        }
        let Some(cell) = label_el
            .ancestors()
            .filter_map(ElementRef::wrap)
            .find(|e| e.value().name() == "td")
        else {
            continue;
        };
        let Some(value_cell) = cell
            .next_siblings()
            .filter_map(ElementRef::wrap)
            .find(|e| e.value().name() == "td")
        else {
            continue;
        };
        rows.push((label, element_text(&value_cell)));
    }
    rows
}

fn required<T>(
    raw: Option<&String>,
    field: &'static str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<T, ExtractError> {
    let raw = raw.ok_or(ExtractError::MissingField(field))?;
    parse(raw).ok_or_else(|| ExtractError::Unparseable {
        field,
        raw: raw.clone(),
    })
}

/// Stage 2: one detail page -> one listing.
///
/// `fallback_title` is the card title from stage 1, used when the page has no `h1`.
pub fn parse_detail_page(
    html: &str,
    url: &str,
    fallback_title: &str,
) -> Result<RawListing, ExtractError> {
    let doc = Html::parse_document(html);

    let title = doc
        .select(&selector("h1"))
        .next()
        .map(|h| normalize_text(&element_text(&h), TITLE_MAX))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| normalize_text(fallback_title, TITLE_MAX));

    let table_sel = selector("table.moret");
    let table = doc
        .select(&table_sel)
        .next()
        .ok_or(ExtractError::MissingField("details table"))?;

    let mut fields: HashMap<String, String> = HashMap::new();
    for (label, value) in detail_rows(&table) {
        let key = label.trim().trim_end_matches(':').trim().to_ascii_lowercase();
        fields.entry(key).or_insert(value);
    }
    let text = |k: &str, max: usize| {
        fields
            .get(k)
            .map(|v| normalize_text(v, max))
            .unwrap_or_default()
    };

    let price = required(fields.get("price"), "price", parse_price)?;
    let mileage = required(fields.get("mileage (km)"), "mileage", parse_mileage)?;
    let year = required(fields.get("yom"), "year", parse_year)?;

    Ok(RawListing {
        title,
        price,
        mileage,
        year,
        description: text("details", DESCRIPTION_MAX),
        source_url: url.to_string(),
        details: VehicleDetails {
            make: text("make", TITLE_MAX),
            model: text("model", TITLE_MAX),
            gear: text("gear", TITLE_MAX),
            fuel_type: text("fuel type", TITLE_MAX),
            engine_cc: text("engine (cc)", TITLE_MAX),
            options: text("options", OPTIONS_MAX),
        },
    })
}

#[derive(Clone)]
enum Fetcher {
    /// Pages served from memory, keyed by absolute URL.
    Fixture(Arc<HashMap<String, String>>),
    Http(reqwest::Client),
}

impl Fetcher {
    async fn get(&self, url: &str) -> Result<String, EvalError> {
        match self {
            Fetcher::Fixture(pages) => pages
                .get(url)
                .cloned()
                .ok_or_else(|| EvalError::marketplace(format!("GET {url}: status 404"))),
            Fetcher::Http(client) => {
                let resp = client
                    .get(url)
                    .send()
                    .await
                    .map_err(|e| EvalError::marketplace(format!("GET {url}: {e}")))?;
                let status = resp.status();
                if !status.is_success() {
                    return Err(EvalError::marketplace(format!("GET {url}: status {status}")));
                }
                resp.text()
                    .await
                    .map_err(|e| EvalError::marketplace(format!("GET {url} body: {e}")))
            }
        }
    }
}

/// Two-stage marketplace source.
pub struct RiyasewanaSource {
    fetcher: Fetcher,
    base_url: String,
    max_pages: u32,
    max_links: usize,
    detail_concurrency: usize,
}

impl RiyasewanaSource {
    pub fn from_config(cfg: &MarketplaceConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        let referer = format!("{}/", cfg.base_url.trim_end_matches('/'));
        headers.insert(
            REFERER,
            HeaderValue::from_str(&referer).context("marketplace base_url is not a valid header")?,
        );

        let client = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .default_headers(headers)
            .cookie_store(true)
            .connect_timeout(Duration::from_secs(cfg.request_timeout_secs.clamp(1, 5)))
            .timeout(Duration::from_secs(cfg.request_timeout_secs.max(1)))
            .build()
            .context("building marketplace http client")?;

        Ok(Self {
            fetcher: Fetcher::Http(client),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            max_pages: cfg.max_pages.max(1),
            max_links: cfg.max_links,
            detail_concurrency: cfg.detail_concurrency.max(1),
        })
    }

    /// In-memory source for tests and offline runs. `pages` maps absolute URLs to HTML.
    pub fn from_fixtures(base_url: &str, pages: HashMap<String, String>, cfg: &MarketplaceConfig) -> Self {
        Self {
            fetcher: Fetcher::Fixture(Arc::new(pages)),
            base_url: base_url.trim_end_matches('/').to_string(),
            max_pages: cfg.max_pages.max(1),
            max_links: cfg.max_links,
            detail_concurrency: cfg.detail_concurrency.max(1),
        }
    }

    /// Homepage visit so the cookie store holds whatever the site hands out.
    async fn warm_up(&self) {
        if let Fetcher::Http(_) = self.fetcher {
            if let Err(e) = self.fetcher.get(&self.base_url).await {
                tracing::debug!(error = %e, "marketplace warm-up failed");
            }
        }
    }

    async fn collect_links(&self, query: &SearchQuery) -> Result<Vec<ListingLink>, EvalError> {
        let mut links: Vec<ListingLink> = Vec::new();
        let mut pages_ok = 0u32;
        let mut last_err: Option<EvalError> = None;

        for page in 1..=self.max_pages {
            if links.len() >= self.max_links {
                break;
            }
            let url = query.url(&self.base_url, page);
            let html = match self.fetcher.get(&url).await {
                Ok(h) => h,
                Err(e) => {
                    tracing::warn!(error = %e, page, "search page fetch failed");
                    counter!("scrape_errors_total").increment(1);
                    last_err = Some(e);
                    continue;
                }
            };
            pages_ok += 1;
            counter!("scrape_pages_total").increment(1);

            let cards = parse_search_page(&html, &url);
            if cards.is_empty() {
                break;
            }
            for card in cards {
                if links.len() >= self.max_links {
                    break;
                }
                if !links.iter().any(|l| l.url == card.url) {
                    links.push(card);
                }
            }
        }

        if pages_ok == 0 {
            return Err(last_err.unwrap_or_else(|| EvalError::marketplace("no search page fetched")));
        }
        Ok(links)
    }

    /// Detail pages in link order; `None` where the fetch failed.
    ///
    /// Fetches live in a `JoinSet`, so dropping this future aborts the ones still pending.
    async fn fetch_details(&self, links: &[ListingLink]) -> Vec<Option<String>> {
        let semaphore = Arc::new(Semaphore::new(self.detail_concurrency));
        let mut set = JoinSet::new();
        for (idx, link) in links.iter().enumerate() {
            let sem = semaphore.clone();
            let fetcher = self.fetcher.clone();
            let url = link.url.clone();
            set.spawn(async move {
                let _permit = sem.acquire_owned().await.ok()?;
                match fetcher.get(&url).await {
                    Ok(html) => Some((idx, html)),
                    Err(e) => {
                        tracing::warn!(error = %e, "detail page fetch failed");
                        None
                    }
                }
            });
        }

        let mut out = vec![None; links.len()];
        while let Some(res) = set.join_next().await {
            match res {
                Ok(Some((idx, html))) => out[idx] = Some(html),
                Ok(None) => {}
                Err(e) => tracing::error!(error = %e, "detail fetch task aborted"),
            }
        }
        out
    }
}

#[async_trait]
impl ListingSource for RiyasewanaSource {
    async fn fetch_listings(&self, query: &SearchQuery) -> Result<Vec<RawListing>, EvalError> {
        self.warm_up().await;

        let links = self.collect_links(query).await?;
        if links.is_empty() {
            return Ok(Vec::new());
        }

        let pages = self.fetch_details(&links).await;

        let t0 = Instant::now();
        let mut fetched = 0usize;
        let mut listings = Vec::with_capacity(links.len());
        for (link, page) in links.iter().zip(pages) {
            let Some(html) = page else {
                counter!("scrape_errors_total").increment(1);
                continue;
            };
            fetched += 1;
            match parse_detail_page(&html, &link.url, &link.title) {
                Ok(l) => listings.push(l),
                Err(e) => {
                    tracing::debug!(url = %link.url, error = %e, "listing skipped");
                    counter!("scrape_skipped_total").increment(1);
                }
            }
        }
        histogram!("scrape_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        counter!("scrape_listings_total").increment(listings.len() as u64);

        if listings.is_empty() {
            if fetched == 0 {
                return Err(EvalError::marketplace("every detail page fetch failed"));
            }
            return Err(EvalError::Parse(format!(
                "{fetched} detail pages fetched, none matched the expected layout"
            )));
        }

        tracing::info!(
            links = links.len(),
            fetched,
            kept = listings.len(),
            "marketplace listings extracted"
        );
        Ok(listings)
    }

    fn name(&self) -> &'static str {
        "riyasewana"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://riyasewana.com";

    fn detail(rows: &[(&str, &str)]) -> String {
        let cells: String = rows
            .iter()
            .map(|(l, v)| format!(r#"<tr><td><p class="moreh">{l}</p></td><td>{v}</td></tr>"#))
            .collect();
        format!(r#"<html><body><div id="content"><h1>Toyota Aqua 2016</h1><table class="moret">{cells}</table></div></body></html>"#)
    }

    #[test]
    fn search_page_prefers_heading_link_and_absolutizes() {
        let html = r#"
            <ul>
              <li class="item round"><h2 class="more"><a href="/buy/toyota-aqua-1" title="Toyota Aqua">Aqua</a></h2></li>
              <li class="item round"><div class="imgbox"><a href="https://riyasewana.com/buy/honda-vezel-2"><img></a></div></li>
              <li class="item round"><p>no link here</p></li>
            </ul>"#;
        let links = parse_search_page(html, BASE);
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].url, "https://riyasewana.com/buy/toyota-aqua-1");
        assert_eq!(links[0].title, "Toyota Aqua");
        assert_eq!(links[1].url, "https://riyasewana.com/buy/honda-vezel-2");
    }

    #[test]
    fn search_page_hrefs_resolve_against_the_page_address() {
        let html = r#"
            <li class="item"><h2 class="more"><a href="buy/nissan-leaf-3">Leaf</a></h2></li>
            <li class="item"><h2 class="more"><a href="/buy/suzuki-alto-4">Alto</a></h2></li>"#;
        let links = parse_search_page(html, "https://riyasewana.com/search/cars/nissan/2015-2020");
        assert_eq!(links[0].url, "https://riyasewana.com/search/cars/nissan/buy/nissan-leaf-3");
        assert_eq!(links[1].url, "https://riyasewana.com/buy/suzuki-alto-4");
    }

    #[test]
    fn detail_page_reads_labelled_rows() {
        let html = detail(&[
            ("Price", "Rs. 5,450,000"),
            ("Make", "Toyota"),
            ("YOM", "2016"),
            ("Mileage (km)", "85,000"),
            ("Fuel Type", "Hybrid"),
            ("Details", "Single owner, <b>agent</b> maintained"),
        ]);
        let l = parse_detail_page(&html, "https://riyasewana.com/buy/x", "card").unwrap();
        assert_eq!(l.title, "Toyota Aqua 2016");
        assert_eq!(l.price, 5_450_000);
        assert_eq!(l.mileage, 85_000);
        assert_eq!(l.year, 2016);
        assert_eq!(l.details.fuel_type, "Hybrid");
        assert_eq!(l.description, "Single owner, agent maintained");
    }

    #[test]
    fn detail_page_without_mileage_is_rejected() {
        let html = detail(&[("Price", "Rs. 1,000,000"), ("YOM", "2014"), ("Mileage (km)", "-")]);
        let err = parse_detail_page(&html, "u", "t").unwrap_err();
        assert_eq!(
            err,
            ExtractError::Unparseable {
                field: "mileage",
                raw: "-".into()
            }
        );
    }

    #[test]
    fn detail_page_without_table_is_rejected() {
        let err = parse_detail_page("<html><h1>x</h1></html>", "u", "t").unwrap_err();
        assert_eq!(err, ExtractError::MissingField("details table"));
    }
}
