// tests/metrics.rs
//
// The Prometheus recorder is process-global, so this binary installs it once and
// keeps every assertion in a single test.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use vehicle_evaluator::api::{self, AppState};
use vehicle_evaluator::config::EvaluatorConfig;
use vehicle_evaluator::llm::{MockClient, MOCK_COMPLETION};
use vehicle_evaluator::metrics::Metrics;
use vehicle_evaluator::scrape::RiyasewanaSource;
use vehicle_evaluator::Evaluator;

const SEARCH_PAGE: &str = include_str!("fixtures/search_page.html");
const AQUA: &str = include_str!("fixtures/detail_aqua.html");
const ALTO: &str = include_str!("fixtures/detail_alto.html");

// Build full in-process app: API routes plus /metrics.
fn build_app(metrics: &Metrics) -> Router {
    let cfg = EvaluatorConfig::default();
    let pages: HashMap<String, String> = [
        ("https://riyasewana.com/search", SEARCH_PAGE),
        ("https://riyasewana.com/buy/toyota-aqua-sale-colombo-1001", AQUA),
        ("https://riyasewana.com/buy/suzuki-alto-sale-kandy-1002", ALTO),
    ]
    .into_iter()
    .map(|(u, h)| (u.to_string(), h.to_string()))
    .collect();
    let source = RiyasewanaSource::from_fixtures(&cfg.marketplace.base_url, pages, &cfg.marketplace);
    let evaluator = Evaluator::new(
        Arc::new(source),
        Arc::new(MockClient::fixed(MOCK_COMPLETION)),
        &cfg,
    );
    api::router(AppState {
        evaluator: Arc::new(evaluator),
        run_budget: Duration::from_secs(10),
    })
    .merge(metrics.router())
}

#[tokio::test]
async fn metrics_endpoint_reports_run_series() {
    let metrics = Metrics::init(&EvaluatorConfig::default().pipeline).expect("install recorder");
    let app = build_app(&metrics);

    let r1 = app
        .clone()
        .oneshot(
            Request::post("/evaluate")
                .header("content-type", "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(r1.status(), StatusCode::OK);

    // Scrape metrics (same process so counters persist)
    let m = app
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(m.status(), StatusCode::OK);
    // axum::body::to_bytes requires an explicit limit
    let body = body::to_bytes(m.into_body(), 1_048_576).await.unwrap(); // 1 MiB
    let text = String::from_utf8(body.to_vec()).unwrap();

    for needle in [
        "evaluator_runs_total",
        "outcome=\"completed\"",
        "scrape_listings_total",
        "scoring_calls_total",
        "evaluator_max_candidates",
        "evaluator_top_n",
    ] {
        assert!(
            text.contains(needle),
            "metrics exposition missing '{needle}'\n{text}"
        );
    }
}
