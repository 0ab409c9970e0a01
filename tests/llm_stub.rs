// tests/llm_stub.rs
//
// Client factory behaviour driven by environment variables, and per-call
// timeouts in the scoring fan-out. No network.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serial_test::serial;
use vehicle_evaluator::config::LlmConfig;
use vehicle_evaluator::error::EvalError;
use vehicle_evaluator::listing::{ScoreStatus, VehicleDetails};
use vehicle_evaluator::llm::{build_client_from_config, LlmClient, LlmFuture, MOCK_COMPLETION};
use vehicle_evaluator::scoring::ScoreRequester;
use vehicle_evaluator::RawListing;

fn clear_env() {
    std::env::remove_var("AI_TEST_MODE");
    std::env::remove_var("GROQ_API_KEY");
    std::env::remove_var("OPENAI_API_KEY");
}

#[tokio::test]
#[serial]
async fn mock_mode_returns_canned_completion() {
    clear_env();
    std::env::set_var("AI_TEST_MODE", "mock");

    let client = build_client_from_config(&LlmConfig::default());
    assert_eq!(client.provider_name(), "mock");
    assert!(client.ensure_ready().is_ok());
    let text = client.complete("anything").await.expect("mock completes");
    assert_eq!(text, MOCK_COMPLETION);

    clear_env();
}

#[test]
#[serial]
fn missing_key_yields_disabled_client() {
    clear_env();

    let client = build_client_from_config(&LlmConfig::default());
    assert_eq!(client.provider_name(), "disabled");
    match client.ensure_ready() {
        Err(EvalError::Configuration(msg)) => assert!(msg.contains("GROQ_API_KEY"), "{msg}"),
        other => panic!("expected configuration error, got {other:?}"),
    }
}

#[test]
#[serial]
fn key_from_environment_builds_provider_client() {
    clear_env();
    std::env::set_var("OPENAI_API_KEY", "sk-test");

    let cfg = LlmConfig {
        provider: "openai".into(),
        ..LlmConfig::default()
    };
    let client = build_client_from_config(&cfg);
    assert_eq!(client.provider_name(), "openai");
    assert!(client.ensure_ready().is_ok());

    clear_env();
}

/// Hangs on prompts mentioning `needle`, answers everything else.
struct SlowFor {
    needle: &'static str,
}

impl LlmClient for SlowFor {
    fn complete<'a>(&'a self, prompt: &'a str) -> LlmFuture<'a> {
        let slow = prompt.contains(self.needle);
        Box::pin(async move {
            if slow {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            Ok(r#"{"condition": 6, "features": 6, "ownership": 6, "maintenance": 6, "value": 6}"#
                .to_string())
        })
    }
    fn provider_name(&self) -> &'static str {
        "slow"
    }
}

fn listing(title: &str) -> RawListing {
    RawListing {
        title: title.into(),
        price: 1_000_000,
        mileage: 10_000,
        year: 2019,
        description: String::new(),
        source_url: String::new(),
        details: VehicleDetails::default(),
    }
}

#[tokio::test]
async fn slow_call_falls_back_without_stalling_the_batch() {
    let requester = ScoreRequester::new(
        Arc::new(SlowFor { needle: "Stuck" }),
        2,
        Duration::from_millis(100),
    );

    let t0 = Instant::now();
    let batch = requester
        .score_all(vec![listing("Quick One"), listing("Stuck One"), listing("Quick Two")])
        .await;
    assert_eq!(batch.failed_calls, 1);
    assert!(batch.channel_error().is_none());
    let scored = batch.scored;
    assert!(t0.elapsed() < Duration::from_secs(5));

    let titles: Vec<&str> = scored.iter().map(|s| s.listing.title.as_str()).collect();
    assert_eq!(titles, vec!["Quick One", "Stuck One", "Quick Two"]);
    assert_eq!(scored[0].total_score, 30);
    assert_eq!(scored[1].score_status, ScoreStatus::Fallback);
    assert_eq!(scored[1].total_score, 0);
    assert_eq!(scored[2].score_status, ScoreStatus::Scored);
}

/// Counts calls as they start; every call takes `delay`.
struct Counting {
    started: Arc<AtomicUsize>,
    delay: Duration,
}

impl LlmClient for Counting {
    fn complete<'a>(&'a self, _prompt: &'a str) -> LlmFuture<'a> {
        Box::pin(async move {
            self.started.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(r#"{"condition": 5, "features": 5, "ownership": 5, "maintenance": 5, "value": 5}"#
                .to_string())
        })
    }
    fn provider_name(&self) -> &'static str {
        "counting"
    }
}

#[tokio::test]
async fn dropping_score_all_stops_pending_calls() {
    let started = Arc::new(AtomicUsize::new(0));
    let requester = ScoreRequester::new(
        Arc::new(Counting {
            started: started.clone(),
            delay: Duration::from_millis(40),
        }),
        1,
        Duration::from_secs(5),
    );
    let listings: Vec<RawListing> = (0..10).map(|i| listing(&format!("Car {i}"))).collect();

    let cut = tokio::time::timeout(Duration::from_millis(100), requester.score_all(listings)).await;
    assert!(cut.is_err(), "batch should still be running at the deadline");

    let at_cut = started.load(Ordering::SeqCst);
    assert!(at_cut < 10, "{at_cut} calls started before the deadline");
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(started.load(Ordering::SeqCst), at_cut, "calls kept starting after drop");
}
