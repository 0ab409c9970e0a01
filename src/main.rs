//! Vehicle evaluator: binary entrypoint.
//! Loads config, wires the marketplace source and LLM client into the pipeline,
//! and serves the JSON API.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vehicle_evaluator::api::{self, AppState};
use vehicle_evaluator::config::EvaluatorConfig;
use vehicle_evaluator::llm::build_client_from_config;
use vehicle_evaluator::metrics::Metrics;
use vehicle_evaluator::scrape::RiyasewanaSource;
use vehicle_evaluator::Evaluator;

/// Structured logs; `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("vehicle_evaluator=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = EvaluatorConfig::load_default().context("loading evaluator config")?;

    let llm = build_client_from_config(&cfg.llm);
    if let Err(e) = llm.ensure_ready() {
        // Keep serving so callers get a distinguishable "scoring unavailable" error.
        tracing::warn!(error = %e, "scoring channel not configured");
    }
    tracing::info!(
        provider = llm.provider_name(),
        model = %cfg.llm.model,
        max_candidates = cfg.pipeline.max_candidates,
        top_n = cfg.pipeline.top_n,
        "llm client ready"
    );

    let source = RiyasewanaSource::from_config(&cfg.marketplace)?;
    let evaluator = Evaluator::new(Arc::new(source), llm, &cfg);

    let metrics = Metrics::init(&cfg.pipeline)?;
    let state = AppState {
        evaluator: Arc::new(evaluator),
        run_budget: Duration::from_secs(cfg.server.run_budget_secs.max(1)),
    };
    let app = api::router(state).merge(metrics.router());

    let listener = tokio::net::TcpListener::bind(&cfg.server.bind)
        .await
        .with_context(|| format!("binding {}", cfg.server.bind))?;
    tracing::info!(addr = %cfg.server.bind, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
