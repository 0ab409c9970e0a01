// src/pipeline.rs
//! One evaluation run: extract -> filter -> score -> rank -> select.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;

use crate::config::{EvaluatorConfig, PipelineConfig};
use crate::error::EvalError;
use crate::filter::{filter_candidates, CategoryKeywords};
use crate::listing::{EvaluationRun, FilterCriteria, RunStatus};
use crate::llm::DynLlmClient;
use crate::ranking::{rank, select_best};
use crate::scoring::ScoreRequester;
use crate::scrape::{ListingSource, SearchQuery};

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("evaluator_runs_total", "Runs started, labelled by outcome.");
        describe_counter!("scrape_pages_total", "Search result pages fetched.");
        describe_counter!("scrape_listings_total", "Listings extracted from detail pages.");
        describe_counter!("scrape_skipped_total", "Listing blocks skipped as malformed.");
        describe_counter!("scrape_errors_total", "Marketplace fetch failures.");
        describe_histogram!("scrape_parse_ms", "Detail page parse time in milliseconds.");
        describe_counter!("scoring_calls_total", "Scoring requests issued.");
        describe_counter!("scoring_fallback_total", "Candidates given fallback scores.");
        describe_counter!("selection_failures_total", "Best-pick requests that failed.");
        describe_counter!("llm_errors_total", "LLM transport/status failures.");
        describe_histogram!("llm_request_ms", "LLM round trip in milliseconds.");
        describe_histogram!("evaluator_run_ms", "Whole run duration in milliseconds.");
    });
}

pub struct Evaluator {
    source: Arc<dyn ListingSource>,
    llm: DynLlmClient,
    cfg: PipelineConfig,
    keywords: CategoryKeywords,
    call_timeout: Duration,
    base_url: String,
}

impl Evaluator {
    pub fn new(
        source: Arc<dyn ListingSource>,
        llm: DynLlmClient,
        cfg: &EvaluatorConfig,
    ) -> Self {
        Self {
            source,
            llm,
            keywords: CategoryKeywords::new(&cfg.pipeline.hybrid_keywords),
            cfg: cfg.pipeline.clone(),
            call_timeout: Duration::from_secs(cfg.llm.timeout_secs),
            base_url: cfg.marketplace.base_url.clone(),
        }
    }

    /// Run the whole pipeline for one set of criteria.
    ///
    /// Errors only for run-level failures: scoring channel not configured, credential
    /// rejected, no scoring call answered, marketplace unreachable, or no listing
    /// extractable. An empty candidate set is returned as
    /// `RunStatus::NoMatches`.
    pub async fn run(&self, criteria: FilterCriteria) -> Result<EvaluationRun, EvalError> {
        ensure_metrics_described();
        let t0 = Instant::now();

        let out = self.run_inner(criteria).await;

        let outcome = match &out {
            Ok(r) if r.status == RunStatus::NoMatches => "no_matches",
            Ok(_) => "completed",
            Err(e) => e.category(),
        };
        counter!("evaluator_runs_total", "outcome" => outcome).increment(1);
        histogram!("evaluator_run_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        out
    }

    async fn run_inner(&self, criteria: FilterCriteria) -> Result<EvaluationRun, EvalError> {
        self.llm.ensure_ready()?;

        let query = SearchQuery::from_criteria(&criteria);
        let search_url = query.url(&self.base_url, 1);

        let raw = self.source.fetch_listings(&query).await?;
        let scraped = raw.len();

        let candidates = filter_candidates(raw, &criteria, &self.keywords, self.cfg.max_candidates);
        if candidates.is_empty() {
            tracing::info!(scraped, source = self.source.name(), "no listings matched criteria");
            return Ok(EvaluationRun::no_matches(criteria, search_url, scraped));
        }
        let n_candidates = candidates.len();

        let requester = ScoreRequester::new(
            self.llm.clone(),
            self.cfg.scoring_concurrency,
            self.call_timeout,
        );
        let batch = requester.score_all(candidates).await;
        if let Some(e) = batch.channel_error() {
            tracing::warn!(
                failed = batch.failed_calls,
                rejected = batch.rejected_calls,
                error = %e,
                "scoring channel unavailable"
            );
            return Err(e);
        }
        let scored = batch.scored;

        let mut ranked = rank(scored, self.cfg.top_n);
        let explanation =
            select_best(&self.llm, &mut ranked, self.cfg.best_picks, self.call_timeout).await;

        tracing::info!(
            scraped,
            candidates = n_candidates,
            ranked = ranked.len(),
            provider = self.llm.provider_name(),
            "evaluation run completed"
        );

        Ok(EvaluationRun {
            criteria,
            status: RunStatus::Completed,
            ranked,
            explanation,
            search_url,
            scraped,
            candidates: n_candidates,
            finished_at: chrono::Utc::now(),
        })
    }
}
