// src/config/mod.rs
//! Runtime configuration loaded from `config/evaluator.toml`.
//!
//! Lookup order:
//! 1) $EVALUATOR_CONFIG_PATH (must exist)
//! 2) config/evaluator.toml
//! 3) built-in defaults

pub mod ai;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub use ai::LlmConfig;

pub const ENV_CONFIG_PATH: &str = "EVALUATOR_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/evaluator.toml";

fn default_max_candidates() -> usize {
    20
}
fn default_top_n() -> usize {
    10
}
fn default_best_picks() -> usize {
    3
}
fn default_scoring_concurrency() -> usize {
    5
}
fn default_hybrid_keywords() -> Vec<String> {
    vec!["hybrid".to_string()]
}

/// Work caps and filter vocabulary. They trade latency and cost against completeness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Candidates kept after filtering (and therefore LLM scoring calls per run).
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
    /// Length of the ranked shortlist.
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    /// How many best picks the selection step may choose.
    #[serde(default = "default_best_picks")]
    pub best_picks: usize,
    #[serde(default = "default_scoring_concurrency")]
    pub scoring_concurrency: usize,
    #[serde(default = "default_hybrid_keywords")]
    pub hybrid_keywords: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_candidates: default_max_candidates(),
            top_n: default_top_n(),
            best_picks: default_best_picks(),
            scoring_concurrency: default_scoring_concurrency(),
            hybrid_keywords: default_hybrid_keywords(),
        }
    }
}

impl PipelineConfig {
    fn sanitize(&mut self) {
        if self.max_candidates == 0 {
            self.max_candidates = default_max_candidates();
        }
        if self.top_n == 0 {
            self.top_n = default_top_n();
        }
        self.best_picks = self.best_picks.min(self.top_n);
        self.scoring_concurrency = self.scoring_concurrency.clamp(1, self.max_candidates);
        self.hybrid_keywords = self
            .hybrid_keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        if self.hybrid_keywords.is_empty() {
            self.hybrid_keywords = default_hybrid_keywords();
        }
    }
}

fn default_base_url() -> String {
    "https://riyasewana.com".to_string()
}
fn default_max_pages() -> u32 {
    3
}
fn default_max_links() -> usize {
    20
}
fn default_request_timeout_secs() -> u64 {
    15
}
fn default_detail_concurrency() -> usize {
    4
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0 Safari/537.36"
        .to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketplaceConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    /// Detail pages fetched per run.
    #[serde(default = "default_max_links")]
    pub max_links: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_detail_concurrency")]
    pub detail_concurrency: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            max_pages: default_max_pages(),
            max_links: default_max_links(),
            request_timeout_secs: default_request_timeout_secs(),
            detail_concurrency: default_detail_concurrency(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}
fn default_run_budget_secs() -> u64 {
    120
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Upper bound on one `/evaluate` request, scraping and all LLM calls included.
    #[serde(default = "default_run_budget_secs")]
    pub run_budget_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            run_budget_secs: default_run_budget_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub marketplace: MarketplaceConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl EvaluatorConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading evaluator config from {}", path.display()))?;
        Self::from_toml_str(&data)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let mut cfg: EvaluatorConfig = toml::from_str(s).context("parsing evaluator config")?;
        cfg.pipeline.sanitize();
        cfg.llm.normalize();
        // Reject unknown providers early instead of at the first scoring call.
        cfg.llm.key_env_var()?;
        if cfg.marketplace.max_pages == 0 {
            cfg.marketplace.max_pages = 1;
        }
        cfg.marketplace.detail_concurrency = cfg.marketplace.detail_concurrency.max(1);
        Ok(cfg)
    }

    /// Load using env var + fallbacks (see module docs).
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from_file(&pb);
            }
            return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
        }
        let p = PathBuf::from(DEFAULT_CONFIG_PATH);
        if p.exists() {
            return Self::load_from_file(&p);
        }
        Ok(Self::default())
    }
}
