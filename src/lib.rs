// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod config;
pub mod error;
pub mod filter;
pub mod listing;
pub mod llm;
pub mod metrics;
pub mod pipeline;
pub mod ranking;
pub mod scoring;
pub mod scrape;

pub use crate::api::router;
pub use crate::error::{EvalError, LlmError};
pub use crate::listing::{
    EvaluationRun, FilterCriteria, RawListing, RunStatus, ScoredListing, SubScores,
    VehicleCategory,
};
pub use crate::pipeline::Evaluator;
