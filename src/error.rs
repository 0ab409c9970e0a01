// src/error.rs
//! Error taxonomy for a run.
//!
//! Only run-level failures are represented by `EvalError`. A listing that fails to
//! parse is skipped, and a candidate that fails to score gets fallback scores; neither
//! reaches the caller as an error. An empty candidate set is `RunStatus::NoMatches`.

use thiserror::Error;

/// Which external channel failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Marketplace,
    Llm,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Marketplace => f.write_str("marketplace"),
            Channel::Llm => f.write_str("llm"),
        }
    }
}

#[derive(Debug, Error)]
pub enum EvalError {
    /// Could not reach the source, or it answered with a non-success status.
    #[error("{channel} transport failure: {detail}")]
    Transport { channel: Channel, detail: String },

    /// The source answered but no listing could be extracted from its documents.
    #[error("unexpected document shape: {0}")]
    Parse(String),

    /// Scoring channel credential missing or invalid.
    #[error("scoring unavailable: {0}")]
    Configuration(String),
}

impl EvalError {
    pub fn marketplace(detail: impl Into<String>) -> Self {
        Self::Transport {
            channel: Channel::Marketplace,
            detail: detail.into(),
        }
    }

    pub fn llm(detail: impl Into<String>) -> Self {
        Self::Transport {
            channel: Channel::Llm,
            detail: detail.into(),
        }
    }

    /// Stable tag for callers that need to tell failures apart.
    pub fn category(&self) -> &'static str {
        match self {
            EvalError::Transport {
                channel: Channel::Marketplace,
                ..
            } => "source_unreachable",
            EvalError::Transport {
                channel: Channel::Llm,
                ..
            } => "scoring_unavailable",
            EvalError::Parse(_) => "source_unparseable",
            EvalError::Configuration(_) => "scoring_unavailable",
        }
    }
}

/// Failure of a single LLM call. Never escapes the scoring or selection stage.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned status {0}")]
    Status(u16),

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("provider returned an empty completion")]
    EmptyResponse,

    #[error("llm client not configured: {0}")]
    NotConfigured(String),
}

/// Why a single listing block could not be turned into a `RawListing`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("unparseable {field}: {raw:?}")]
    Unparseable { field: &'static str, raw: String },
}
