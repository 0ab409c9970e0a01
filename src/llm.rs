//! LLM adapter: client abstraction + chat-completions provider + mock/disabled clients.
//!
//! Both the scoring stage and the best-pick stage talk to the model through
//! `LlmClient::complete`, which returns the raw completion text. Parsing that text
//! is the caller's job.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::error::{EvalError, LlmError};

// ------------------------------------------------------------
// Public surface
// ------------------------------------------------------------

pub type LlmFuture<'a> = Pin<Box<dyn Future<Output = Result<String, LlmError>> + Send + 'a>>;

pub trait LlmClient: Send + Sync {
    /// Send one user prompt, return the completion text.
    fn complete<'a>(&'a self, prompt: &'a str) -> LlmFuture<'a>;
    /// Provider name for diagnostics.
    fn provider_name(&self) -> &'static str;
    /// Checked once at run start; an error here means no scoring work is attempted.
    fn ensure_ready(&self) -> Result<(), EvalError> {
        Ok(())
    }
}

pub type DynLlmClient = Arc<dyn LlmClient>;

/// Factory: build a client according to config and environment variables.
///
/// * If `AI_TEST_MODE=mock`, returns a deterministic mock client.
/// * Else if no API key resolves, returns a disabled client (runs fail with
///   `EvalError::Configuration`).
/// * Else builds the chat-completions provider.
pub fn build_client_from_config(cfg: &LlmConfig) -> DynLlmClient {
    if std::env::var("AI_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        tracing::info!("llm client: mock mode");
        return Arc::new(MockClient::fixed(MOCK_COMPLETION));
    }

    let key = match cfg.resolve_api_key() {
        Ok(Some(k)) => k,
        Ok(None) => {
            let var = cfg.key_env_var().unwrap_or("API key");
            return Arc::new(DisabledClient::new(format!("{var} is not set")));
        }
        Err(e) => return Arc::new(DisabledClient::new(e.to_string())),
    };

    match ChatCompletionsClient::new(cfg, key) {
        Ok(c) => Arc::new(c),
        Err(e) => Arc::new(DisabledClient::new(format!("http client: {e}"))),
    }
}

// ------------------------------------------------------------
// Chat completions provider (Groq / OpenAI compatible)
// ------------------------------------------------------------

pub struct ChatCompletionsClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    provider: &'static str,
}

impl ChatCompletionsClient {
    pub fn new(cfg: &LlmConfig, api_key: String) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .user_agent("vehicle-evaluator/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        let provider = match cfg.provider.as_str() {
            "openai" => "openai",
            _ => "groq",
        };
        Ok(Self {
            http,
            endpoint: cfg.endpoint(),
            api_key,
            model: cfg.model.clone(),
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
            provider,
        })
    }

    async fn complete_impl(&self, prompt: &str) -> Result<String, LlmError> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            max_tokens: u32,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            #[serde(default)]
            content: Option<String>,
        }

        let req = Req {
            model: &self.model,
            messages: vec![Msg {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let t0 = Instant::now();
        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await?;
        histogram!("llm_request_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

        let status = resp.status();
        if !status.is_success() {
            return Err(LlmError::Status(status.as_u16()));
        }
        let body: Resp = resp.json().await?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(content)
    }
}

impl LlmClient for ChatCompletionsClient {
    fn complete<'a>(&'a self, prompt: &'a str) -> LlmFuture<'a> {
        Box::pin(async move {
            let out = self.complete_impl(prompt).await;
            if let Err(e) = &out {
                counter!("llm_errors_total").increment(1);
                tracing::warn!(error = %e, provider = self.provider, "llm call failed");
            }
            out
        })
    }
    fn provider_name(&self) -> &'static str {
        self.provider
    }
}

// ------------------------------------------------------------
// Disabled + mock clients
// ------------------------------------------------------------

/// Used when no credential is available. Every run fails fast at start.
pub struct DisabledClient {
    reason: String,
}

impl DisabledClient {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl LlmClient for DisabledClient {
    fn complete<'a>(&'a self, _prompt: &'a str) -> LlmFuture<'a> {
        let reason = self.reason.clone();
        Box::pin(async move { Err(LlmError::NotConfigured(reason)) })
    }
    fn provider_name(&self) -> &'static str {
        "disabled"
    }
    fn ensure_ready(&self) -> Result<(), EvalError> {
        Err(EvalError::Configuration(self.reason.clone()))
    }
}

/// Completion that satisfies both the score parser and the selection parser.
pub const MOCK_COMPLETION: &str = r#"{"condition": 7, "features": 7, "ownership": 7, "maintenance": 7, "value": 7, "best_indices": [0, 1, 2], "reason": "Mock selection: highest totals with balanced rubric scores."}"#;

type Responder = dyn Fn(&str) -> Result<String, LlmError> + Send + Sync;

/// Deterministic client for tests/local runs. Counts calls.
#[derive(Clone)]
pub struct MockClient {
    responder: Arc<Responder>,
    calls: Arc<AtomicUsize>,
}

impl MockClient {
    pub fn fixed(text: &str) -> Self {
        let text = text.to_string();
        Self::with_responder(move |_| Ok(text.clone()))
    }

    pub fn with_responder<F>(f: F) -> Self
    where
        F: Fn(&str) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        Self {
            responder: Arc::new(f),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LlmClient for MockClient {
    fn complete<'a>(&'a self, prompt: &'a str) -> LlmFuture<'a> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let out = (self.responder)(prompt);
        Box::pin(async move { out })
    }
    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

// ------------------------------------------------------------
// Completion text helpers
// ------------------------------------------------------------

/// Drop a surrounding markdown code fence (```json ... ```), if any.
pub fn strip_code_fences(text: &str) -> &str {
    let t = text.trim();
    let Some(rest) = t.strip_prefix("```") else {
        return t;
    };
    // Skip the info string ("json") on the opening line.
    let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or("");
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// First top-level JSON object embedded in `text` (prose before/after is ignored).
pub fn extract_json_object(text: &str) -> Option<serde_json::Map<String, serde_json::Value>> {
    let t = strip_code_fences(text);
    if let Ok(serde_json::Value::Object(m)) = serde_json::from_str(t) {
        return Some(m);
    }
    let start = t.find('{')?;
    let end = t.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str(&t[start..=end]) {
        Ok(serde_json::Value::Object(m)) => Some(m),
        _ => None,
    }
}

/// Single line, control characters removed, whitespace collapsed, at most `max` chars.
pub fn sanitize_reason(input: &str, max: usize) -> String {
    let mut out = String::with_capacity(max.min(input.len()));
    let mut prev_space = false;
    let mut n = 0usize;
    for ch in input.chars() {
        let c = if ch.is_whitespace() || ch.is_control() {
            ' '
        } else {
            ch
        };
        if c == ' ' {
            if !prev_space && !out.is_empty() {
                out.push(' ');
                n += 1;
            }
            prev_space = true;
        } else {
            out.push(c);
            n += 1;
            prev_space = false;
        }
        if n >= max {
            break;
        }
    }
    out.trim().to_string()
}
