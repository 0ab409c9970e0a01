// src/config/ai.rs
use serde::{Deserialize, Serialize};
use std::env;

fn default_provider() -> String {
    "groq".to_string()
}
fn default_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}
fn default_api_key() -> String {
    "ENV".to_string()
}
fn default_timeout_secs() -> u64 {
    20
}
fn default_temperature() -> f32 {
    0.3
}
fn default_max_tokens() -> u32 {
    512
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "groq" | "openai" (case-insensitive)
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// "ENV" means: read from GROQ_API_KEY / OPENAI_API_KEY (by provider)
    #[serde(default = "default_api_key")]
    pub api_key: String,
    /// Overrides the provider's chat completions endpoint.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key: default_api_key(),
            endpoint: None,
            timeout_secs: default_timeout_secs(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl LlmConfig {
    /// Normalize provider and sanitize numeric knobs. Does not touch the key.
    pub fn normalize(&mut self) {
        self.provider = self.provider.trim().to_lowercase();
        if self.timeout_secs == 0 {
            self.timeout_secs = default_timeout_secs();
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            self.temperature = default_temperature();
        }
        if self.max_tokens == 0 {
            self.max_tokens = default_max_tokens();
        }
    }

    pub fn key_env_var(&self) -> anyhow::Result<&'static str> {
        match self.provider.as_str() {
            "groq" => Ok("GROQ_API_KEY"),
            "openai" => Ok("OPENAI_API_KEY"),
            other => anyhow::bail!("Unsupported provider in config: {other}"),
        }
    }

    /// The literal key, or the provider's env var when `api_key` is "ENV".
    /// Returns `None` when no usable key exists.
    pub fn resolve_api_key(&self) -> anyhow::Result<Option<String>> {
        let key = if self.api_key.trim().eq_ignore_ascii_case("env") {
            env::var(self.key_env_var()?).ok()
        } else {
            Some(self.api_key.clone())
        };
        Ok(key.map(|k| k.trim().to_string()).filter(|k| !k.is_empty()))
    }

    pub fn endpoint(&self) -> String {
        if let Some(ep) = self.endpoint.as_deref().filter(|e| !e.trim().is_empty()) {
            return ep.to_string();
        }
        match self.provider.as_str() {
            "openai" => "https://api.openai.com/v1/chat/completions".to_string(),
            _ => "https://api.groq.com/openai/v1/chat/completions".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_fixes_bad_knobs() {
        let mut cfg = LlmConfig {
            provider: " GROQ ".into(),
            timeout_secs: 0,
            temperature: 9.0,
            ..LlmConfig::default()
        };
        cfg.normalize();
        assert_eq!(cfg.provider, "groq");
        assert_eq!(cfg.timeout_secs, 20);
        assert!((cfg.temperature - 0.3).abs() < f32::EPSILON);
    }

    #[test]
    fn literal_key_is_used_verbatim() {
        let cfg = LlmConfig {
            api_key: "sk-literal".into(),
            ..LlmConfig::default()
        };
        assert_eq!(cfg.resolve_api_key().unwrap().as_deref(), Some("sk-literal"));
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let cfg = LlmConfig {
            provider: "claude".into(),
            ..LlmConfig::default()
        };
        assert!(cfg.resolve_api_key().is_err());
    }

    #[test]
    fn endpoint_defaults_by_provider() {
        let mut cfg = LlmConfig::default();
        assert!(cfg.endpoint().contains("groq.com"));
        cfg.provider = "openai".into();
        assert!(cfg.endpoint().contains("openai.com"));
    }
}
