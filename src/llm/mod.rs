//! Provider-polymorphic LLM text generation.
//!
//! [`LlmClient`] covers Anthropic, OpenAI, and Google Gemini through their
//! REST APIs with a single `generate` contract. A client constructed without
//! an API key reports `is_available() == false` and fails fast on `generate`;
//! callers check availability first and degrade instead of erroring where the
//! pipelines allow it.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use crate::config::LlmConfig;
use crate::errors::LlmError;

/// Default per-request timeout applied at the transport level.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// The closed set of supported providers. The configuration-time token
/// `auto` must be resolved before a client is constructed and is rejected
/// here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Anthropic,
    OpenAi,
    Google,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::Google => "google",
        }
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "anthropic" => Ok(Self::Anthropic),
            "openai" => Ok(Self::OpenAi),
            "google" => Ok(Self::Google),
            "auto" => Err("\"auto\" must be resolved to a concrete provider \
                 before constructing an LLM client"
                .into()),
            other => Err(format!("unsupported LLM provider: {other}")),
        }
    }
}

/// Per-call generation options.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub system: Option<String>,
    pub max_tokens: Option<u32>,
    pub timeout: Option<Duration>,
    pub temperature: Option<f32>,
}

/// Seam for the pipelines: anything that can generate text. Implemented by
/// [`LlmClient`] and by test fakes.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn is_available(&self) -> bool;

    /// Generate raw text from a prompt. JSON parsing is the caller's job.
    async fn generate(&self, prompt: &str, opts: &GenerateOptions) -> Result<String, LlmError>;
}

/// Unified text-generation client across the three providers.
pub struct LlmClient {
    provider: Provider,
    model: String,
    api_key: String,
    http: reqwest::Client,
}

impl LlmClient {
    /// Build a client. An empty `api_key` yields an unavailable client (one
    /// info log, `generate` fails with [`LlmError::NotAvailable`]).
    pub fn new(provider: Provider, model: impl Into<String>, api_key: impl Into<String>) -> Self {
        let api_key = api_key.into();
        if api_key.is_empty() {
            info!(
                provider = provider.as_str(),
                "no API key configured, LLM client unavailable"
            );
        }
        Self {
            provider,
            model: model.into(),
            api_key,
            http: reqwest::Client::new(),
        }
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn post_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: Value,
        timeout: Duration,
    ) -> Result<Value, LlmError> {
        let mut request = self.http.post(url).timeout(timeout).json(&body);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let response = request.send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }

    async fn generate_anthropic(
        &self,
        prompt: &str,
        opts: &GenerateOptions,
    ) -> Result<String, LlmError> {
        let mut body = json!({
            "model": self.model,
            "max_tokens": opts.max_tokens.unwrap_or(512),
            "messages": [{"role": "user", "content": prompt}],
        });
        if let Some(system) = &opts.system {
            body["system"] = json!(system);
        }
        if let Some(t) = opts.temperature {
            body["temperature"] = json!(t);
        }

        let data = self
            .post_json(
                "https://api.anthropic.com/v1/messages",
                &[
                    ("x-api-key", self.api_key.as_str()),
                    ("anthropic-version", "2023-06-01"),
                ],
                body,
                opts.timeout.unwrap_or(DEFAULT_TIMEOUT),
            )
            .await?;

        data["content"][0]["text"]
            .as_str()
            .map(|s| s.trim().to_string())
            .ok_or(LlmError::MalformedResponse)
    }

    async fn generate_openai(
        &self,
        prompt: &str,
        opts: &GenerateOptions,
    ) -> Result<String, LlmError> {
        let mut messages = Vec::new();
        if let Some(system) = &opts.system {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": prompt}));

        let mut body = json!({
            "model": self.model,
            "max_tokens": opts.max_tokens.unwrap_or(512),
            "messages": messages,
        });
        if let Some(t) = opts.temperature {
            body["temperature"] = json!(t);
        }

        let auth = format!("Bearer {}", self.api_key);
        let data = self
            .post_json(
                "https://api.openai.com/v1/chat/completions",
                &[("Authorization", auth.as_str())],
                body,
                opts.timeout.unwrap_or(DEFAULT_TIMEOUT),
            )
            .await?;

        data["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.trim().to_string())
            .ok_or(LlmError::MalformedResponse)
    }

    async fn generate_google(
        &self,
        prompt: &str,
        opts: &GenerateOptions,
    ) -> Result<String, LlmError> {
        // The REST API carries system_instruction per request, so system-
        // prompt identity needs no client-side session cache.
        let mut body = json!({
            "contents": [{"parts": [{"text": prompt}]}],
            "generationConfig": {"maxOutputTokens": opts.max_tokens.unwrap_or(512)},
        });
        if let Some(system) = &opts.system {
            body["system_instruction"] = json!({"parts": [{"text": system}]});
        }
        if let Some(t) = opts.temperature {
            body["generationConfig"]["temperature"] = json!(t);
        }

        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.model, self.api_key
        );
        let data = self
            .post_json(&url, &[], body, opts.timeout.unwrap_or(DEFAULT_TIMEOUT))
            .await?;

        data["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .map(|s| s.trim().to_string())
            .ok_or(LlmError::MalformedResponse)
    }
}

#[async_trait]
impl TextGenerator for LlmClient {
    fn is_available(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn generate(&self, prompt: &str, opts: &GenerateOptions) -> Result<String, LlmError> {
        if !self.is_available() {
            return Err(LlmError::NotAvailable);
        }
        match self.provider {
            Provider::Anthropic => self.generate_anthropic(prompt, opts).await,
            Provider::OpenAi => self.generate_openai(prompt, opts).await,
            Provider::Google => self.generate_google(prompt, opts).await,
        }
    }
}

/// Build the primary client (extraction, query planning, synthesis) from
/// config. Falls back to an unavailable anthropic client when the configured
/// provider string is invalid — the pipelines then degrade instead of
/// refusing to start.
pub fn primary_client(llm: &LlmConfig) -> LlmClient {
    match llm.provider.parse::<Provider>() {
        Ok(provider) => {
            let (model, key) = credentials_for(llm, provider, false);
            LlmClient::new(provider, model, key)
        }
        Err(err) => {
            tracing::warn!(provider = %llm.provider, %err, "invalid LLM provider in config");
            LlmClient::new(Provider::Anthropic, llm.anthropic_model.clone(), "")
        }
    }
}

/// Build the Tier-2 policy-filter client, honoring the `*_tier2_model`
/// overrides with fallback to the provider's primary model.
pub fn tier2_client(llm: &LlmConfig) -> LlmClient {
    match llm.tier2_provider.parse::<Provider>() {
        Ok(provider) => {
            let (model, key) = credentials_for(llm, provider, true);
            LlmClient::new(provider, model, key)
        }
        Err(err) => {
            tracing::warn!(provider = %llm.tier2_provider, %err, "invalid tier2 LLM provider");
            LlmClient::new(Provider::Anthropic, llm.anthropic_model.clone(), "")
        }
    }
}

fn credentials_for(llm: &LlmConfig, provider: Provider, tier2: bool) -> (String, String) {
    match provider {
        Provider::Anthropic => (llm.anthropic_model.clone(), llm.anthropic_api_key.clone()),
        Provider::OpenAi => {
            let model = if tier2 && !llm.openai_tier2_model.is_empty() {
                llm.openai_tier2_model.clone()
            } else {
                llm.openai_model.clone()
            };
            (model, llm.openai_api_key.clone())
        }
        Provider::Google => {
            let model = if tier2 && !llm.google_tier2_model.is_empty() {
                llm.google_tier2_model.clone()
            } else {
                llm.google_model.clone()
            };
            (model, llm.google_api_key.clone())
        }
    }
}

/// Parse JSON out of an LLM response, tolerating code fences and preamble.
///
/// Tries in order: strip triple-backtick fences (with optional `json` tag)
/// then parse; parse the raw string; parse the substring between the first
/// `{` and the last `}`. Returns an empty object when everything fails.
pub fn parse_llm_json(raw: &str) -> Value {
    if raw.is_empty() {
        return json!({});
    }

    let mut text = raw.trim();
    if text.starts_with("```") {
        let stripped: Vec<&str> = text
            .lines()
            .filter(|line| !line.trim_start().starts_with("```"))
            .collect();
        let joined = stripped.join("\n");
        if let Ok(value) = serde_json::from_str::<Value>(&joined) {
            return value;
        }
        text = raw.trim();
    }

    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return value;
    }

    if let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) {
        if end > start {
            if let Ok(value) = serde_json::from_str::<Value>(&raw[start..=end]) {
                return value;
            }
        }
    }

    json!({})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_parsing_rejects_auto() {
        assert_eq!("anthropic".parse::<Provider>().unwrap(), Provider::Anthropic);
        assert_eq!("openai".parse::<Provider>().unwrap(), Provider::OpenAi);
        assert_eq!("google".parse::<Provider>().unwrap(), Provider::Google);
        assert!("auto".parse::<Provider>().is_err());
        assert!("cohere".parse::<Provider>().is_err());
    }

    #[test]
    fn missing_key_means_unavailable() {
        let client = LlmClient::new(Provider::Anthropic, "claude-sonnet-4-20250514", "");
        assert!(!client.is_available());

        let client = LlmClient::new(Provider::OpenAi, "gpt-4o-mini", "sk-test");
        assert!(client.is_available());
    }

    #[tokio::test]
    async fn generate_on_unavailable_client_fails_fast() {
        let client = LlmClient::new(Provider::Google, "gemini-2.0-flash-exp", "");
        let err = client
            .generate("hello", &GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::NotAvailable));
    }

    #[test]
    fn tier2_model_override_applies() {
        let mut llm = LlmConfig::default();
        llm.tier2_provider = "openai".into();
        llm.openai_api_key = "sk".into();
        llm.openai_tier2_model = "gpt-4o-nano".into();
        let client = tier2_client(&llm);
        assert_eq!(client.model(), "gpt-4o-nano");

        llm.openai_tier2_model.clear();
        let client = tier2_client(&llm);
        assert_eq!(client.model(), "gpt-4o-mini");
    }

    #[test]
    fn parse_plain_json() {
        let value = parse_llm_json(r#"{"capture": true, "reason": "decision"}"#);
        assert_eq!(value["capture"], true);
    }

    #[test]
    fn parse_fenced_json() {
        let raw = "```json\n{\"capture\": false, \"reason\": \"chit-chat\"}\n```";
        let value = parse_llm_json(raw);
        assert_eq!(value["capture"], false);
        assert_eq!(value["reason"], "chit-chat");
    }

    #[test]
    fn parse_json_with_preamble() {
        let raw = "Here is the result:\n{\"intent\": \"generic\", \"queries\": [\"q\"]}\nHope that helps!";
        let value = parse_llm_json(raw);
        assert_eq!(value["intent"], "generic");
    }

    #[test]
    fn parse_garbage_yields_empty_object() {
        assert_eq!(parse_llm_json("no json here"), json!({}));
        assert_eq!(parse_llm_json(""), json!({}));
        assert_eq!(parse_llm_json("{broken"), json!({}));
    }

    #[test]
    fn parse_fenced_without_tag() {
        let raw = "```\n{\"a\": 1}\n```";
        assert_eq!(parse_llm_json(raw)["a"], 1);
    }
}
