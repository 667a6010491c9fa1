// Hosted model client for commit messages.
//
// Anthropic uses the Messages API; OpenAI and OpenRouter share the chat
// completions shape. Request bodies and response extraction are pure so they
// can be tested without a network.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;

use super::commit::CommitMessageClient;
use crate::config::{LlmConfig, ProviderKind};

const MAX_TOKENS: u32 = 60;
const TEMPERATURE: f32 = 0.2;
const ANTHROPIC_VERSION: &str = "2023-06-01";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("no API key configured for {0}")]
    MissingApiKey(&'static str),

    #[error("LLM request failed: {0}")]
    Http(String),

    #[error("LLM provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("LLM response could not be decoded: {0}")]
    Decode(String),

    #[error("LLM returned an empty response")]
    EmptyResponse,
}

/// Provider with its wire details.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Anthropic,
    OpenAi,
    OpenRouter,
}

impl From<ProviderKind> for Provider {
    fn from(kind: ProviderKind) -> Self {
        match kind {
            ProviderKind::Anthropic => Self::Anthropic,
            ProviderKind::OpenAi => Self::OpenAi,
            ProviderKind::OpenRouter => Self::OpenRouter,
        }
    }
}

impl Provider {
    pub fn name(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::OpenRouter => "openrouter",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Self::Anthropic => "claude-3-5-haiku-latest",
            Self::OpenAi => "gpt-4o-mini",
            Self::OpenRouter => "openai/gpt-4o-mini",
        }
    }

    pub fn endpoint(self) -> &'static str {
        match self {
            Self::Anthropic => "https://api.anthropic.com/v1/messages",
            Self::OpenAi => "https://api.openai.com/v1/chat/completions",
            Self::OpenRouter => "https://openrouter.ai/api/v1/chat/completions",
        }
    }

    pub fn api_key_env(self) -> &'static str {
        match self {
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
            Self::OpenRouter => "OPENROUTER_API_KEY",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmSettings {
    pub provider: Provider,
    pub model: String,
    pub api_key: String,
    pub endpoint: String,
}

impl LlmSettings {
    /// Resolve settings from project config, reading the provider's API key
    /// environment variable when the project has none.
    pub fn from_project(config: &LlmConfig) -> Result<Self, LlmError> {
        Self::from_project_with(config, |key| std::env::var(key).ok())
    }

    pub fn from_project_with(
        config: &LlmConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, LlmError> {
        let provider = Provider::from(config.provider);
        let configured = match provider {
            Provider::Anthropic => config.anthropic_api_key.clone(),
            Provider::OpenAi => config.openai_api_key.clone(),
            Provider::OpenRouter => config.openrouter_api_key.clone(),
        };
        let non_blank = |key: &String| !key.trim().is_empty();
        let api_key = configured
            .filter(non_blank)
            .or_else(|| env(provider.api_key_env()).filter(non_blank))
            .ok_or(LlmError::MissingApiKey(provider.name()))?;

        Ok(Self {
            provider,
            model: config.model.clone().unwrap_or_else(|| provider.default_model().to_string()),
            api_key,
            endpoint: provider.endpoint().to_string(),
        })
    }
}

pub fn anthropic_request(model: &str, system: &str, prompt: &str) -> Value {
    json!({
        "model": model,
        "max_tokens": MAX_TOKENS,
        "temperature": TEMPERATURE,
        "system": system,
        "messages": [{ "role": "user", "content": prompt }],
    })
}

pub fn chat_completions_request(model: &str, system: &str, prompt: &str) -> Value {
    json!({
        "model": model,
        "max_tokens": MAX_TOKENS,
        "temperature": TEMPERATURE,
        "messages": [
            { "role": "system", "content": system },
            { "role": "user", "content": prompt },
        ],
    })
}

/// Text of the first `text` content block.
pub fn extract_anthropic_text(body: &Value) -> Result<String, LlmError> {
    body["content"]
        .as_array()
        .and_then(|blocks| {
            blocks.iter().find(|b| b["type"] == "text").and_then(|b| b["text"].as_str())
        })
        .map(str::to_string)
        .ok_or_else(|| LlmError::Decode("missing content[].text".into()))
}

pub fn extract_chat_text(body: &Value) -> Result<String, LlmError> {
    body["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| LlmError::Decode("missing choices[0].message.content".into()))
}

#[derive(Debug, Clone)]
pub struct HttpCommitMessageClient {
    settings: LlmSettings,
    http: reqwest::Client,
}

impl HttpCommitMessageClient {
    pub fn new(settings: LlmSettings) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|error| LlmError::Http(error.to_string()))?;
        Ok(Self { settings, http })
    }

    /// Client for a project, or `None` when no key is available.
    pub fn for_project(config: &LlmConfig) -> Option<Self> {
        LlmSettings::from_project(config).ok().and_then(|settings| Self::new(settings).ok())
    }

    pub fn settings(&self) -> &LlmSettings {
        &self.settings
    }
}

async fn send(
    http: reqwest::Client,
    settings: LlmSettings,
    system: String,
    prompt: String,
) -> Result<String, LlmError> {
    let request = match settings.provider {
        Provider::Anthropic => http
            .post(&settings.endpoint)
            .header("x-api-key", &settings.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&anthropic_request(&settings.model, &system, &prompt)),
        Provider::OpenAi | Provider::OpenRouter => http
            .post(&settings.endpoint)
            .header("Authorization", format!("Bearer {}", settings.api_key))
            .json(&chat_completions_request(&settings.model, &system, &prompt)),
    };

    let response = request.send().await.map_err(|error| LlmError::Http(error.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(LlmError::Status { status: status.as_u16(), body });
    }
    let body: Value = response.json().await.map_err(|error| LlmError::Decode(error.to_string()))?;

    let text = match settings.provider {
        Provider::Anthropic => extract_anthropic_text(&body)?,
        Provider::OpenAi | Provider::OpenRouter => extract_chat_text(&body)?,
    };
    if text.trim().is_empty() {
        return Err(LlmError::EmptyResponse);
    }
    Ok(text)
}

impl CommitMessageClient for HttpCommitMessageClient {
    fn provider(&self) -> &str {
        self.settings.provider.name()
    }

    fn model(&self) -> &str {
        &self.settings.model
    }

    fn generate(
        &self,
        system: &str,
        user_prompt: &str,
    ) -> Pin<Box<dyn Future<Output = Result<String, LlmError>> + Send>> {
        Box::pin(send(
            self.http.clone(),
            self.settings.clone(),
            system.to_string(),
            user_prompt.to_string(),
        ))
    }
}
