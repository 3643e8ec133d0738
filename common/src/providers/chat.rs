use anyhow::Result;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::AgentError;

// Deep-research models can run for minutes on a single completion.
const REQUEST_TIMEOUT_SECS: u64 = 600;
const FALLBACK_API_KEY_VAR: &str = "LLM_API_KEY";

/// An OpenAI-compatible completion endpoint, written `host||model` in config,
/// e.g. `api.perplexity.ai||sonar-deep-research`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModelEndpoint {
    pub host: String,
    pub model: String,
}

impl ModelEndpoint {
    pub fn new(host: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            model: model.into(),
        }
    }

    pub fn chat_url(&self) -> String {
        format!("https://{}/chat/completions", self.host)
    }

    /// Env var holding the API key for this host. Add hosts here when wiring
    /// up a new provider; anything unknown falls back to `LLM_API_KEY`.
    pub fn api_key_var(&self) -> &'static str {
        match self.host.as_str() {
            "api.openai.com/v1" => "OPENAI_API_KEY",
            "api.perplexity.ai" => "PERPLEXITY_API_KEY",
            "openrouter.ai/api/v1" => "OPENROUTER_API_KEY",
            "api.deepseek.com" => "DEEPSEEK_API_KEY",
            "api.mistral.ai/v1" => "MISTRAL_API_KEY",
            _ => FALLBACK_API_KEY_VAR,
        }
    }

    fn api_key(&self) -> Result<String, AgentError> {
        let var = self.api_key_var();
        env::var(var)
            .or_else(|_| env::var(FALLBACK_API_KEY_VAR))
            .map_err(|_| AgentError::AIError(format!("{} not set", var)))
    }
}

impl FromStr for ModelEndpoint {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, model) = s.split_once("||").ok_or_else(|| {
            AgentError::ParseError(format!("Invalid model endpoint '{}', expected host||model", s))
        })?;
        if host.is_empty() || model.is_empty() {
            return Err(AgentError::ParseError(format!(
                "Invalid model endpoint '{}', expected host||model",
                s
            )));
        }
        Ok(Self::new(host, model))
    }
}

impl TryFrom<String> for ModelEndpoint {
    type Error = AgentError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ModelEndpoint> for String {
    fn from(endpoint: ModelEndpoint) -> Self {
        endpoint.to_string()
    }
}

impl fmt::Display for ModelEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}||{}", self.host, self.model)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Chat-completions client shared by every agent. One reqwest client,
/// per-request endpoint selection, exponential backoff on failure.
#[derive(Debug, Clone)]
pub struct ChatClient {
    client: Client,
    max_retries: u32,
}

impl ChatClient {
    pub fn new(max_retries: u32) -> Result<Self> {
        Ok(Self {
            client: Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()?,
            max_retries,
        })
    }

    pub async fn complete(
        &self,
        endpoint: &ModelEndpoint,
        messages: &[ChatMessage],
    ) -> Result<String, AgentError> {
        let api_key = endpoint.api_key()?;

        let mut attempt = 0;
        loop {
            match self.try_complete(endpoint, &api_key, messages).await {
                Ok(content) => return Ok(content),
                Err(e) => {
                    if attempt >= self.max_retries {
                        return Err(e);
                    }
                    let delay = Duration::from_secs(1u64 << attempt);
                    println!(
                        "⚠️ Completion attempt {} against {} failed: {}. Retrying in {}s...",
                        attempt + 1,
                        endpoint.host,
                        e,
                        delay.as_secs()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn try_complete(
        &self,
        endpoint: &ModelEndpoint,
        api_key: &str,
        messages: &[ChatMessage],
    ) -> Result<String, AgentError> {
        let request = ChatRequest {
            model: &endpoint.model,
            messages,
        };

        let response = self
            .client
            .post(endpoint.chat_url())
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AgentError::AIError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::AIError(format!(
                "{} returned {}: {}",
                endpoint.host, status, body
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| AgentError::ParseError(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| {
                AgentError::AIError(format!("Empty completion from {}", endpoint.host))
            })
    }
}
