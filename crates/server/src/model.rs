use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("model request timed out")]
    Timeout,
    #[error("model HTTP error: {0}")]
    Http(reqwest::Error),
    #[error("model returned status {0}")]
    BadStatus(reqwest::StatusCode),
    #[error("model returned invalid JSON response")]
    InvalidResponse,
}

impl From<reqwest::Error> for ModelError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            ModelError::Timeout
        } else {
            ModelError::Http(value)
        }
    }
}

/// Text-in, text-out generation. The reply is untrusted and goes through extraction.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, ModelError>;
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    pub timeout: Duration,
}

#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateContentResponse {
    fn into_text(self) -> String {
        self.candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self, ModelError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ModelError::Http)?;

        let endpoint = format!(
            "{}/v1beta/models/{}:generateContent",
            config.base_url.trim_end_matches('/'),
            config.model
        );

        Ok(Self {
            http,
            endpoint,
            api_key: config.api_key,
        })
    }
}

#[async_trait]
impl ModelProvider for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String, ModelError> {
        let resp = self
            .http
            .post(&self.endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(&serde_json::json!({
                "contents": [{ "role": "user", "parts": [{ "text": prompt }] }]
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(ModelError::BadStatus(resp.status()));
        }

        let decoded = resp
            .json::<GenerateContentResponse>()
            .await
            .map_err(|_| ModelError::InvalidResponse)?;

        Ok(decoded.into_text())
    }
}

/// Offline stand-in that always answers with the same well-formed analysis.
#[derive(Debug, Clone, Default)]
pub struct MockModel;

pub const MOCK_RESPONSE: &str = r#"{"summary":["Mock summary of the meeting","Key topics were discussed"],"action_items":[{"assignee":null,"task":"Review the meeting notes","due":null,"context":"Generated by the mock model provider"}],"decisions":["No binding decisions recorded"],"sentiment":{"sentiment":"neutral","score":0.0}}"#;

#[async_trait]
impl ModelProvider for MockModel {
    async fn generate(&self, _prompt: &str) -> Result<String, ModelError> {
        Ok(MOCK_RESPONSE.to_string())
    }
}
