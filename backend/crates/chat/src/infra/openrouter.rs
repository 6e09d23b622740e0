//! OpenRouter HTTP client
//!
//! Implements [`ChatUpstream`] against an OpenAI-compatible
//! `/chat/completions` endpoint.

use futures::StreamExt;
use reqwest::StatusCode;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

use crate::domain::upstream::{ChatUpstream, UpstreamError, UpstreamRequest, UpstreamStream};

/// Provider error text meaning "this model has no live route"
const NO_ENDPOINTS_MARKER: &str = "no endpoints found";

/// Upper bound on provider error text carried into logs
const MAX_ERROR_BODY_CHARS: usize = 300;

/// OpenRouter connection settings
#[derive(Debug, Clone)]
pub struct OpenRouterConfig {
    pub base_url: String,
    /// Missing key is not fatal: every chat answers with a systems notice
    pub api_key: Option<String>,
    /// Sent as `HTTP-Referer` (provider attribution)
    pub referer: String,
    /// Sent as `X-Title`
    pub title: String,
    pub connect_timeout: Duration,
    /// Whole-request bound for availability probes
    pub probe_timeout: Duration,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            base_url: "https://openrouter.ai/api/v1".to_string(),
            api_key: None,
            referer: "http://localhost:40922".to_string(),
            title: "AI Chat Demo".to_string(),
            connect_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(15),
        }
    }
}

impl OpenRouterConfig {
    /// Blank keys count as missing
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

/// reqwest-backed upstream
#[derive(Clone)]
pub struct OpenRouterClient {
    http: reqwest::Client,
    config: Arc<OpenRouterConfig>,
}

impl OpenRouterClient {
    pub fn new(config: OpenRouterConfig) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| UpstreamError::Network(e.to_string()))?;

        Ok(Self {
            http,
            config: Arc::new(config),
        })
    }

    fn post(&self, api_key: &str) -> reqwest::RequestBuilder {
        self.http
            .post(self.config.completions_url())
            .bearer_auth(api_key)
            .header("HTTP-Referer", &self.config.referer)
            .header("X-Title", &self.config.title)
    }

    fn api_key(&self) -> Result<&str, UpstreamError> {
        self.config
            .api_key
            .as_deref()
            .ok_or(UpstreamError::MissingApiKey)
    }
}

impl ChatUpstream for OpenRouterClient {
    fn is_configured(&self) -> bool {
        self.config.api_key.is_some()
    }

    async fn open_stream(
        &self,
        request: &UpstreamRequest,
    ) -> Result<UpstreamStream, UpstreamError> {
        let api_key = self.api_key()?;

        let response = self
            .post(api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| UpstreamError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, &body, &request.model));
        }

        tracing::debug!(model = %request.model, "Upstream stream opened");

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| UpstreamError::Stream(e.to_string())))
            .boxed())
    }

    async fn probe(&self, model: &str) -> Result<bool, UpstreamError> {
        let api_key = self.api_key()?;

        let response = self
            .post(api_key)
            .timeout(self.config.probe_timeout)
            .json(&json!({
                "model": model,
                "messages": [{"role": "user", "content": "ping"}],
                "max_tokens": 1,
                "stream": false
            }))
            .send()
            .await
            .map_err(|e| UpstreamError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(model = %model, status = status.as_u16(), "Model probe failed");
        }
        Ok(status.is_success())
    }
}

/// Map a non-2xx response to an [`UpstreamError`]
pub fn classify_failure(status: StatusCode, body: &str, model: &str) -> UpstreamError {
    let message = error_message(body);

    if message.to_ascii_lowercase().contains(NO_ENDPOINTS_MARKER) {
        return UpstreamError::NoEndpoints {
            model: model.to_string(),
        };
    }

    UpstreamError::Status {
        status: status.as_u16(),
        message,
    }
}

/// `error.message` from a JSON error body, else the raw body (bounded)
fn error_message(body: &str) -> String {
    let from_json = serde_json::from_str::<Value>(body).ok().and_then(|value| {
        value
            .pointer("/error/message")
            .and_then(Value::as_str)
            .map(str::to_string)
    });

    from_json
        .unwrap_or_else(|| body.to_string())
        .chars()
        .take(MAX_ERROR_BODY_CHARS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_endpoints_detected() {
        let body = r#"{"error":{"message":"No endpoints found for deepseek/deepseek-r1:free.","code":404}}"#;
        let err = classify_failure(StatusCode::NOT_FOUND, body, "deepseek/deepseek-r1:free");
        assert_eq!(
            err,
            UpstreamError::NoEndpoints {
                model: "deepseek/deepseek-r1:free".into()
            }
        );
    }

    #[test]
    fn test_status_error_keeps_message() {
        let body = r#"{"error":{"message":"Rate limit exceeded","code":429}}"#;
        let err = classify_failure(StatusCode::TOO_MANY_REQUESTS, body, "openai/gpt-4o");
        assert_eq!(
            err,
            UpstreamError::Status {
                status: 429,
                message: "Rate limit exceeded".into()
            }
        );
    }

    #[test]
    fn test_plain_text_body_bounded() {
        let body = "x".repeat(1_000);
        match classify_failure(StatusCode::BAD_GATEWAY, &body, "m") {
            UpstreamError::Status { status, message } => {
                assert_eq!(status, 502);
                assert_eq!(message.len(), MAX_ERROR_BODY_CHARS);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_config() {
        let config = OpenRouterConfig::default()
            .with_base_url("http://localhost:9999/v1/")
            .with_api_key(Some("   ".into()));
        assert_eq!(config.api_key, None);
        assert_eq!(
            config.completions_url(),
            "http://localhost:9999/v1/chat/completions"
        );

        let client = OpenRouterClient::new(config.with_api_key(Some("sk-test".into()))).unwrap();
        assert!(client.is_configured());
    }

    #[tokio::test]
    async fn test_missing_key_short_circuits() {
        let client = OpenRouterClient::new(OpenRouterConfig::default()).unwrap();
        assert!(!client.is_configured());

        let request = UpstreamRequest::streaming("openai/gpt-4o", Vec::new());
        assert!(matches!(
            client.open_stream(&request).await,
            Err(UpstreamError::MissingApiKey)
        ));
        assert_eq!(
            client.probe("openai/gpt-4o").await,
            Err(UpstreamError::MissingApiKey)
        );
    }
}
