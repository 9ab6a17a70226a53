//! Suggestion source backed by the Anthropic Messages API.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, instrument, warn};

use super::config::AnthropicConfig;
use super::model::{Message, MessagesRequest, MessagesResponse, SuggestRequest, SuggestionSource};
use super::prompt::render_system_prompt;

pub const API_VERSION: &str = "2023-06-01";

/// Blocking HTTPS client for `POST /v1/messages`.
pub struct AnthropicClient {
    config: AnthropicConfig,
    http: reqwest::blocking::Client,
    file_cap: usize,
}

impl AnthropicClient {
    /// Build a client whose every request is bounded by `timeout`.
    pub fn new(config: AnthropicConfig, timeout: Duration, file_cap: usize) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            bail!(
                "Anthropic API key not found in config or environment variable ANTHROPIC_API_KEY"
            );
        }
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("build http client")?;
        Ok(Self {
            config,
            http,
            file_cap,
        })
    }
}

impl SuggestionSource for AnthropicClient {
    #[instrument(skip_all, fields(model = %self.config.model_id))]
    fn suggest(&self, request: &SuggestRequest) -> Result<String> {
        let body = MessagesRequest {
            model: Some(&self.config.model_id),
            anthropic_version: None,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            system: render_system_prompt(request, self.file_cap)?,
            messages: vec![Message::user(&request.user_query)],
        };

        info!("requesting suggestion from anthropic");
        let response = self
            .http
            .post(&self.config.base_url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .context("send request")?;

        let status = response.status();
        let text = response.text().context("read response body")?;
        if !status.is_success() {
            warn!(status = status.as_u16(), "anthropic request failed");
            bail!(
                "API request failed with status {}: {}",
                status.as_u16(),
                text
            );
        }

        let parsed: MessagesResponse =
            serde_json::from_str(&text).context("parse API response")?;
        let text = parsed.into_text()?;
        debug!(bytes = text.len(), "anthropic response received");
        Ok(text)
    }
}
