//! Suggestion source abstraction.
//!
//! The [`SuggestionSource`] trait decouples the interaction loop from the model
//! backend (Anthropic API or AWS Bedrock). Tests use scripted sources that
//! return predetermined responses without touching the network.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::core::suggestion::{CommandSuggestion, SuggestionError, parse_suggestion};

/// Everything a backend needs to ask for the next command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuggestRequest {
    /// The (possibly folded) request text for this turn.
    pub user_query: String,
    pub working_directory: PathBuf,
    /// Files in the working directory, already capped.
    pub files: Vec<String>,
    /// Recent history log tail; empty when unavailable.
    pub history: String,
}

/// Abstraction over model backends.
pub trait SuggestionSource {
    /// Ask the model for the next step and return its raw response text.
    ///
    /// Implementations enforce their own overall deadline and fail rather than
    /// retry when it expires.
    fn suggest(&self, request: &SuggestRequest) -> Result<String>;
}

impl<S: SuggestionSource + ?Sized> SuggestionSource for Box<S> {
    fn suggest(&self, request: &SuggestRequest) -> Result<String> {
        (**self).suggest(request)
    }
}

/// A decoded suggestion, or the raw text of a response that did not decode.
#[derive(Debug)]
pub enum Fetched {
    Suggestion(CommandSuggestion),
    Malformed { raw: String, error: SuggestionError },
}

/// Ask `source` for a suggestion and decode it.
///
/// Transport failures are errors; an undecodable response is returned as
/// [`Fetched::Malformed`] together with the raw text so the caller can report it.
#[instrument(skip_all, fields(query_bytes = request.user_query.len(), history_bytes = request.history.len()))]
pub fn fetch_suggestion<S: SuggestionSource + ?Sized>(
    source: &S,
    request: &SuggestRequest,
) -> Result<Fetched> {
    let raw = source
        .suggest(request)
        .context("get command suggestion")?;
    match parse_suggestion(&raw) {
        Ok(suggestion) => {
            debug!(command = %suggestion.command_text, "decoded suggestion");
            Ok(Fetched::Suggestion(suggestion))
        }
        Err(error) => Ok(Fetched::Malformed { raw, error }),
    }
}

/// Text blocks of an Anthropic Messages response body (API and Bedrock share it).
#[derive(Debug, serde::Deserialize)]
pub(crate) struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, serde::Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

impl MessagesResponse {
    /// Concatenate every text block; an empty response is an error.
    pub(crate) fn into_text(self) -> Result<String> {
        if self.content.is_empty() {
            anyhow::bail!("empty response from model");
        }
        Ok(self
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .map(|block| block.text)
            .collect())
    }
}

/// Request body shared by the Anthropic API and Bedrock.
#[derive(Debug, serde::Serialize)]
pub(crate) struct MessagesRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anthropic_version: Option<&'a str>,
    pub max_tokens: u32,
    pub temperature: f64,
    pub system: String,
    pub messages: Vec<Message<'a>>,
}

#[derive(Debug, serde::Serialize)]
pub(crate) struct Message<'a> {
    pub role: &'static str,
    pub content: Vec<TextContent<'a>>,
}

#[derive(Debug, serde::Serialize)]
pub(crate) struct TextContent<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: &'a str,
}

impl<'a> Message<'a> {
    pub(crate) fn user(text: &'a str) -> Self {
        Self {
            role: "user",
            content: vec![TextContent { kind: "text", text }],
        }
    }
}
