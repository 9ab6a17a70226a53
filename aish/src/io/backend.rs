//! Startup wiring for the model backend.

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use super::anthropic::AnthropicClient;
use super::bedrock::BedrockClient;
use super::config::{AppConfig, AppPaths, load_anthropic_config, load_bedrock_config};
use super::history::{HistoryEntry, HistoryLog};
use super::model::SuggestionSource;
use crate::core::backend::{BackendKind, select_backend};

pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Pick and initialize the suggestion backend once for the whole session.
///
/// When the Anthropic backend is selected but cannot be initialized, the
/// failure is recorded in the history log and Bedrock is used instead.
pub fn connect_backend(
    paths: &AppPaths,
    cfg: &AppConfig,
    log: &HistoryLog,
) -> Result<(BackendKind, Box<dyn SuggestionSource>)> {
    let env_key = std::env::var(API_KEY_ENV).ok();
    let config_exists = paths.anthropic_config_path.exists();
    let kind = select_backend(env_key.as_deref(), config_exists);
    let timeout = Duration::from_secs(cfg.request_timeout_secs);
    info!(backend = kind.as_str(), config_exists, "selected backend");

    if kind == BackendKind::Anthropic {
        let source = if config_exists {
            "config file"
        } else {
            "environment variable"
        };
        let client = load_anthropic_config(&paths.anthropic_config_path, env_key)
            .and_then(|anthropic| AnthropicClient::new(anthropic, timeout, cfg.max_files));
        match client {
            Ok(client) => {
                log.record(HistoryEntry::info(format!(
                    "Using Anthropic API client (from {source})"
                )));
                return Ok((BackendKind::Anthropic, Box::new(client)));
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "anthropic init failed, falling back to bedrock");
                log.record(HistoryEntry::error(format!(
                    "failed to initialize Anthropic client with {source}: {err:#}"
                )));
            }
        }
    }

    let bedrock = load_bedrock_config(&paths.bedrock_config_path)
        .and_then(|bedrock| BedrockClient::new(bedrock, timeout, cfg.max_files))
        .context("failed to initialize AWS client")?;
    log.record(HistoryEntry::info("Using AWS Bedrock client"));
    Ok((BackendKind::Bedrock, Box::new(bedrock)))
}
