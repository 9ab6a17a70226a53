//! Assistant configuration stored under `~/.ai/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Environment variable that relocates the `~/.ai` directory.
pub const HOME_ENV: &str = "AI_HOME";

pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-7-sonnet-20250219";
pub const DEFAULT_ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
pub const DEFAULT_BEDROCK_MODEL: &str = "anthropic.claude-3-7-sonnet-20250219-v1:0";

/// All canonical paths within the assistant's state directory.
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub root: PathBuf,
    pub log_path: PathBuf,
    pub config_path: PathBuf,
    pub anthropic_config_path: PathBuf,
    pub bedrock_config_path: PathBuf,
}

impl AppPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            log_path: root.join("action.log"),
            config_path: root.join("config.toml"),
            anthropic_config_path: root.join("anthropic.toml"),
            bedrock_config_path: root.join("bedrock.toml"),
            root,
        }
    }

    /// Resolve `$AI_HOME`, falling back to `~/.ai`.
    pub fn discover() -> Result<Self> {
        if let Some(dir) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
            return Ok(Self::new(dir));
        }
        let home = dirs::home_dir().ok_or_else(|| anyhow!("cannot determine home directory"))?;
        Ok(Self::new(home.join(".ai")))
    }
}

/// General assistant settings (`config.toml`).
///
/// Missing fields default to the values the assistant has always used.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    /// Cap on the number of file names sent to the model.
    pub max_files: usize,

    /// Overall deadline for one model request.
    pub request_timeout_secs: u64,

    /// Stop after this many turns without a final command. Unbounded when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,

    pub history: HistoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HistoryConfig {
    /// Bytes read from the end of the history log per request.
    pub max_bytes: usize,
    /// Lines kept from that window.
    pub max_lines: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_bytes: 5 * 1024,
            max_lines: 50,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_files: 1000,
            request_timeout_secs: 120,
            max_turns: None,
            history: HistoryConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_files == 0 {
            return Err(anyhow!("max_files must be > 0"));
        }
        if self.request_timeout_secs == 0 {
            return Err(anyhow!("request_timeout_secs must be > 0"));
        }
        if self.max_turns == Some(0) {
            return Err(anyhow!("max_turns must be > 0 when set"));
        }
        if self.history.max_bytes == 0 || self.history.max_lines == 0 {
            return Err(anyhow!("history.max_bytes and history.max_lines must be > 0"));
        }
        Ok(())
    }
}

/// Direct Anthropic API settings (`anthropic.toml`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnthropicConfig {
    /// Falls back to `ANTHROPIC_API_KEY` when empty.
    pub api_key: String,
    pub model_id: String,
    /// Messages endpoint; override for proxies and gateways.
    pub base_url: String,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model_id: DEFAULT_ANTHROPIC_MODEL.to_string(),
            base_url: DEFAULT_ANTHROPIC_URL.to_string(),
            max_tokens: 2048,
            temperature: 0.5,
        }
    }
}

/// AWS Bedrock settings (`bedrock.toml`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BedrockConfig {
    pub model_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    /// Custom endpoint URL (e.g. a VPC endpoint).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl Default for BedrockConfig {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_BEDROCK_MODEL.to_string(),
            region: None,
            profile: None,
            endpoint: None,
            max_tokens: 2048,
            temperature: 0.5,
        }
    }
}

/// Load `config.toml`, writing defaults on first run.
pub fn load_app_config(path: &Path) -> Result<AppConfig> {
    let cfg: AppConfig = load_or_bootstrap(path)?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Load `anthropic.toml`, writing defaults on first use.
///
/// An empty model id or URL falls back to the default; an empty key falls back
/// to `api_key_env`.
pub fn load_anthropic_config(path: &Path, api_key_env: Option<String>) -> Result<AnthropicConfig> {
    let mut cfg: AnthropicConfig = load_or_bootstrap(path)?;
    if cfg.model_id.trim().is_empty() {
        cfg.model_id = DEFAULT_ANTHROPIC_MODEL.to_string();
    }
    if cfg.base_url.trim().is_empty() {
        cfg.base_url = DEFAULT_ANTHROPIC_URL.to_string();
    }
    if cfg.api_key.trim().is_empty() {
        cfg.api_key = api_key_env.unwrap_or_default();
    }
    Ok(cfg)
}

/// Load `bedrock.toml`, writing defaults on first use.
pub fn load_bedrock_config(path: &Path) -> Result<BedrockConfig> {
    let mut cfg: BedrockConfig = load_or_bootstrap(path)?;
    if cfg.model_id.trim().is_empty() {
        cfg.model_id = DEFAULT_BEDROCK_MODEL.to_string();
    }
    Ok(cfg)
}

fn load_or_bootstrap<T>(path: &Path) -> Result<T>
where
    T: Default + Serialize + DeserializeOwned,
{
    if !path.exists() {
        let cfg = T::default();
        write_toml(path, &cfg)?;
        info!(path = %path.display(), "wrote default config");
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg = toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    debug!(path = %path.display(), "config loaded");
    Ok(cfg)
}

/// Atomically write a config file (temp file + rename).
pub fn write_toml<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = toml::to_string_pretty(value).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
