//! Suggestion source backed by AWS Bedrock, invoked through the `aws` CLI.
//!
//! The CLI resolves credentials, profiles and regions exactly as the user's
//! other AWS tooling does. The request body and the response are exchanged via
//! files in a scratch directory that is removed after each call.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, info, instrument, warn};

use super::config::BedrockConfig;
use super::model::{Message, MessagesRequest, MessagesResponse, SuggestRequest, SuggestionSource};
use super::process::run_with_deadline;
use super::prompt::render_system_prompt;

pub const BEDROCK_ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";

const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

pub struct BedrockClient {
    config: BedrockConfig,
    aws_cli: PathBuf,
    timeout: Duration,
    file_cap: usize,
}

impl BedrockClient {
    /// Build a client using `aws` from `PATH`.
    pub fn new(config: BedrockConfig, timeout: Duration, file_cap: usize) -> Result<Self> {
        Self::with_cli(config, "aws", timeout, file_cap)
    }

    /// Build a client using a specific CLI binary. Fails if it cannot be run.
    pub fn with_cli(
        config: BedrockConfig,
        aws_cli: impl Into<PathBuf>,
        timeout: Duration,
        file_cap: usize,
    ) -> Result<Self> {
        let aws_cli = aws_cli.into();
        let mut version_check = Command::new(&aws_cli);
        version_check.arg("--version");
        let output = run_with_deadline(version_check, VERSION_CHECK_TIMEOUT)
            .with_context(|| format!("run {} --version", aws_cli.display()))?;
        if output.timed_out || !output.status.success() {
            bail!("{} --version failed (is the AWS CLI installed?)", aws_cli.display());
        }
        debug!(
            version = %String::from_utf8_lossy(&output.stdout).trim(),
            "aws cli available"
        );
        Ok(Self {
            config,
            aws_cli,
            timeout,
            file_cap,
        })
    }

    fn invoke_command(&self, body_path: &Path, out_path: &Path) -> Command {
        let mut cmd = Command::new(&self.aws_cli);
        cmd.arg("bedrock-runtime")
            .arg("invoke-model")
            .arg("--model-id")
            .arg(&self.config.model_id)
            .arg("--content-type")
            .arg("application/json")
            .arg("--accept")
            .arg("application/json")
            .arg("--body")
            .arg(format!("fileb://{}", body_path.display()));
        if let Some(region) = &self.config.region {
            cmd.arg("--region").arg(region);
        }
        if let Some(profile) = &self.config.profile {
            cmd.arg("--profile").arg(profile);
        }
        if let Some(endpoint) = &self.config.endpoint {
            cmd.arg("--endpoint-url").arg(endpoint);
        }
        cmd.arg(out_path);
        cmd
    }
}

impl SuggestionSource for BedrockClient {
    #[instrument(skip_all, fields(model = %self.config.model_id, timeout_secs = self.timeout.as_secs()))]
    fn suggest(&self, request: &SuggestRequest) -> Result<String> {
        let body = MessagesRequest {
            model: None,
            anthropic_version: Some(BEDROCK_ANTHROPIC_VERSION),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            system: render_system_prompt(request, self.file_cap)?,
            messages: vec![Message::user(&request.user_query)],
        };

        let scratch = tempfile::tempdir().context("create bedrock scratch dir")?;
        let body_path = scratch.path().join("request.json");
        let out_path = scratch.path().join("response.json");
        let payload = serde_json::to_vec(&body).context("serialize bedrock request")?;
        fs::write(&body_path, payload)
            .with_context(|| format!("write {}", body_path.display()))?;

        info!("invoking bedrock model");
        let output = run_with_deadline(self.invoke_command(&body_path, &out_path), self.timeout)
            .context("run aws bedrock-runtime invoke-model")?;

        if output.timed_out {
            bail!("bedrock request timed out after {:?}", self.timeout);
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(exit_code = ?output.status.code(), "bedrock invoke-model failed");
            return Err(anyhow!(
                "failed to invoke model (status {:?}): {}",
                output.status.code(),
                stderr.trim()
            ));
        }

        let raw = fs::read_to_string(&out_path)
            .with_context(|| format!("read {}", out_path.display()))?;
        let parsed: MessagesResponse =
            serde_json::from_str(&raw).context("parse model response")?;
        parsed.into_text()
    }
}
