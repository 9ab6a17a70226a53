//! System prompt rendering for suggestion requests.

use std::sync::LazyLock;

use anyhow::Result;
use minijinja::{Environment, context};

use super::model::SuggestRequest;

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");

static ENV: LazyLock<Environment<'static>> = LazyLock::new(|| {
    let mut env = Environment::new();
    env.add_template("system", SYSTEM_TEMPLATE)
        .expect("system template should be valid");
    env
});

/// Render the system prompt for one request.
///
/// The history section is left out entirely when there is no history.
pub fn render_system_prompt(request: &SuggestRequest, file_cap: usize) -> Result<String> {
    let template = ENV.get_template("system")?;
    let rendered = template.render(context! {
        working_directory => request.working_directory.display().to_string(),
        file_cap => file_cap,
        files => &request.files,
        history => Some(request.history.trim()).filter(|s| !s.is_empty()),
    })?;
    Ok(rendered)
}
