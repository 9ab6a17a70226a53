//! Model backend selection.

/// The two interchangeable suggestion backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Direct Anthropic Messages API.
    Anthropic,
    /// Anthropic models hosted on AWS Bedrock.
    Bedrock,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Anthropic => "anthropic",
            BackendKind::Bedrock => "bedrock",
        }
    }
}

/// Choose a backend from the startup environment.
///
/// A non-empty API key in the environment wins, then an existing Anthropic
/// config file; everything else goes to Bedrock.
pub fn select_backend(env_api_key: Option<&str>, anthropic_config_exists: bool) -> BackendKind {
    let has_env_key = env_api_key.is_some_and(|key| !key.trim().is_empty());
    if has_env_key || anthropic_config_exists {
        BackendKind::Anthropic
    } else {
        BackendKind::Bedrock
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_key_selects_anthropic() {
        assert_eq!(
            select_backend(Some("sk-ant-123"), false),
            BackendKind::Anthropic
        );
    }

    #[test]
    fn blank_env_key_is_ignored() {
        assert_eq!(select_backend(Some("  "), false), BackendKind::Bedrock);
    }

    #[test]
    fn config_file_selects_anthropic() {
        assert_eq!(select_backend(None, true), BackendKind::Anthropic);
    }

    #[test]
    fn falls_back_to_bedrock() {
        assert_eq!(select_backend(None, false), BackendKind::Bedrock);
    }
}
