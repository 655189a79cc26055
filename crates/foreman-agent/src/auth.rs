//! Credential discovery for agent backends
//!
//! Claude:
//! 1. CLAUDE_CODE_OAUTH_TOKEN - subscription access
//! 2. ANTHROPIC_API_KEY - standard API access
//!
//! Codex: OPENAI_API_KEY.
//!
//! Both CLIs also keep their own login; a missing variable is only an error
//! for callers that insist on environment credentials.

use foreman_core::{ForemanError, Result};
use std::env;

/// Where a credential came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    ClaudeOAuth,
    AnthropicApiKey,
    OpenAiApiKey,
}

impl CredentialSource {
    pub fn env_var(&self) -> &'static str {
        match self {
            Self::ClaudeOAuth => "CLAUDE_CODE_OAUTH_TOKEN",
            Self::AnthropicApiKey => "ANTHROPIC_API_KEY",
            Self::OpenAiApiKey => "OPENAI_API_KEY",
        }
    }
}

/// A resolved credential
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub source: CredentialSource,
    pub token: String,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("source", &self.source)
            .field("token", &"<redacted>")
            .finish()
    }
}

fn from_env(source: CredentialSource) -> Option<Credential> {
    env::var(source.env_var())
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(|token| Credential { source, token })
}

/// Get the Claude credential from the environment
///
/// Priority: CLAUDE_CODE_OAUTH_TOKEN, then ANTHROPIC_API_KEY.
pub fn claude_credential() -> Result<Credential> {
    if let Some(credential) = from_env(CredentialSource::ClaudeOAuth) {
        tracing::debug!("Using Claude Code OAuth token (subscription)");
        return Ok(credential);
    }

    if let Some(credential) = from_env(CredentialSource::AnthropicApiKey) {
        tracing::debug!("Using ANTHROPIC_API_KEY");
        return Ok(credential);
    }

    Err(ForemanError::Auth(
        "No Claude credentials found. Set either:\n\
         - CLAUDE_CODE_OAUTH_TOKEN=sk-ant-oat01-... (for subscription access)\n\
         - ANTHROPIC_API_KEY=sk-ant-api03-...       (for API access)"
            .to_string(),
    ))
}

/// Get the Codex credential from the environment
pub fn codex_credential() -> Result<Credential> {
    from_env(CredentialSource::OpenAiApiKey).ok_or_else(|| {
        ForemanError::Auth("No Codex credentials found. Set OPENAI_API_KEY=sk-...".to_string())
    })
}

/// Value of an arbitrary token variable (router keys and the like)
pub fn token_from_env(var: &str) -> Option<String> {
    env::var(var).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Mutex to prevent concurrent env var modifications
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn with_env_vars<F, R>(vars: &[(&str, Option<&str>)], f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());

        let originals: Vec<_> = vars.iter().map(|(k, _)| (*k, env::var(k).ok())).collect();

        for (key, value) in vars {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }

        let result = f();

        for (key, original) in originals {
            match original {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }

        result
    }

    #[test]
    fn test_oauth_token_priority() {
        with_env_vars(
            &[
                ("CLAUDE_CODE_OAUTH_TOKEN", Some("test-oauth")),
                ("ANTHROPIC_API_KEY", Some("test-api-key")),
            ],
            || {
                let credential = claude_credential().unwrap();
                assert_eq!(credential.source, CredentialSource::ClaudeOAuth);
                assert_eq!(credential.token, "test-oauth");
            },
        );
    }

    #[test]
    fn test_api_key_fallback_skips_blank_oauth() {
        with_env_vars(
            &[
                ("CLAUDE_CODE_OAUTH_TOKEN", Some("  ")),
                ("ANTHROPIC_API_KEY", Some("test-api-key")),
            ],
            || {
                let credential = claude_credential().unwrap();
                assert_eq!(credential.token, "test-api-key");
            },
        );
    }

    #[test]
    fn test_no_auth() {
        with_env_vars(
            &[
                ("CLAUDE_CODE_OAUTH_TOKEN", None),
                ("ANTHROPIC_API_KEY", None),
                ("OPENAI_API_KEY", None),
            ],
            || {
                assert!(matches!(claude_credential(), Err(ForemanError::Auth(_))));
                assert!(matches!(codex_credential(), Err(ForemanError::Auth(_))));
            },
        );
    }

    #[test]
    fn test_debug_redacts_token() {
        let credential = Credential {
            source: CredentialSource::OpenAiApiKey,
            token: "sk-secret".into(),
        };
        assert!(!format!("{:?}", credential).contains("sk-secret"));
    }
}
