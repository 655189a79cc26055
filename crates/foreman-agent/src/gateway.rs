//! Model resolution and provider routing

use foreman_core::{GlobalSettings, Result};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::auth;
use crate::claude::ClaudeProvider;
use crate::codex::CodexProvider;
use crate::provider::{Provider, ProviderStream};
use crate::types::{ClaudeModel, QueryOptions, RoutingHints};

/// Backend family a model routes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Claude,
    Codex,
}

/// Backend plus the model id it receives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModel {
    pub provider: ProviderKind,
    pub model: String,
}

const CODEX_PREFIX: &str = "codex-";

/// Resolve a user-facing model name by prefix
///
/// `codex-*`, `gpt-*`, `o3*` and `o4*` go to Codex (`codex-` is stripped);
/// everything else goes to Claude, with `opus`/`sonnet`/`haiku` expanded.
pub fn resolve_model(model: &str) -> ResolvedModel {
    let model = model.trim();

    if let Some(rest) = model.strip_prefix(CODEX_PREFIX) {
        return ResolvedModel {
            provider: ProviderKind::Codex,
            model: rest.to_string(),
        };
    }

    if model.starts_with("gpt-") || model.starts_with("o3") || model.starts_with("o4") {
        return ResolvedModel {
            provider: ProviderKind::Codex,
            model: model.to_string(),
        };
    }

    let model = match model.parse::<ClaudeModel>() {
        Ok(alias) => alias.api_name().to_string(),
        Err(_) => model.to_string(),
    };
    ResolvedModel {
        provider: ProviderKind::Claude,
        model,
    }
}

/// Uniform entry point over every backend
#[derive(Clone)]
pub struct ProviderGateway {
    claude: Arc<dyn Provider>,
    codex: Arc<dyn Provider>,
}

impl ProviderGateway {
    pub fn new(claude: Arc<dyn Provider>, codex: Arc<dyn Provider>) -> Self {
        Self { claude, codex }
    }

    /// Route every model to one provider (tests, single-backend setups)
    pub fn uniform(provider: Arc<dyn Provider>) -> Self {
        Self {
            claude: provider.clone(),
            codex: provider,
        }
    }

    /// CLI-backed gateway; `ccr_enabled` points Claude at the router
    pub fn from_settings(settings: &GlobalSettings) -> Self {
        let mut claude = ClaudeProvider::new();
        if settings.ccr_enabled {
            debug!(endpoint = %settings.ccr_endpoint, "Routing Claude through CCR");
            claude = claude.with_routing(RoutingHints {
                base_url: Some(settings.ccr_endpoint.clone()),
                auth_token: auth::token_from_env(&settings.ccr_api_key_env),
            });
        }

        Self::new(Arc::new(claude), Arc::new(CodexProvider::new()))
    }

    /// Provider that serves `model`
    pub fn provider_for(&self, model: &str) -> &Arc<dyn Provider> {
        match resolve_model(model).provider {
            ProviderKind::Claude => &self.claude,
            ProviderKind::Codex => &self.codex,
        }
    }

    /// Credential preflight for the backend serving `model`
    pub fn check_auth(&self, model: &str) -> Result<()> {
        self.provider_for(model).check_auth()
    }

    /// Resolve the model and start the query on its backend
    ///
    /// No retries happen here.
    #[instrument(skip(self, options), fields(model = %options.model))]
    pub async fn execute_query(&self, mut options: QueryOptions) -> Result<ProviderStream> {
        let resolved = resolve_model(&options.model);
        let provider = self.provider_for(&options.model);
        debug!(provider = provider.name(), resolved = %resolved.model, "Routing query");

        options.model = resolved.model;
        provider.execute_query(options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedProvider;
    use crate::types::ProviderEvent;
    use futures::StreamExt;

    #[test]
    fn test_codex_prefixes() {
        assert_eq!(
            resolve_model("codex-gpt-5.1-codex"),
            ResolvedModel {
                provider: ProviderKind::Codex,
                model: "gpt-5.1-codex".into()
            }
        );
        assert_eq!(resolve_model("gpt-5").provider, ProviderKind::Codex);
        assert_eq!(resolve_model("o3").provider, ProviderKind::Codex);
        assert_eq!(resolve_model("o4-mini").model, "o4-mini");
    }

    #[test]
    fn test_claude_aliases_and_fallback() {
        assert_eq!(resolve_model("opus").model, ClaudeModel::Opus.api_name());
        assert_eq!(resolve_model("Sonnet").model, ClaudeModel::Sonnet.api_name());

        let full = resolve_model("claude-3-7-sonnet-latest");
        assert_eq!(full.provider, ProviderKind::Claude);
        assert_eq!(full.model, "claude-3-7-sonnet-latest");

        assert_eq!(resolve_model("mystery-model").provider, ProviderKind::Claude);
    }

    #[tokio::test]
    async fn test_gateway_routes_and_rewrites_model() {
        let claude = Arc::new(ScriptedProvider::named("claude-fake").with_default(vec![
            Ok(ProviderEvent::success("from claude")),
        ]));
        let codex = Arc::new(ScriptedProvider::named("codex-fake").with_default(vec![
            Ok(ProviderEvent::success("from codex")),
        ]));
        let gateway = ProviderGateway::new(claude.clone(), codex.clone());

        let events: Vec<_> = gateway
            .execute_query(QueryOptions::new("codex-o4-mini", "hi", "/tmp"))
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(events[0].as_ref().unwrap(), &ProviderEvent::success("from codex"));
        assert_eq!(codex.queries()[0].model, "o4-mini");
        assert!(claude.queries().is_empty());

        gateway
            .execute_query(QueryOptions::new("haiku", "hi", "/tmp"))
            .await
            .unwrap()
            .collect::<Vec<_>>()
            .await;
        assert_eq!(claude.queries()[0].model, ClaudeModel::Haiku.api_name());
    }

    #[test]
    fn test_check_auth_routes_by_model() {
        let claude = Arc::new(ScriptedProvider::named("claude-fake"));
        let codex = Arc::new(ScriptedProvider::named("codex-fake").without_credentials("no key"));
        let gateway = ProviderGateway::new(claude, codex);

        assert!(gateway.check_auth("sonnet").is_ok());
        let err = gateway.check_auth("gpt-5").unwrap_err();
        assert!(err.to_string().contains("no key"));
    }

    #[test]
    fn test_from_settings_uses_router() {
        let settings = GlobalSettings {
            ccr_enabled: true,
            ..Default::default()
        };
        let gateway = ProviderGateway::from_settings(&settings);
        assert_eq!(gateway.provider_for("sonnet").name(), "claude");
        assert_eq!(gateway.provider_for("gpt-5").name(), "codex");
    }
}
