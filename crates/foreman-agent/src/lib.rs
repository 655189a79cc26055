//! # foreman-agent
//!
//! Provider gateway for AI coding agents.
//!
//! Every backend (the `claude` CLI, the `codex` CLI, scripted test doubles)
//! implements [`Provider`] and yields the same [`ProviderEvent`] stream. The
//! [`ProviderGateway`] resolves a model name to a backend and forwards the
//! query.

pub mod auth;
mod claude;
mod codex;
mod gateway;
mod process;
mod provider;
mod scripted;
mod types;

pub use claude::ClaudeProvider;
pub use codex::CodexProvider;
pub use gateway::{resolve_model, ProviderGateway, ProviderKind, ResolvedModel};
pub use provider::{Provider, ProviderStream};
pub use scripted::{ScriptItem, ScriptedProvider};
pub use types::{
    ClaudeModel, Prompt, PromptPart, ProviderEvent, QueryOptions, ResultErrorKind, RoutingHints,
};
