//! Type definitions for provider queries and events

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Claude model aliases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaudeModel {
    Opus,
    #[default]
    Sonnet,
    Haiku,
}

impl ClaudeModel {
    /// Full model id passed to the backend
    pub fn api_name(&self) -> &'static str {
        match self {
            ClaudeModel::Opus => "claude-opus-4-5-20251101",
            ClaudeModel::Sonnet => "claude-sonnet-4-5-20250929",
            ClaudeModel::Haiku => "claude-haiku-4-5-20251001",
        }
    }
}

impl std::fmt::Display for ClaudeModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClaudeModel::Opus => write!(f, "opus"),
            ClaudeModel::Sonnet => write!(f, "sonnet"),
            ClaudeModel::Haiku => write!(f, "haiku"),
        }
    }
}

impl std::str::FromStr for ClaudeModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "opus" => Ok(ClaudeModel::Opus),
            "sonnet" => Ok(ClaudeModel::Sonnet),
            "haiku" => Ok(ClaudeModel::Haiku),
            _ => Err(format!("Invalid model alias: {}. Use opus, sonnet, or haiku.", s)),
        }
    }
}

/// Why a query ended without success
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultErrorKind {
    /// Turn cap hit; the partial output is still usable
    MaxTurnsReached,
    /// The backend gave up producing schema-conforming output
    StructuredOutputRetriesExhausted,
    ExecutionError,
}

impl std::fmt::Display for ResultErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::MaxTurnsReached => "max turns reached",
            Self::StructuredOutputRetriesExhausted => "structured output retries exhausted",
            Self::ExecutionError => "execution error",
        };
        f.write_str(s)
    }
}

/// One event of a provider stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderEvent {
    AssistantText { text: String },
    ToolUse { name: String, input: Value },
    Thinking { text: String },
    ResultSuccess {
        result: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        structured_output: Option<Value>,
    },
    ResultError { subtype: ResultErrorKind, message: String },
}

impl ProviderEvent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::AssistantText { text: text.into() }
    }

    pub fn tool_use(name: impl Into<String>, input: Value) -> Self {
        Self::ToolUse {
            name: name.into(),
            input,
        }
    }

    pub fn success(result: impl Into<String>) -> Self {
        Self::ResultSuccess {
            result: result.into(),
            structured_output: None,
        }
    }

    pub fn error(subtype: ResultErrorKind, message: impl Into<String>) -> Self {
        Self::ResultError {
            subtype,
            message: message.into(),
        }
    }

    /// Result events end the stream
    pub fn is_result(&self) -> bool {
        matches!(self, Self::ResultSuccess { .. } | Self::ResultError { .. })
    }
}

/// One part of a multi-part prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PromptPart {
    Text { text: String },
    Image { path: PathBuf },
}

/// Prompt text, optionally with image attachments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Prompt {
    Text(String),
    Parts(Vec<PromptPart>),
}

impl Prompt {
    /// Concatenated text parts
    pub fn text(&self) -> String {
        match self {
            Prompt::Text(text) => text.clone(),
            Prompt::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    PromptPart::Text { text } => Some(text.as_str()),
                    PromptPart::Image { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n\n"),
        }
    }

    pub fn images(&self) -> Vec<&PathBuf> {
        match self {
            Prompt::Text(_) => Vec::new(),
            Prompt::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    PromptPart::Image { path } => Some(path),
                    PromptPart::Text { .. } => None,
                })
                .collect(),
        }
    }
}

impl From<String> for Prompt {
    fn from(text: String) -> Self {
        Prompt::Text(text)
    }
}

impl From<&str> for Prompt {
    fn from(text: &str) -> Self {
        Prompt::Text(text.to_string())
    }
}

/// Alternate endpoint and credentials for a backend
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingHints {
    pub base_url: Option<String>,
    pub auth_token: Option<String>,
}

impl RoutingHints {
    pub fn is_empty(&self) -> bool {
        self.base_url.is_none() && self.auth_token.is_none()
    }
}

/// Everything a provider needs to run one query
#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub model: String,
    pub prompt: Prompt,
    pub cwd: PathBuf,
    pub system_prompt: Option<String>,
    pub allowed_tools: Vec<String>,
    pub max_turns: u32,
    /// JSON schema the final result must conform to
    pub output_schema: Option<Value>,
    pub cancel: CancellationToken,
    pub routing: RoutingHints,
}

impl QueryOptions {
    pub fn new(model: impl Into<String>, prompt: impl Into<Prompt>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            cwd: cwd.into(),
            system_prompt: None,
            allowed_tools: Vec::new(),
            max_turns: 100,
            output_schema: None,
            cancel: CancellationToken::new(),
            routing: RoutingHints::default(),
        }
    }

    pub fn with_allowed_tools(mut self, tools: Vec<String>) -> Self {
        self.allowed_tools = tools;
        self
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_routing(mut self, routing: RoutingHints) -> Self {
        self.routing = routing;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_alias_parsing() {
        assert_eq!("Opus".parse::<ClaudeModel>().unwrap(), ClaudeModel::Opus);
        assert!("gpt-5".parse::<ClaudeModel>().is_err());
        assert!(ClaudeModel::Haiku.api_name().starts_with("claude-haiku"));
    }

    #[test]
    fn test_multipart_prompt() {
        let prompt = Prompt::Parts(vec![
            PromptPart::Text {
                text: "Fix the header".into(),
            },
            PromptPart::Image {
                path: PathBuf::from("/tmp/shot.png"),
            },
            PromptPart::Text {
                text: "Keep it small".into(),
            },
        ]);
        assert_eq!(prompt.text(), "Fix the header\n\nKeep it small");
        assert_eq!(prompt.images(), vec![&PathBuf::from("/tmp/shot.png")]);
    }

    #[test]
    fn test_result_events_are_terminal() {
        assert!(ProviderEvent::success("done").is_result());
        assert!(ProviderEvent::error(ResultErrorKind::MaxTurnsReached, "x").is_result());
        assert!(!ProviderEvent::text("hi").is_result());
    }
}
