//! Claude backend driven through the `claude` CLI in stream-json mode

use async_trait::async_trait;
use foreman_core::Result;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, info, instrument};

use crate::auth;
use crate::process::run_json_lines;
use crate::provider::{Provider, ProviderStream};
use crate::types::{ProviderEvent, QueryOptions, ResultErrorKind, RoutingHints};

/// Events of `claude -p --output-format stream-json --verbose`
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClaudeLine {
    System {},
    Assistant {
        #[serde(default)]
        message: Option<AssistantMessage>,
    },
    User {},
    Result {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        structured_output: Option<Value>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    ToolUse {
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

/// Map one stream-json line to provider events
fn parse_line(line: &str) -> Vec<ProviderEvent> {
    let parsed: ClaudeLine = match serde_json::from_str(line) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!("Skipping unparseable claude line: {}", e);
            return Vec::new();
        }
    };

    match parsed {
        ClaudeLine::Assistant { message } => message
            .map(|m| m.content)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } if !text.is_empty() => {
                    Some(ProviderEvent::AssistantText { text })
                }
                ContentBlock::Thinking { thinking } if !thinking.is_empty() => {
                    Some(ProviderEvent::Thinking { text: thinking })
                }
                ContentBlock::ToolUse { name, input } => Some(ProviderEvent::ToolUse { name, input }),
                _ => None,
            })
            .collect(),
        ClaudeLine::Result {
            subtype,
            result,
            is_error,
            structured_output,
        } => {
            let message = result.unwrap_or_default();
            let event = match subtype.as_deref() {
                Some("success") if !is_error => ProviderEvent::ResultSuccess {
                    result: message,
                    structured_output,
                },
                Some("error_max_turns") => {
                    ProviderEvent::error(ResultErrorKind::MaxTurnsReached, or_default(message, "Maximum turns reached"))
                }
                Some("error_max_structured_output_retries") => ProviderEvent::error(
                    ResultErrorKind::StructuredOutputRetriesExhausted,
                    or_default(message, "Could not produce valid structured output"),
                ),
                other => ProviderEvent::error(
                    ResultErrorKind::ExecutionError,
                    or_default(message, &format!("Execution failed ({})", other.unwrap_or("unknown"))),
                ),
            };
            vec![event]
        }
        ClaudeLine::System {} | ClaudeLine::User {} | ClaudeLine::Unknown => Vec::new(),
    }
}

fn or_default(message: String, fallback: &str) -> String {
    if message.trim().is_empty() {
        fallback.to_string()
    } else {
        message
    }
}

/// Provider backed by the `claude` CLI
#[derive(Debug, Clone)]
pub struct ClaudeProvider {
    program: PathBuf,
    routing: RoutingHints,
}

impl Default for ClaudeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ClaudeProvider {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("claude"),
            routing: RoutingHints::default(),
        }
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Default routing, used when a query carries none (e.g. a router endpoint)
    pub fn with_routing(mut self, routing: RoutingHints) -> Self {
        self.routing = routing;
        self
    }

    fn command(&self, options: &QueryOptions) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.current_dir(&options.cwd)
            .arg("-p")
            .args(["--output-format", "stream-json", "--verbose"])
            .arg("--model")
            .arg(&options.model)
            .arg("--max-turns")
            .arg(options.max_turns.to_string());

        if !options.allowed_tools.is_empty() {
            cmd.arg("--allowedTools").arg(options.allowed_tools.join(","));
        }
        if let Some(system_prompt) = &options.system_prompt {
            cmd.arg("--append-system-prompt").arg(system_prompt);
        }
        if let Some(schema) = &options.output_schema {
            cmd.arg("--json-schema").arg(schema.to_string());
        }

        let routing = if options.routing.is_empty() {
            &self.routing
        } else {
            &options.routing
        };
        if let Some(base_url) = &routing.base_url {
            cmd.env("ANTHROPIC_BASE_URL", base_url);
        }
        if let Some(token) = &routing.auth_token {
            cmd.env("ANTHROPIC_AUTH_TOKEN", token);
        }

        cmd
    }
}

/// Prompt text with image attachments referenced by path
fn render_prompt(options: &QueryOptions) -> String {
    let mut prompt = options.prompt.text();
    let images = options.prompt.images();
    if !images.is_empty() {
        prompt.push_str("\n\nAttached images (open them with the Read tool):\n");
        for image in images {
            prompt.push_str(&format!("- {}\n", image.display()));
        }
    }
    prompt
}

#[async_trait]
impl Provider for ClaudeProvider {
    fn name(&self) -> &str {
        "claude"
    }

    #[instrument(skip(self, options), fields(model = %options.model, cwd = %options.cwd.display()))]
    async fn execute_query(&self, options: QueryOptions) -> Result<ProviderStream> {
        info!("Starting claude query");
        let cmd = self.command(&options);
        let input = render_prompt(&options);
        Ok(run_json_lines("claude", cmd, input, options.cancel.clone(), parse_line))
    }

    fn check_auth(&self) -> Result<()> {
        if self.routing.auth_token.is_some() {
            return Ok(());
        }
        auth::claude_credential().map(|_| ())
    }
}
