//! Codex backend driven through `codex exec --json`

use async_trait::async_trait;
use foreman_core::Result;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, info, instrument};

use crate::auth;
use crate::process::run_json_lines;
use crate::provider::{Provider, ProviderStream};
use crate::types::{ProviderEvent, QueryOptions, ResultErrorKind};

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum CodexLine {
    #[serde(rename = "item.completed")]
    ItemCompleted { item: CodexItem },
    #[serde(rename = "turn.completed")]
    TurnCompleted {},
    #[serde(rename = "turn.failed")]
    TurnFailed {
        #[serde(default)]
        error: Option<CodexError>,
    },
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        message: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CodexItem {
    AgentMessage {
        #[serde(default)]
        text: String,
    },
    Reasoning {
        #[serde(default)]
        text: String,
    },
    CommandExecution {
        #[serde(default)]
        command: String,
        #[serde(default)]
        exit_code: Option<i64>,
    },
    FileChange {
        #[serde(default)]
        changes: Vec<Value>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct CodexError {
    #[serde(default)]
    message: String,
}

/// Stateful line parser; the final agent message becomes the result text
struct CodexParser {
    last_message: String,
    expect_json: bool,
}

impl CodexParser {
    fn new(expect_json: bool) -> Self {
        Self {
            last_message: String::new(),
            expect_json,
        }
    }

    fn parse(&mut self, line: &str) -> Vec<ProviderEvent> {
        let parsed: CodexLine = match serde_json::from_str(line) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!("Skipping unparseable codex line: {}", e);
                return Vec::new();
            }
        };

        match parsed {
            CodexLine::ItemCompleted { item } => match item {
                CodexItem::AgentMessage { text } if !text.is_empty() => {
                    self.last_message = text.clone();
                    vec![ProviderEvent::AssistantText { text }]
                }
                CodexItem::Reasoning { text } if !text.is_empty() => {
                    vec![ProviderEvent::Thinking { text }]
                }
                CodexItem::CommandExecution { command, exit_code } => vec![ProviderEvent::tool_use(
                    "Bash",
                    json!({ "command": command, "exit_code": exit_code }),
                )],
                CodexItem::FileChange { changes } => {
                    vec![ProviderEvent::tool_use("Edit", json!({ "changes": changes }))]
                }
                _ => Vec::new(),
            },
            CodexLine::TurnCompleted {} => vec![self.finish()],
            CodexLine::TurnFailed { error } => vec![ProviderEvent::error(
                ResultErrorKind::ExecutionError,
                error
                    .map(|e| e.message)
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| "Codex turn failed".to_string()),
            )],
            CodexLine::Error { message } => {
                // Reconnect notices arrive as `error` lines mid-turn
                if message.to_lowercase().contains("reconnecting") {
                    debug!("codex: {}", message);
                    Vec::new()
                } else {
                    vec![ProviderEvent::error(ResultErrorKind::ExecutionError, message)]
                }
            }
            CodexLine::Unknown => Vec::new(),
        }
    }

    fn finish(&mut self) -> ProviderEvent {
        let result = std::mem::take(&mut self.last_message);
        if !self.expect_json {
            return ProviderEvent::success(result);
        }

        match serde_json::from_str::<Value>(strip_fences(&result)) {
            Ok(value) => ProviderEvent::ResultSuccess {
                result,
                structured_output: Some(value),
            },
            Err(e) => ProviderEvent::error(
                ResultErrorKind::StructuredOutputRetriesExhausted,
                format!("Final message is not valid JSON: {}", e),
            ),
        }
    }
}

fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

/// Provider backed by the `codex` CLI
#[derive(Debug, Clone)]
pub struct CodexProvider {
    program: PathBuf,
}

impl Default for CodexProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl CodexProvider {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("codex"),
        }
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    fn command(&self, options: &QueryOptions) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.current_dir(&options.cwd)
            .args(["exec", "--json", "--skip-git-repo-check", "--full-auto"])
            .arg("--model")
            .arg(&options.model);

        for image in options.prompt.images() {
            cmd.arg("--image").arg(image);
        }
        if let Some(base_url) = &options.routing.base_url {
            cmd.env("OPENAI_BASE_URL", base_url);
        }
        if let Some(token) = &options.routing.auth_token {
            cmd.env("OPENAI_API_KEY", token);
        }

        // Prompt is read from stdin
        cmd.arg("-");
        cmd
    }
}

fn render_prompt(options: &QueryOptions) -> String {
    let mut prompt = String::new();
    if let Some(system_prompt) = &options.system_prompt {
        prompt.push_str(system_prompt);
        prompt.push_str("\n\n");
    }
    prompt.push_str(&options.prompt.text());
    if let Some(schema) = &options.output_schema {
        prompt.push_str("\n\nReply with a single JSON document matching this schema and nothing else:\n");
        prompt.push_str(&schema.to_string());
    }
    prompt
}

#[async_trait]
impl Provider for CodexProvider {
    fn name(&self) -> &str {
        "codex"
    }

    #[instrument(skip(self, options), fields(model = %options.model, cwd = %options.cwd.display()))]
    async fn execute_query(&self, options: QueryOptions) -> Result<ProviderStream> {
        info!("Starting codex query");
        let cmd = self.command(&options);
        let input = render_prompt(&options);
        let mut parser = CodexParser::new(options.output_schema.is_some());
        Ok(run_json_lines(
            "codex",
            cmd,
            input,
            options.cancel.clone(),
            move |line| parser.parse(line),
        ))
    }

    fn check_auth(&self) -> Result<()> {
        auth::codex_credential().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_turn() {
        let mut parser = CodexParser::new(false);

        assert!(parser.parse(r#"{"type":"thread.started","thread_id":"t"}"#).is_empty());
        assert_eq!(
            parser.parse(r#"{"type":"item.completed","item":{"id":"0","type":"reasoning","text":"Planning"}}"#),
            vec![ProviderEvent::Thinking { text: "Planning".into() }]
        );

        let tool = parser.parse(
            r#"{"type":"item.completed","item":{"id":"1","type":"command_execution","command":"ls","exit_code":0,"status":"completed"}}"#,
        );
        assert!(matches!(&tool[0], ProviderEvent::ToolUse { name, input } if name == "Bash" && input["command"] == "ls"));

        parser.parse(r#"{"type":"item.completed","item":{"id":"2","type":"agent_message","text":"Implemented it"}}"#);
        assert_eq!(
            parser.parse(r#"{"type":"turn.completed","usage":{"input_tokens":1}}"#),
            vec![ProviderEvent::success("Implemented it")]
        );
    }

    #[test]
    fn test_parse_failures() {
        let mut parser = CodexParser::new(false);

        let failed = parser.parse(r#"{"type":"turn.failed","error":{"message":"quota exceeded"}}"#);
        assert_eq!(
            failed,
            vec![ProviderEvent::error(ResultErrorKind::ExecutionError, "quota exceeded")]
        );

        assert!(parser
            .parse(r#"{"type":"error","message":"Reconnecting... 1/5"}"#)
            .is_empty());
        assert_eq!(parser.parse(r#"{"type":"error","message":"fatal"}"#).len(), 1);
    }

    #[test]
    fn test_structured_output() {
        let mut parser = CodexParser::new(true);
        parser.parse(
            r#"{"type":"item.completed","item":{"type":"agent_message","text":"```json\n{\"ok\":true}\n```"}}"#,
        );
        let events = parser.parse(r#"{"type":"turn.completed"}"#);
        assert!(matches!(
            &events[0],
            ProviderEvent::ResultSuccess { structured_output: Some(v), .. } if v["ok"] == true
        ));

        parser.parse(r#"{"type":"item.completed","item":{"type":"agent_message","text":"not json"}}"#);
        let events = parser.parse(r#"{"type":"turn.completed"}"#);
        assert!(matches!(
            &events[0],
            ProviderEvent::ResultError { subtype: ResultErrorKind::StructuredOutputRetriesExhausted, .. }
        ));
    }

    #[test]
    fn test_render_prompt_includes_schema() {
        let options = QueryOptions::new("gpt-5", "Summarize", "/tmp")
            .with_output_schema(json!({"type": "object"}));
        let prompt = render_prompt(&options);
        assert!(prompt.starts_with("Summarize"));
        assert!(prompt.contains(r#"{"type":"object"}"#));
    }
}
