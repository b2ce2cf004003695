//! Codex CLI adapter (`codex exec --json`).

use super::process::{run_streaming, StreamParser};
use super::{fallback_from_chain, ProviderAdapter, ProviderCommand, ProviderInput, Result};
use async_trait::async_trait;
use serde_json::Value;
use steploop_core::{ProviderEvent, ProviderExecutionResult};
use tracing::debug;

const MODELS: &[&str] = &["gpt-5-codex", "gpt-5", "o4-mini"];

const FALLBACK_CHAIN: &[&str] = &["gpt-5-codex", "gpt-5", "o4-mini"];

const THINKING_LEVELS: &[&str] = &["minimal", "low", "medium", "high"];

#[derive(Debug, Clone, Copy, Default)]
pub struct CodexAdapter;

#[async_trait]
impl ProviderAdapter for CodexAdapter {
    fn id(&self) -> &'static str {
        "codex"
    }

    fn name(&self) -> &'static str {
        "Codex CLI"
    }

    fn executable(&self) -> &'static str {
        "codex"
    }

    fn models(&self) -> &'static [&'static str] {
        MODELS
    }

    fn thinking_levels(&self) -> &'static [&'static str] {
        THINKING_LEVELS
    }

    /// `codex exec` has no turn limit and resumes through a separate
    /// subcommand, so `max_turns` and `resume_session_id` are not rendered.
    fn build_command(&self, input: &ProviderInput) -> ProviderCommand {
        if input.max_turns.is_some() || input.resume_session_id.is_some() {
            debug!("codex ignores max_turns and resume_session_id");
        }
        let mut args: Vec<String> = [
            "exec",
            "--json",
            "--skip-git-repo-check",
            "--sandbox",
            "danger-full-access",
        ]
        .iter()
        .map(ToString::to_string)
        .collect();
        if !input.model.is_empty() {
            args.push("-m".to_string());
            args.push(input.model.clone());
        }
        if let Some(level) = &input.thinking {
            args.push("-c".to_string());
            args.push(format!("model_reasoning_effort={level}"));
        }
        args.push(input.prompt.clone());

        ProviderCommand {
            program: self.executable().to_string(),
            args,
            env: Vec::new(),
            workdir: input.workdir.clone(),
        }
    }

    async fn execute(&self, input: &ProviderInput) -> Result<ProviderExecutionResult> {
        let command = self.build_command(input);
        run_streaming(&command, input, CodexStreamParser::default()).await
    }

    fn fallback_models(&self, requested: &str) -> Vec<String> {
        fallback_from_chain(FALLBACK_CHAIN, requested)
    }
}

/// Parser for `codex exec --json` output.
///
/// The stream is thread/turn/item lifecycle records; items carry the agent's
/// messages, reasoning, and command executions.
#[derive(Debug, Default)]
pub struct CodexStreamParser {
    thread_id: Option<String>,
    last_message: String,
    failed: bool,
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

fn error_message(value: &Value) -> String {
    value
        .pointer("/error/message")
        .and_then(Value::as_str)
        .or_else(|| str_field(value, "message"))
        .unwrap_or("error")
        .to_string()
}

impl CodexStreamParser {
    fn item_started(item: &Value) -> Option<ProviderEvent> {
        match str_field(item, "type")? {
            "command_execution" => Some(ProviderEvent::ToolCall {
                name: "command".to_string(),
                input: str_field(item, "command").unwrap_or_default().to_string(),
            }),
            "mcp_tool_call" => Some(ProviderEvent::ToolCall {
                name: str_field(item, "tool").unwrap_or("mcp").to_string(),
                input: item.get("arguments").map(Value::to_string).unwrap_or_default(),
            }),
            _ => None,
        }
    }

    fn item_completed(&mut self, item: &Value) -> Option<ProviderEvent> {
        match str_field(item, "type")? {
            "agent_message" => {
                let text = str_field(item, "text").unwrap_or_default().to_string();
                self.last_message.clone_from(&text);
                Some(ProviderEvent::AssistantText { text })
            }
            "reasoning" => Some(ProviderEvent::Thinking {
                text: str_field(item, "text").unwrap_or_default().to_string(),
            }),
            "command_execution" => Some(ProviderEvent::ToolResult {
                name: Some("command".to_string()),
                output: str_field(item, "aggregated_output")
                    .unwrap_or_default()
                    .to_string(),
                is_error: item
                    .get("exit_code")
                    .and_then(Value::as_i64)
                    .is_some_and(|code| code != 0)
                    || str_field(item, "status") == Some("failed"),
            }),
            "mcp_tool_call" => Some(ProviderEvent::ToolResult {
                name: str_field(item, "tool").map(ToString::to_string),
                output: item.get("result").map(Value::to_string).unwrap_or_default(),
                is_error: str_field(item, "status") == Some("failed"),
            }),
            "file_change" => {
                let paths: Vec<&str> = item
                    .get("changes")
                    .and_then(Value::as_array)
                    .map(|changes| changes.iter().filter_map(|c| str_field(c, "path")).collect())
                    .unwrap_or_default();
                Some(ProviderEvent::ToolResult {
                    name: Some("file_change".to_string()),
                    output: paths.join("\n"),
                    is_error: str_field(item, "status") == Some("failed"),
                })
            }
            "error" => Some(ProviderEvent::Error {
                message: str_field(item, "message").unwrap_or("error").to_string(),
            }),
            _ => None,
        }
    }
}

impl StreamParser for CodexStreamParser {
    fn parse_line(&mut self, line: &str) -> Vec<ProviderEvent> {
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            return Vec::new();
        };
        let event = match str_field(&value, "type") {
            Some("thread.started") => {
                self.thread_id = str_field(&value, "thread_id").map(ToString::to_string);
                Some(ProviderEvent::Status {
                    message: "thread.started".to_string(),
                })
            }
            Some("turn.completed") => Some(ProviderEvent::Status {
                message: "turn.completed".to_string(),
            }),
            Some("turn.failed") | Some("error") => {
                self.failed = true;
                Some(ProviderEvent::Error {
                    message: error_message(&value),
                })
            }
            Some("item.started") => value.get("item").and_then(Self::item_started),
            Some("item.completed") => match value.get("item") {
                Some(item) => self.item_completed(item),
                None => None,
            },
            _ => None,
        };
        event.into_iter().collect()
    }

    fn final_text(&self) -> String {
        self.last_message.clone()
    }

    fn session_id(&self) -> Option<String> {
        self.thread_id.clone()
    }

    fn failed(&self) -> bool {
        self.failed
    }
}
