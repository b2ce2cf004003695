//! Claude Code CLI adapter (`claude -p --output-format stream-json`).

use super::process::{run_streaming, StreamParser};
use super::{fallback_from_chain, ProviderAdapter, ProviderCommand, ProviderInput, Result};
use async_trait::async_trait;
use serde_json::Value;
use steploop_core::{ProviderEvent, ProviderExecutionResult};

const MODELS: &[&str] = &["opus", "sonnet", "haiku"];

const FALLBACK_CHAIN: &[&str] = &["opus", "sonnet", "haiku"];

const THINKING_LEVELS: &[&str] = &["off", "low", "medium", "high"];

/// Thinking level to `MAX_THINKING_TOKENS`. Numeric levels pass through.
fn thinking_tokens(level: &str) -> String {
    match level {
        "off" => "0".to_string(),
        "low" => "4000".to_string(),
        "medium" => "10000".to_string(),
        "high" => "31999".to_string(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ClaudeAdapter;

#[async_trait]
impl ProviderAdapter for ClaudeAdapter {
    fn id(&self) -> &'static str {
        "claude"
    }

    fn name(&self) -> &'static str {
        "Claude Code"
    }

    fn executable(&self) -> &'static str {
        "claude"
    }

    fn models(&self) -> &'static [&'static str] {
        MODELS
    }

    fn thinking_levels(&self) -> &'static [&'static str] {
        THINKING_LEVELS
    }

    fn build_command(&self, input: &ProviderInput) -> ProviderCommand {
        let mut args: Vec<String> = [
            "-p",
            "--verbose",
            "--dangerously-skip-permissions",
            "--output-format",
            "stream-json",
        ]
        .iter()
        .map(ToString::to_string)
        .collect();
        if !input.model.is_empty() {
            args.push("--model".to_string());
            args.push(input.model.clone());
        }
        if let Some(turns) = input.max_turns {
            args.push("--max-turns".to_string());
            args.push(turns.to_string());
        }
        if let Some(session) = &input.resume_session_id {
            args.push("--resume".to_string());
            args.push(session.clone());
        }
        args.push(input.prompt.clone());

        let env = input
            .thinking
            .as_deref()
            .map(|level| vec![("MAX_THINKING_TOKENS".to_string(), thinking_tokens(level))])
            .unwrap_or_default();

        ProviderCommand {
            program: self.executable().to_string(),
            args,
            env,
            workdir: input.workdir.clone(),
        }
    }

    async fn execute(&self, input: &ProviderInput) -> Result<ProviderExecutionResult> {
        let command = self.build_command(input);
        run_streaming(&command, input, ClaudeStreamParser::default()).await
    }

    fn fallback_models(&self, requested: &str) -> Vec<String> {
        fallback_from_chain(FALLBACK_CHAIN, requested)
    }
}

/// Parser for Claude's `stream-json` output.
///
/// Lines are whole messages: `system` (init), `assistant` and `user`
/// (content blocks), and a closing `result`.
#[derive(Debug, Default)]
pub struct ClaudeStreamParser {
    session_id: Option<String>,
    model: Option<String>,
    result_text: Option<String>,
    last_text: String,
    failed: bool,
}

impl ClaudeStreamParser {
    fn content_blocks(value: &Value) -> &[Value] {
        value
            .pointer("/message/content")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

/// Tool result content is either a string or a list of text blocks.
fn tool_result_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter_map(|b| str_field(b, "text"))
            .collect::<Vec<_>>()
            .join("\n"),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

impl StreamParser for ClaudeStreamParser {
    fn parse_line(&mut self, line: &str) -> Vec<ProviderEvent> {
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            return Vec::new();
        };
        if let Some(session) = str_field(&value, "session_id") {
            self.session_id = Some(session.to_string());
        }

        let mut events = Vec::new();
        match str_field(&value, "type") {
            Some("system") => {
                if let Some(model) = str_field(&value, "model") {
                    self.model = Some(model.to_string());
                }
                let subtype = str_field(&value, "subtype").unwrap_or("system");
                events.push(ProviderEvent::Status {
                    message: subtype.to_string(),
                });
            }
            Some("assistant") => {
                for block in Self::content_blocks(&value) {
                    match str_field(block, "type") {
                        Some("text") => {
                            let text = str_field(block, "text").unwrap_or_default().to_string();
                            self.last_text.clone_from(&text);
                            events.push(ProviderEvent::AssistantText { text });
                        }
                        Some("thinking") => events.push(ProviderEvent::Thinking {
                            text: str_field(block, "thinking").unwrap_or_default().to_string(),
                        }),
                        Some("tool_use") => events.push(ProviderEvent::ToolCall {
                            name: str_field(block, "name").unwrap_or("tool").to_string(),
                            input: block.get("input").map(Value::to_string).unwrap_or_default(),
                        }),
                        _ => {}
                    }
                }
            }
            Some("user") => {
                for block in Self::content_blocks(&value) {
                    if str_field(block, "type") == Some("tool_result") {
                        events.push(ProviderEvent::ToolResult {
                            name: str_field(block, "tool_use_id").map(ToString::to_string),
                            output: tool_result_text(block.get("content")),
                            is_error: block
                                .get("is_error")
                                .and_then(Value::as_bool)
                                .unwrap_or(false),
                        });
                    }
                }
            }
            Some("result") => {
                let text = str_field(&value, "result").unwrap_or_default().to_string();
                let is_error = value
                    .get("is_error")
                    .and_then(Value::as_bool)
                    .unwrap_or(false)
                    || str_field(&value, "subtype").is_some_and(|s| s.starts_with("error"));
                if is_error {
                    self.failed = true;
                    let message = if text.is_empty() {
                        str_field(&value, "subtype").unwrap_or("error").to_string()
                    } else {
                        text.clone()
                    };
                    events.push(ProviderEvent::Error { message });
                } else {
                    events.push(ProviderEvent::Status {
                        message: "result".to_string(),
                    });
                }
                self.result_text = Some(text);
            }
            Some("error") => {
                self.failed = true;
                let message = value
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .or_else(|| str_field(&value, "message"))
                    .unwrap_or("error")
                    .to_string();
                events.push(ProviderEvent::Error { message });
            }
            _ => {}
        }
        events
    }

    fn final_text(&self) -> String {
        match &self.result_text {
            Some(text) if !text.trim().is_empty() && !self.failed => text.clone(),
            _ => self.last_text.clone(),
        }
    }

    fn session_id(&self) -> Option<String> {
        self.session_id.clone()
    }

    fn reported_model(&self) -> Option<String> {
        self.model.clone()
    }

    fn failed(&self) -> bool {
        self.failed
    }
}
