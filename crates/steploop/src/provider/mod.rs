//! Agent CLI adapters.
//!
//! Each upstream agent is driven as a child process of its own CLI. Adapters
//! build the command line, parse the CLI's JSONL stream into
//! `ProviderEvent`s, and report expected failures as `ok=false` results.

pub mod claude;
pub mod codex;
pub mod process;

use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use steploop_core::{ProviderEvent, ProviderExecutionResult};
use thiserror::Error;

pub use claude::ClaudeAdapter;
pub use codex::CodexAdapter;

/// Environment failures. Agent failures are results, not errors.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider executable not installed: {0}")]
    NotInstalled(String),
    #[error("failed to run provider: {0}")]
    Spawn(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Receives provider events as they are parsed.
pub type EventCallback = Arc<dyn Fn(&ProviderEvent) + Send + Sync>;

/// One provider invocation request.
#[derive(Clone)]
pub struct ProviderInput {
    pub prompt: String,
    pub model: String,
    pub workdir: PathBuf,
    pub thinking: Option<String>,
    pub max_turns: Option<u32>,
    pub resume_session_id: Option<String>,
    /// Zero means no limit.
    pub timeout: Duration,
    /// Zero disables the heartbeat log.
    pub heartbeat: Duration,
    pub on_event: Option<EventCallback>,
}

impl fmt::Debug for ProviderInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderInput")
            .field("prompt_len", &self.prompt.len())
            .field("model", &self.model)
            .field("workdir", &self.workdir)
            .field("thinking", &self.thinking)
            .field("max_turns", &self.max_turns)
            .field("resume_session_id", &self.resume_session_id)
            .field("timeout", &self.timeout)
            .field("heartbeat", &self.heartbeat)
            .field("on_event", &self.on_event.is_some())
            .finish()
    }
}

impl ProviderInput {
    pub fn new(prompt: impl Into<String>, model: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            prompt: prompt.into(),
            model: model.into(),
            workdir: workdir.into(),
            thinking: None,
            max_turns: None,
            resume_session_id: None,
            timeout: Duration::from_secs(1800),
            heartbeat: Duration::from_secs(30),
            on_event: None,
        }
    }

    /// Forward an event to the callback, if any.
    pub fn emit(&self, event: &ProviderEvent) {
        if let Some(callback) = &self.on_event {
            callback(event);
        }
    }
}

/// A fully rendered command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment variables for the child.
    pub env: Vec<(String, String)>,
    pub workdir: PathBuf,
}

impl fmt::Display for ProviderCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.env {
            write!(f, "{key}={} ", shell_quote(value))?;
        }
        f.write_str(&shell_quote(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", shell_quote(arg))?;
        }
        Ok(())
    }
}

/// Quote `s` for display in a POSIX shell.
fn shell_quote(s: &str) -> String {
    let plain = !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | '=' | ':' | ','));
    if plain {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

/// Contract every agent CLI adapter implements.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn id(&self) -> &'static str;

    fn name(&self) -> &'static str;

    /// Name of the CLI binary.
    fn executable(&self) -> &'static str;

    fn models(&self) -> &'static [&'static str];

    fn thinking_levels(&self) -> &'static [&'static str];

    fn is_installed(&self) -> bool {
        find_executable(self.executable()).is_some()
    }

    /// Render the command line without running it.
    fn build_command(&self, input: &ProviderInput) -> ProviderCommand;

    async fn execute(&self, input: &ProviderInput) -> Result<ProviderExecutionResult>;

    /// Alternatives to `requested`, most preferred first. Never applied
    /// automatically; surfaced to the operator.
    fn fallback_models(&self, requested: &str) -> Vec<String>;
}

/// Models after `requested` in a preference chain, or the whole chain
/// (minus `requested`) when it is not part of it.
pub(crate) fn fallback_from_chain(chain: &[&str], requested: &str) -> Vec<String> {
    match chain.iter().position(|m| *m == requested) {
        Some(index) => chain[index + 1..].iter().map(ToString::to_string).collect(),
        None => chain.iter().map(ToString::to_string).collect(),
    }
}

/// Locate `name` on `PATH`.
pub fn find_executable(name: &str) -> Option<PathBuf> {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|p| p.is_file())
}

/// Registered adapters, in display order.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn ProviderAdapter>>,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.list()).finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `claude` and `codex` adapters.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ClaudeAdapter));
        registry.register(Arc::new(CodexAdapter));
        registry
    }

    /// Register a provider, replacing any with the same id.
    pub fn register(&mut self, provider: Arc<dyn ProviderAdapter>) {
        self.providers.retain(|p| p.id() != provider.id());
        self.providers.push(provider);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.providers.iter().find(|p| p.id() == id).map(Arc::clone)
    }

    pub fn list(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.id()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ProviderAdapter>> {
        self.providers.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_quotes_arguments() {
        let command = ProviderCommand {
            program: "claude".to_string(),
            args: vec!["-p".to_string(), "fix the bug's cause".to_string()],
            env: vec![("MAX_THINKING_TOKENS".to_string(), "4000".to_string())],
            workdir: PathBuf::from("/repo"),
        };
        assert_eq!(
            command.to_string(),
            r"MAX_THINKING_TOKENS=4000 claude -p 'fix the bug'\''s cause'"
        );
    }

    #[test]
    fn fallback_chain_order() {
        let chain = ["big", "medium", "small"];
        assert_eq!(fallback_from_chain(&chain, "big"), vec!["medium", "small"]);
        assert_eq!(fallback_from_chain(&chain, "small"), Vec::<String>::new());
        assert_eq!(
            fallback_from_chain(&chain, "custom"),
            vec!["big", "medium", "small"]
        );
    }

    #[test]
    fn registry_lookup() {
        let registry = ProviderRegistry::with_defaults();
        assert_eq!(registry.list(), vec!["claude", "codex"]);
        assert_eq!(registry.get("codex").unwrap().executable(), "codex");
        assert!(registry.get("gemini").is_none());
    }

    #[test]
    fn finds_shell_on_path() {
        assert!(find_executable("sh").is_some());
        assert!(find_executable("definitely-not-installed-agent").is_none());
    }
}
