//! Prompt assembly for the agent.
//!
//! Prompt wording is owned by whoever embeds the scheduler; `DefaultPromptBuilder`
//! is what the CLI uses.

use crate::types::{truncate_tail, Plan, Step, StepStatus};
use std::path::PathBuf;

/// Largest amount of baseline output injected into a prompt.
pub const MAX_BASELINE_CHARS: usize = 4000;

/// Everything a prompt builder may draw on for one iteration.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub plan: &'a Plan,
    pub step: &'a Step,
    /// Recent log plus short status, already formatted.
    pub git_state: &'a str,
    /// Output of failing baseline criteria; `None` when passing or narrative.
    pub baseline_failure: Option<&'a str>,
    /// Files referenced with `@path` so the agent reads them.
    pub context_files: &'a [PathBuf],
}

pub trait PromptBuilder: Send + Sync {
    fn build(&self, ctx: &PromptContext<'_>) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPromptBuilder;

impl PromptBuilder for DefaultPromptBuilder {
    fn build(&self, ctx: &PromptContext<'_>) -> String {
        let step = ctx.step;
        let mut prompt = String::new();

        if !ctx.context_files.is_empty() {
            let refs: Vec<String> = ctx
                .context_files
                .iter()
                .map(|p| format!("@{}", p.display()))
                .collect();
            prompt.push_str(&refs.join(" "));
            prompt.push_str("\n\n");
        }

        if let Some(system_prompt) = ctx.plan.system_prompt.as_deref() {
            if !system_prompt.trim().is_empty() {
                prompt.push_str(system_prompt.trim());
                prompt.push_str("\n\n");
            }
        }

        let done = ctx.plan.count_with_status(StepStatus::Done);
        prompt.push_str(&format!(
            "You are an implementation agent working through a multi-step plan.\n\n\
             Goal: {goal}\n\
             Progress: {done}/{total} steps done.\n\n\
             Current step: {id}: {title}\n",
            goal = ctx.plan.goal,
            total = ctx.plan.steps.len(),
            id = step.id,
            title = step.title,
        ));

        if !step.description.trim().is_empty() {
            prompt.push_str(&format!("\n{}\n", step.description.trim()));
        }

        prompt.push_str(&format!(
            "\nSuccess criteria (checked by the runner after you finish):\n{}\n",
            step.success_criteria
        ));

        if !step.files.is_empty() {
            prompt.push_str(&format!("\nFiles in scope: {}\n", step.files.join(", ")));
        }
        prompt.push_str(&format!("Risk level: {}\n", step.risk_level.as_str()));
        if !step.rollback_hint.trim().is_empty() {
            prompt.push_str(&format!("Rollback hint: {}\n", step.rollback_hint.trim()));
        }

        if let Some(last_error) = step.last_error.as_deref() {
            prompt.push_str(&format!(
                "\nThe previous attempt failed:\n{last_error}\n"
            ));
        }

        if let Some(output) = ctx.baseline_failure {
            if !output.trim().is_empty() {
                prompt.push_str(&format!(
                    "\nThe success criteria currently fail with:\n```\n{}\n```\n",
                    truncate_tail(output.trim_end(), MAX_BASELINE_CHARS)
                ));
            }
        }

        prompt.push_str(&format!("\nGit state:\n{}\n", ctx.git_state.trim_end()));

        prompt.push_str(
            "\nConstraints:\n\
             - Work only on this step. Avoid unrelated changes.\n\
             - Do not commit; the runner commits verified steps.\n\
             - Finish with a short summary of what you changed.\n",
        );
        prompt
    }
}
