//! Terminal output for the `steploop` CLI.

use crate::provider::ProviderRegistry;
use crate::scheduler::RunSummary;
use steploop_core::{Plan, StepStatus};

/// Print the per-step table for `steploop status`.
pub fn print_plan_status(plan: &Plan) {
    println!("Goal: {}", plan.goal);
    if !plan.metadata.provider.is_empty() || !plan.metadata.model.is_empty() {
        println!(
            "Provider: {} {}",
            plan.metadata.provider,
            plan.metadata.model
        );
    }
    println!(
        "Iterations: {}/{}",
        plan.metadata.completed_iterations, plan.metadata.total_iterations
    );
    println!();

    println!(
        "{:<20}  {:<12}  {:<8}  {:<40}",
        "ID", "STATUS", "ATTEMPTS", "TITLE"
    );
    println!("{}", "-".repeat(86));
    for step in &plan.steps {
        println!(
            "{:<20}  {:<12}  {:<8}  {:<40}",
            truncate(&step.id, 20),
            format_step_status(step.status),
            format!("{}/{}", step.attempts, step.max_attempts),
            truncate(&step.title, 40),
        );
        if let Some(error) = step.last_error.as_deref() {
            if step.status != StepStatus::Done {
                let first = error.lines().next().unwrap_or_default();
                println!("{:<20}  last error: {}", "", truncate(first, 64));
            }
        }
    }

    println!();
    println!(
        "{} done, {} failed, {} pending",
        plan.count_with_status(StepStatus::Done),
        plan.count_with_status(StepStatus::Failed),
        plan.count_with_status(StepStatus::Pending) + plan.count_with_status(StepStatus::InProgress),
    );
}

/// Print installed adapters for `steploop providers`.
pub fn print_providers(registry: &ProviderRegistry, model: Option<&str>) {
    println!(
        "{:<8}  {:<12}  {:<9}  {:<30}",
        "ID", "EXECUTABLE", "INSTALLED", "MODELS"
    );
    println!("{}", "-".repeat(65));
    for provider in registry.iter() {
        println!(
            "{:<8}  {:<12}  {:<9}  {:<30}",
            provider.id(),
            provider.executable(),
            if provider.is_installed() { "yes" } else { "no" },
            provider.models().join(", "),
        );
        if let Some(model) = model {
            let fallbacks = provider.fallback_models(model);
            let shown = if fallbacks.is_empty() {
                "-".to_string()
            } else {
                fallbacks.join(", ")
            };
            println!("{:<8}  fallbacks for {model}: {shown}", "");
        }
    }
}

pub fn print_run_summary(summary: &RunSummary) {
    println!();
    println!("Run {} finished ({})", summary.run_id, summary.stop_reason.as_str());
    println!("  Iterations: {}", summary.iterations);
    println!(
        "  Steps:      {} done, {} failed, {} pending",
        summary.completed_steps, summary.failed_steps, summary.pending_steps
    );
    println!("  {}", summary.analytics.summary_line());
}

fn format_step_status(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Pending => "PENDING",
        StepStatus::InProgress => "IN_PROGRESS",
        StepStatus::Done => "DONE",
        StepStatus::Failed => "FAILED",
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_is_char_safe() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("añadir-soporte-json", 10), "añadir-...");
    }
}
