//! Apply with terminal UI: confirmation, progress and the final report

use anyhow::{Context as AnyhowContext, Result};
use colored::Colorize;
use declarative::{
    ActionStatus, ApplyOutcome, ApplyReport, CancelToken, ExecuteOptions, Plan, RetryingProvider,
};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use crate::Context;
use crate::progress::ApplyProgress;
use crate::provider::SimulatedProvider;
use crate::signal;
use crate::state::FileStateStore;
use crate::ui;

/// Exit status for a terminal apply outcome
pub fn exit_code(outcome: ApplyOutcome) -> ExitCode {
    match outcome {
        ApplyOutcome::Applied => ExitCode::SUCCESS,
        ApplyOutcome::Failed => ExitCode::from(2),
        ApplyOutcome::PartiallyApplied => ExitCode::from(3),
        ApplyOutcome::Cancelled => ExitCode::from(130),
    }
}

/// Confirm with user
pub fn confirm_proceed(prompt: &str) -> Result<bool> {
    use dialoguer::Confirm;

    let confirmed = Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()?;

    Ok(confirmed)
}

/// Execute a plan through the simulated provider, writing `store`
pub fn execute(ctx: &Context, plan: &Plan, store: &mut FileStateStore, jobs: usize) -> Result<ApplyReport> {
    let provider = RetryingProvider::new(
        SimulatedProvider::new(&ctx.config.provider),
        ctx.config.retry.to_retry_config(),
    );

    let cancel = CancelToken::new();
    signal::install(&cancel)?;

    if !ctx.quiet {
        println!();
        println!(
            "  {} Applying {} with {} ...",
            "→".cyan(),
            ui::plural(plan.len(), "action"),
            ui::plural(jobs, "worker")
        );
    }

    let mut progress = ApplyProgress::new(plan.len(), ctx.quiet);
    let started = Instant::now();
    let result = declarative::apply(
        plan,
        &provider,
        store,
        &ExecuteOptions { jobs },
        &cancel,
        &mut progress,
    );
    progress.finish();
    let report = result.context("Apply aborted")?;

    log::info!(
        "Apply {} in {:?}, state serial {}",
        report.outcome,
        started.elapsed(),
        store.serial()
    );
    print_report(&report, started.elapsed(), signal::interrupted());
    Ok(report)
}

/// Print final summary
fn print_report(report: &ApplyReport, elapsed: Duration, interrupted: bool) {
    let summary = &report.summary;
    println!();
    println!("  {}", outcome_line(report.outcome, elapsed, interrupted));

    if summary.created > 0 {
        println!("    • {} created", ui::plural(summary.created, "resource"));
    }
    if summary.updated > 0 {
        println!("    • {} updated", ui::plural(summary.updated, "resource"));
    }
    if summary.destroyed > 0 {
        println!("    • {} destroyed", ui::plural(summary.destroyed, "resource"));
    }
    if summary.failed > 0 {
        println!("    • {} {}", summary.failed, "failed".red());
    }
    if summary.skipped > 0 {
        println!("    • {} skipped", summary.skipped);
    }
    if summary.not_started > 0 {
        println!("    • {} not started", summary.not_started);
    }

    let failures: Vec<_> = report.failures().collect();
    if !failures.is_empty() {
        ui::section("Failed");
        for (address, error) in failures {
            println!("  {} {}: {}", "✗".red(), address, error);
        }
    }

    let skipped: Vec<_> = report.skipped().collect();
    if !skipped.is_empty() {
        ui::section("Skipped");
        for (address, blocked_by) in skipped {
            ui::dim(&format!("{address} (blocked by {blocked_by})"));
        }
    }

    let not_started: Vec<_> = report
        .actions
        .iter()
        .filter(|a| a.status == ActionStatus::NotStarted)
        .collect();
    if !not_started.is_empty() {
        ui::section("Not started");
        for action in not_started {
            ui::dim(&format!("{} {}", action.kind, action.address));
        }
    }
}

/// Headline for the final report
fn outcome_line(outcome: ApplyOutcome, elapsed: Duration, interrupted: bool) -> String {
    match outcome {
        ApplyOutcome::Applied => format!(
            "{} Apply complete in {}",
            "✓".green().bold(),
            ui::format_duration(elapsed)
        ),
        ApplyOutcome::PartiallyApplied => format!(
            "{} Apply partially complete, some actions failed",
            "⚠".yellow().bold()
        ),
        ApplyOutcome::Failed => format!("{} Apply failed, no action succeeded", "✗".red().bold()),
        ApplyOutcome::Cancelled => format!(
            "{} Apply cancelled{}",
            "⚠".yellow().bold(),
            if interrupted { " by interrupt" } else { "" }
        ),
    }
}
